//! Setup 头解析.
//!
//! setup 头携带 codebook/floor/residue/mapping/mode 五张配置表,
//! 所有交叉引用 (mapping→floor, residue→codebook 等) 在解析期一次
//! 校验完毕, 音频包解码路径不再做范围检查之外的验证.

use super::bitreader::{LsbBitReader, ilog};
use super::codebook::Codebook;
use super::error::{VorbisError, VorbisResult};
use super::headers::{HEADER_SETUP, IdentHeader, verify_header_packet};

/// 解析完成的 setup 头
#[derive(Debug, Clone)]
pub(crate) struct SetupHeader {
    pub(crate) codebooks: Vec<Codebook>,
    pub(crate) floors: Vec<FloorConfig>,
    pub(crate) residues: Vec<ResidueConfig>,
    pub(crate) mappings: Vec<MappingConfig>,
    pub(crate) modes: Vec<ModeConfig>,
}

#[derive(Debug, Clone)]
pub(crate) enum FloorConfig {
    Type0(Floor0Config),
    Type1(Floor1Config),
}

/// floor type 0: LSP 包络
#[derive(Debug, Clone)]
pub(crate) struct Floor0Config {
    pub(crate) order: u8,
    pub(crate) amplitude_bits: u8,
    pub(crate) amplitude_offset: u8,
    pub(crate) book_list: Vec<u8>,
    /// 按 blockflag 缓存的 bark 频率映射 (短块/长块各一份)
    pub(crate) bark_maps: [BarkMap; 2],
}

/// floor0 的频率→bark 映射缓存
#[derive(Debug, Clone)]
pub(crate) struct BarkMap {
    pub(crate) map: Vec<u32>,
    pub(crate) cos_omega: Vec<f32>,
}

/// floor type 1: 分段线性包络
#[derive(Debug, Clone)]
pub(crate) struct Floor1Config {
    pub(crate) partition_classes: Vec<u8>,
    pub(crate) class_dimensions: Vec<u8>,
    pub(crate) class_subclasses: Vec<u8>,
    pub(crate) class_masterbooks: Vec<u8>,
    pub(crate) subclass_books: Vec<Vec<Option<u8>>>,
    pub(crate) multiplier: u8,
    pub(crate) x_list: Vec<u32>,
    /// x_list 的升序置换, 合成时按频率顺序遍历
    pub(crate) x_sort: Vec<usize>,
}

impl Floor1Config {
    /// 振幅值域上界: [256, 128, 86, 64] 按 multiplier 索引
    pub(crate) fn range(&self) -> u32 {
        [256, 128, 86, 64][usize::from(self.multiplier - 1)]
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResidueConfig {
    pub(crate) residue_type: u16,
    pub(crate) begin: u32,
    pub(crate) end: u32,
    pub(crate) partition_size: u32,
    pub(crate) classbook: u8,
    /// 每个分类在 8 个 pass 上使用的 codebook (cascade 位未置则为 None)
    pub(crate) books: Vec<[Option<u8>; 8]>,
}

#[derive(Debug, Clone)]
pub(crate) struct MappingConfig {
    /// 声道耦合对 (magnitude, angle), 按声明顺序
    pub(crate) couplings: Vec<(u8, u8)>,
    /// 每个声道所属的 submap
    pub(crate) mux: Vec<u8>,
    pub(crate) submap_floors: Vec<u8>,
    pub(crate) submap_residues: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct ModeConfig {
    pub(crate) blockflag: bool,
    pub(crate) mapping: u8,
}

impl SetupHeader {
    /// 解析 setup 头包 (第三个头包)
    pub(crate) fn parse(packet: &[u8], ident: &IdentHeader) -> VorbisResult<Self> {
        let body = verify_header_packet(packet, HEADER_SETUP)?;
        let mut br = LsbBitReader::new(body);

        let codebook_count = br.read_bits(8)? as usize + 1;
        let mut codebooks = Vec::with_capacity(codebook_count);
        for _ in 0..codebook_count {
            codebooks.push(Codebook::parse(&mut br)?);
        }

        // time domain transform 表: 规范保留, 每项必须为 0
        let time_count = br.read_bits(6)? as usize + 1;
        for _ in 0..time_count {
            if br.read_bits(16)? != 0 {
                return Err(VorbisError::UnsupportedMode(
                    "time domain transform 必须为 0".into(),
                ));
            }
        }

        let floor_count = br.read_bits(6)? as usize + 1;
        let mut floors = Vec::with_capacity(floor_count);
        for _ in 0..floor_count {
            floors.push(parse_floor(&mut br, &codebooks, ident)?);
        }

        let residue_count = br.read_bits(6)? as usize + 1;
        let mut residues = Vec::with_capacity(residue_count);
        for _ in 0..residue_count {
            residues.push(parse_residue(&mut br, &codebooks)?);
        }

        let mapping_count = br.read_bits(6)? as usize + 1;
        let mut mappings = Vec::with_capacity(mapping_count);
        for _ in 0..mapping_count {
            mappings.push(parse_mapping(
                &mut br,
                ident.channels,
                floors.len(),
                residues.len(),
            )?);
        }

        let mode_count = br.read_bits(6)? as usize + 1;
        let mut modes = Vec::with_capacity(mode_count);
        for _ in 0..mode_count {
            modes.push(parse_mode(&mut br, mappings.len())?);
        }

        if !br.read_flag()? {
            return Err(VorbisError::UnsupportedMode("setup 头 framing 位缺失".into()));
        }

        Ok(Self {
            codebooks,
            floors,
            residues,
            mappings,
            modes,
        })
    }
}

fn parse_floor(
    br: &mut LsbBitReader<'_>,
    codebooks: &[Codebook],
    ident: &IdentHeader,
) -> VorbisResult<FloorConfig> {
    let floor_type = br.read_bits(16)?;
    match floor_type {
        0 => Ok(FloorConfig::Type0(parse_floor0(br, codebooks, ident)?)),
        1 => Ok(FloorConfig::Type1(parse_floor1(br, codebooks)?)),
        t => Err(VorbisError::InvalidFloorData(format!(
            "未知的 floor 类型: {t}"
        ))),
    }
}

fn parse_floor0(
    br: &mut LsbBitReader<'_>,
    codebooks: &[Codebook],
    ident: &IdentHeader,
) -> VorbisResult<Floor0Config> {
    let order = br.read_bits(8)? as u8;
    let rate = br.read_bits(16)?;
    let bark_map_size = br.read_bits(16)?;
    let amplitude_bits = br.read_bits(6)? as u8;
    let amplitude_offset = br.read_bits(8)? as u8;
    let book_count = br.read_bits(4)? as usize + 1;

    if order == 0 || rate == 0 || bark_map_size == 0 {
        return Err(VorbisError::InvalidFloorData(
            "floor0 的 order/rate/bark_map_size 不能为 0".into(),
        ));
    }

    let mut book_list = Vec::with_capacity(book_count);
    for _ in 0..book_count {
        let book = br.read_bits(8)? as u8;
        let cb = codebooks.get(usize::from(book)).ok_or_else(|| {
            VorbisError::InvalidFloorData(format!("floor0 codebook {book} 越界"))
        })?;
        if !cb.has_lookup() {
            return Err(VorbisError::InvalidFloorData(format!(
                "floor0 codebook {book} 缺少 value mapping"
            )));
        }
        book_list.push(book);
    }

    let bark_maps = [
        compute_bark_map(ident.blocksize_0() / 2, rate, bark_map_size),
        compute_bark_map(ident.blocksize_1() / 2, rate, bark_map_size),
    ];

    Ok(Floor0Config {
        order,
        amplitude_bits,
        amplitude_offset,
        book_list,
        bark_maps,
    })
}

fn bark(x: f32) -> f32 {
    13.1 * (0.000_74 * x).atan() + 2.24 * (1.85e-8 * x * x).atan() + 1e-4 * x
}

/// 为 n 条谱线计算 bark 映射及其 cos(ω) 缓存
fn compute_bark_map(n: usize, rate: u32, bark_map_size: u32) -> BarkMap {
    let scale = bark_map_size as f32 / bark(0.5 * rate as f32);
    let mut map = Vec::with_capacity(n);
    let mut cos_omega = Vec::with_capacity(n);
    for i in 0..n {
        let freq = rate as f32 * i as f32 / (2.0 * n as f32);
        let idx = ((bark(freq) * scale) as u32).min(bark_map_size - 1);
        map.push(idx);
        cos_omega.push((std::f32::consts::PI * idx as f32 / bark_map_size as f32).cos());
    }
    BarkMap { map, cos_omega }
}

fn parse_floor1(br: &mut LsbBitReader<'_>, codebooks: &[Codebook]) -> VorbisResult<Floor1Config> {
    let partitions = br.read_bits(5)? as usize;
    let mut partition_classes = Vec::with_capacity(partitions);
    let mut maximum_class = 0u8;
    for _ in 0..partitions {
        let class = br.read_bits(4)? as u8;
        maximum_class = maximum_class.max(class);
        partition_classes.push(class);
    }

    let class_count = if partitions == 0 {
        0
    } else {
        usize::from(maximum_class) + 1
    };
    let mut class_dimensions = Vec::with_capacity(class_count);
    let mut class_subclasses = Vec::with_capacity(class_count);
    let mut class_masterbooks = Vec::with_capacity(class_count);
    let mut subclass_books = Vec::with_capacity(class_count);
    for _ in 0..class_count {
        class_dimensions.push(br.read_bits(3)? as u8 + 1);
        let subclass = br.read_bits(2)? as u8;
        class_subclasses.push(subclass);

        let masterbook = if subclass > 0 {
            let book = br.read_bits(8)? as u8;
            if usize::from(book) >= codebooks.len() {
                return Err(VorbisError::InvalidFloorData(format!(
                    "floor1 masterbook {book} 越界"
                )));
            }
            book
        } else {
            0
        };
        class_masterbooks.push(masterbook);

        let mut books = Vec::with_capacity(1 << subclass);
        for _ in 0..(1u32 << subclass) {
            let raw = br.read_bits(8)? as i16 - 1;
            if raw < 0 {
                books.push(None);
            } else {
                let book = raw as u8;
                if usize::from(book) >= codebooks.len() {
                    return Err(VorbisError::InvalidFloorData(format!(
                        "floor1 subclass codebook {book} 越界"
                    )));
                }
                books.push(Some(book));
            }
        }
        subclass_books.push(books);
    }

    let multiplier = br.read_bits(2)? as u8 + 1;
    let rangebits = br.read_bits(4)? as u8;

    let mut x_list = vec![0u32, 1u32 << rangebits];
    for &class in &partition_classes {
        for _ in 0..class_dimensions[usize::from(class)] {
            x_list.push(br.read_bits(rangebits)?);
        }
    }
    if x_list.len() > 65 {
        return Err(VorbisError::InvalidFloorData(format!(
            "floor1 x_list 过长: {}",
            x_list.len()
        )));
    }

    let mut x_sort: Vec<usize> = (0..x_list.len()).collect();
    x_sort.sort_by_key(|&i| x_list[i]);
    // x 值必须互不相同, 否则包络分段退化
    if x_sort.windows(2).any(|w| x_list[w[0]] == x_list[w[1]]) {
        return Err(VorbisError::InvalidFloorData("floor1 x_list 存在重复值".into()));
    }

    Ok(Floor1Config {
        partition_classes,
        class_dimensions,
        class_subclasses,
        class_masterbooks,
        subclass_books,
        multiplier,
        x_list,
        x_sort,
    })
}

fn parse_residue(br: &mut LsbBitReader<'_>, codebooks: &[Codebook]) -> VorbisResult<ResidueConfig> {
    let residue_type = br.read_bits(16)? as u16;
    if residue_type > 2 {
        return Err(VorbisError::InvalidResidueData(format!(
            "未知的 residue 类型: {residue_type}"
        )));
    }

    let begin = br.read_bits(24)?;
    let end = br.read_bits(24)?;
    let partition_size = br.read_bits(24)? + 1;
    let classifications = br.read_bits(6)? as usize + 1;
    let classbook = br.read_bits(8)? as u8;
    if begin > end {
        return Err(VorbisError::InvalidResidueData(format!(
            "residue 区间非法: [{begin}, {end})"
        )));
    }
    let classbook_ref = codebooks.get(usize::from(classbook)).ok_or_else(|| {
        VorbisError::InvalidResidueData(format!("residue classbook {classbook} 越界"))
    })?;
    // classbook 解出的标量需覆盖 classifications^dimensions 种组合
    let combos = (classifications as u64).checked_pow(u32::from(classbook_ref.dimensions));
    if combos.is_none_or(|c| c > u64::from(classbook_ref.entries)) {
        log::warn!(
            "residue classbook {} 条目数不足以覆盖全部分类组合",
            classbook
        );
    }

    let mut cascades = Vec::with_capacity(classifications);
    for _ in 0..classifications {
        let low_bits = br.read_bits(3)?;
        let high_bits = if br.read_flag()? { br.read_bits(5)? } else { 0 };
        cascades.push((high_bits << 3) | low_bits);
    }

    let mut books = Vec::with_capacity(classifications);
    for &cascade in &cascades {
        let mut passes = [None; 8];
        for (pass, slot) in passes.iter_mut().enumerate() {
            if cascade & (1 << pass) != 0 {
                let book = br.read_bits(8)? as u8;
                let cb = codebooks.get(usize::from(book)).ok_or_else(|| {
                    VorbisError::InvalidResidueData(format!("residue codebook {book} 越界"))
                })?;
                if !cb.has_lookup() {
                    return Err(VorbisError::InvalidResidueData(format!(
                        "residue codebook {book} 缺少 value mapping"
                    )));
                }
                *slot = Some(book);
            }
        }
        books.push(passes);
    }

    Ok(ResidueConfig {
        residue_type,
        begin,
        end,
        partition_size,
        classbook,
        books,
    })
}

fn parse_mapping(
    br: &mut LsbBitReader<'_>,
    channels: u8,
    floor_count: usize,
    residue_count: usize,
) -> VorbisResult<MappingConfig> {
    let mapping_type = br.read_bits(16)?;
    if mapping_type != 0 {
        return Err(VorbisError::UnsupportedMode(format!(
            "未知的 mapping 类型: {mapping_type}"
        )));
    }

    let submaps = if br.read_flag()? {
        br.read_bits(4)? as usize + 1
    } else {
        1
    };

    let mut couplings = Vec::new();
    if br.read_flag()? {
        let coupling_steps = br.read_bits(8)? as usize + 1;
        let bits = ilog(u32::from(channels) - 1);
        for _ in 0..coupling_steps {
            let magnitude = br.read_bits(bits)? as u8;
            let angle = br.read_bits(bits)? as u8;
            if magnitude == angle || magnitude >= channels || angle >= channels {
                return Err(VorbisError::UnsupportedMode(format!(
                    "声道耦合对非法: ({magnitude}, {angle})"
                )));
            }
            couplings.push((magnitude, angle));
        }
    }

    if br.read_bits(2)? != 0 {
        return Err(VorbisError::UnsupportedMode("mapping 保留位非零".into()));
    }

    let mut mux = Vec::with_capacity(usize::from(channels));
    if submaps > 1 {
        for _ in 0..channels {
            let m = br.read_bits(4)? as u8;
            if usize::from(m) >= submaps {
                return Err(VorbisError::UnsupportedMode(format!("mux {m} 越界")));
            }
            mux.push(m);
        }
    } else {
        mux.resize(usize::from(channels), 0);
    }

    let mut submap_floors = Vec::with_capacity(submaps);
    let mut submap_residues = Vec::with_capacity(submaps);
    for _ in 0..submaps {
        // time 配置: 占位字段, 丢弃
        let _ = br.read_bits(8)?;
        let floor = br.read_bits(8)? as u8;
        if usize::from(floor) >= floor_count {
            return Err(VorbisError::UnsupportedMode(format!(
                "submap floor {floor} 越界"
            )));
        }
        let residue = br.read_bits(8)? as u8;
        if usize::from(residue) >= residue_count {
            return Err(VorbisError::UnsupportedMode(format!(
                "submap residue {residue} 越界"
            )));
        }
        submap_floors.push(floor);
        submap_residues.push(residue);
    }

    Ok(MappingConfig {
        couplings,
        mux,
        submap_floors,
        submap_residues,
    })
}

fn parse_mode(br: &mut LsbBitReader<'_>, mapping_count: usize) -> VorbisResult<ModeConfig> {
    let blockflag = br.read_flag()?;
    let window_type = br.read_bits(16)?;
    let transform_type = br.read_bits(16)?;
    let mapping = br.read_bits(8)? as u8;
    if window_type != 0 || transform_type != 0 {
        return Err(VorbisError::UnsupportedMode(
            "mode 的 window/transform 类型必须为 0".into(),
        ));
    }
    if usize::from(mapping) >= mapping_count {
        return Err(VorbisError::UnsupportedMode(format!(
            "mode mapping {mapping} 越界"
        )));
    }
    Ok(ModeConfig { blockflag, mapping })
}
