//! floor 包络解码与曲线合成.
//!
//! floor 读包与曲线合成是分开的两步: 读包发生在 residue 之前,
//! 曲线合成与点乘发生在声道耦合逆变换之后.

use super::bitreader::{LsbBitReader, ilog};
use super::codebook::Codebook;
use super::error::{VorbisError, VorbisResult};
use super::setup::{Floor0Config, Floor1Config, FloorConfig};

/// 单个声道的 floor 解码结果
#[derive(Debug, Clone)]
pub(crate) enum FloorData {
    /// 本包中该声道无能量
    Unused,
    /// LSP 包络: 振幅与 cos 化的系数
    Type0 {
        amplitude: u64,
        coefficients: Vec<f32>,
    },
    /// 分段线性包络: 反量化后的 y 值与有效点标志
    Type1 {
        final_y: Vec<u32>,
        step2: Vec<bool>,
    },
}

impl FloorData {
    pub(crate) fn is_unused(&self) -> bool {
        matches!(self, FloorData::Unused)
    }
}

/// 从音频包中解码一个声道的 floor 数据.
///
/// 位流在 floor 段中途耗尽不是错误: 规范要求把该声道按无能量处理,
/// 包的其余部分继续正常解码.
pub(crate) fn decode_floor(
    br: &mut LsbBitReader<'_>,
    config: &FloorConfig,
    codebooks: &[Codebook],
) -> VorbisResult<FloorData> {
    let result = match config {
        FloorConfig::Type0(cfg) => decode_floor0(br, cfg, codebooks),
        FloorConfig::Type1(cfg) => decode_floor1(br, cfg, codebooks),
    };
    match result {
        Err(VorbisError::TruncatedStream) => Ok(FloorData::Unused),
        other => other,
    }
}

fn decode_floor0(
    br: &mut LsbBitReader<'_>,
    cfg: &Floor0Config,
    codebooks: &[Codebook],
) -> VorbisResult<FloorData> {
    // 振幅字段最宽 63 位
    let amplitude = if cfg.amplitude_bits > 32 {
        let low = br.read_bits(32)?;
        let high = br.read_bits(cfg.amplitude_bits - 32)?;
        (u64::from(high) << 32) | u64::from(low)
    } else {
        u64::from(br.read_bits(cfg.amplitude_bits)?)
    };
    if amplitude == 0 {
        return Ok(FloorData::Unused);
    }

    let booknumber = br.read_bits(ilog(cfg.book_list.len() as u32))?;
    let book_idx = cfg.book_list.get(booknumber as usize).ok_or_else(|| {
        VorbisError::InvalidFloorData(format!("floor0 book 序号 {booknumber} 越界"))
    })?;
    // codebook 索引与 value mapping 在 setup 期已校验
    let book = &codebooks[usize::from(*book_idx)];

    let order = usize::from(cfg.order);
    let mut coefficients = Vec::with_capacity(order);
    let mut last = 0.0f32;
    let mut vector = Vec::new();
    while coefficients.len() < order {
        book.read_vector(br, &mut vector)?;
        for &e in &vector {
            coefficients.push((last + e).cos());
        }
        last += vector.last().copied().unwrap_or(0.0);
    }
    coefficients.truncate(order);

    Ok(FloorData::Type0 {
        amplitude,
        coefficients,
    })
}

fn decode_floor1(
    br: &mut LsbBitReader<'_>,
    cfg: &Floor1Config,
    codebooks: &[Codebook],
) -> VorbisResult<FloorData> {
    if !br.read_flag()? {
        return Ok(FloorData::Unused);
    }

    let range = cfg.range();
    let bits = ilog(range - 1);
    let mut y = Vec::with_capacity(cfg.x_list.len());
    y.push(br.read_bits(bits)?);
    y.push(br.read_bits(bits)?);

    for &class in &cfg.partition_classes {
        let class = usize::from(class);
        let cdim = cfg.class_dimensions[class];
        let cbits = cfg.class_subclasses[class];
        let csub = (1u32 << cbits) - 1;
        let mut cval = if cbits > 0 {
            let masterbook = usize::from(cfg.class_masterbooks[class]);
            codebooks[masterbook].decode_scalar(br)?
        } else {
            0
        };
        for _ in 0..cdim {
            let book = cfg.subclass_books[class][(cval & csub) as usize];
            cval >>= cbits;
            y.push(match book {
                Some(b) => codebooks[usize::from(b)].decode_scalar(br)?,
                None => 0,
            });
        }
    }

    let (final_y, step2) = dequantize_amplitude(cfg, range, &y);
    Ok(FloorData::Type1 { final_y, step2 })
}

/// 由预测残差 y 反量化出每个包络点的最终振幅, 并标记实际传输的点
fn dequantize_amplitude(cfg: &Floor1Config, range: u32, y: &[u32]) -> (Vec<u32>, Vec<bool>) {
    let n = cfg.x_list.len();
    let limit = i64::from(range) - 1;
    let mut final_y = Vec::with_capacity(n);
    let mut step2 = vec![false; n];
    step2[0] = true;
    step2[1] = true;
    final_y.push(y[0].min(range - 1));
    final_y.push(y[1].min(range - 1));

    for i in 2..n {
        let (low, high) = find_neighbors(&cfg.x_list, i);
        let predicted = render_point(
            i64::from(cfg.x_list[low]),
            i64::from(final_y[low]),
            i64::from(cfg.x_list[high]),
            i64::from(final_y[high]),
            i64::from(cfg.x_list[i]),
        );
        let val = i64::from(y[i]);
        let highroom = i64::from(range) - predicted;
        let lowroom = predicted;
        let room = 2 * highroom.min(lowroom);

        if val == 0 {
            final_y.push(predicted.clamp(0, limit) as u32);
            continue;
        }
        step2[low] = true;
        step2[high] = true;
        step2[i] = true;
        let v = if val >= room {
            if highroom > lowroom {
                predicted + (val - lowroom)
            } else {
                predicted - (val - highroom) - 1
            }
        } else if val & 1 == 1 {
            predicted - ((val + 1) >> 1)
        } else {
            predicted + (val >> 1)
        };
        final_y.push(v.clamp(0, limit) as u32);
    }
    (final_y, step2)
}

/// 在 x_list 的前缀 [0, i) 中找 x[i] 的最近下邻与上邻
fn find_neighbors(x_list: &[u32], i: usize) -> (usize, usize) {
    let xi = x_list[i];
    let mut low_idx = 0usize;
    let mut high_idx = 0usize;
    let mut low_x = 0u32;
    let mut high_x = u32::MAX;
    for (j, &xj) in x_list.iter().enumerate().take(i) {
        if xj < xi && xj >= low_x {
            low_x = xj;
            low_idx = j;
        }
        if xj > xi && xj <= high_x {
            high_x = xj;
            high_idx = j;
        }
    }
    (low_idx, high_idx)
}

fn render_point(x0: i64, y0: i64, x1: i64, y1: i64, x: i64) -> i64 {
    if x1 == x0 {
        return y0;
    }
    let dy = y1 - y0;
    let adx = x1 - x0;
    let off = (dy.abs() * (x - x0)) / adx;
    if dy < 0 { y0 - off } else { y0 + off }
}

/// 把 floor 数据合成为长度 n2 的线性幅度包络
pub(crate) fn synthesize_curve(
    data: &FloorData,
    config: &FloorConfig,
    blockflag: bool,
    n2: usize,
) -> Vec<f32> {
    match (data, config) {
        (FloorData::Unused, _) => vec![0.0; n2],
        (
            FloorData::Type0 {
                amplitude,
                coefficients,
            },
            FloorConfig::Type0(cfg),
        ) => floor0_curve(cfg, *amplitude, coefficients, blockflag, n2),
        (FloorData::Type1 { final_y, step2 }, FloorConfig::Type1(cfg)) => {
            floor1_curve(cfg, final_y, step2, n2)
        }
        // 解码结果与配置类型总是成对出现
        _ => vec![0.0; n2],
    }
}

fn floor0_curve(
    cfg: &Floor0Config,
    amplitude: u64,
    coefficients: &[f32],
    blockflag: bool,
    n2: usize,
) -> Vec<f32> {
    let bm = &cfg.bark_maps[usize::from(blockflag)];
    let order = coefficients.len();
    let amp_max = ((1u64 << cfg.amplitude_bits) - 1) as f32;
    let offset = f32::from(cfg.amplitude_offset);

    let mut out = vec![0.0f32; n2];
    let mut i = 0usize;
    while i < n2 && i < bm.map.len() {
        let map_val = bm.map[i];
        let cos_omega = bm.cos_omega[i];

        let (mut p, mut q);
        if order & 1 == 1 {
            p = 1.0 - cos_omega * cos_omega;
            q = 0.25;
            for j in 0..(order - 1) / 2 {
                let d = coefficients[2 * j + 1] - cos_omega;
                p *= 4.0 * d * d;
            }
            for j in 0..(order + 1) / 2 {
                let d = coefficients[2 * j] - cos_omega;
                q *= 4.0 * d * d;
            }
        } else {
            p = (1.0 - cos_omega) / 2.0;
            q = (1.0 + cos_omega) / 2.0;
            for j in 0..order / 2 {
                let dp = coefficients[2 * j + 1] - cos_omega;
                let dq = coefficients[2 * j] - cos_omega;
                p *= 4.0 * dp * dp;
                q *= 4.0 * dq * dq;
            }
        }

        let linear = (0.115_129_25
            * (amplitude as f32 * offset / (amp_max * (p + q).sqrt()) - offset))
            .exp();

        // 同一 bark 槽内的所有谱线共享一个包络值
        while i < n2 && i < bm.map.len() && bm.map[i] == map_val {
            out[i] = linear;
            i += 1;
        }
    }
    out
}

fn floor1_curve(cfg: &Floor1Config, final_y: &[u32], step2: &[bool], n2: usize) -> Vec<f32> {
    let mult = u32::from(cfg.multiplier);
    let mut out = vec![0.0f32; n2];

    // x_sort[0] 对应 x = 0 的固定起点
    let mut lx = 0u32;
    let mut ly = final_y[cfg.x_sort[0]] * mult;
    for &i in &cfg.x_sort[1..] {
        if !step2[i] {
            continue;
        }
        let hx = cfg.x_list[i];
        let hy = final_y[i] * mult;
        render_line(lx, ly, hx, hy, &mut out);
        lx = hx;
        ly = hy;
    }
    // 包络未覆盖到谱尾时水平延伸
    if (lx as usize) < n2 {
        render_line(lx, ly, n2 as u32, ly, &mut out);
    }
    out
}

fn render_line(x0: u32, y0: u32, x1: u32, y1: u32, out: &mut [f32]) {
    if x1 <= x0 || x0 as usize >= out.len() {
        return;
    }
    let dy = i64::from(y1) - i64::from(y0);
    let adx = i64::from(x1 - x0);
    let mut ady = dy.abs();
    let base = dy / adx;
    let sy = if dy < 0 { base - 1 } else { base + 1 };
    ady -= base.abs() * adx;

    let mut y = i64::from(y0);
    let mut err = 0i64;
    out[x0 as usize] = inverse_db(y);
    for x in (x0 + 1)..x1 {
        let xi = x as usize;
        if xi >= out.len() {
            break;
        }
        err += ady;
        if err >= adx {
            err -= adx;
            y += sy;
        } else {
            y += base;
        }
        out[xi] = inverse_db(y);
    }
}

fn inverse_db(y: i64) -> f32 {
    FLOOR1_INVERSE_DB_TABLE[y.clamp(0, 255) as usize]
}

#[rustfmt::skip]
static FLOOR1_INVERSE_DB_TABLE: &[f32; 256] = &[
    1.0649863e-07, 1.1341951e-07, 1.2079015e-07, 1.2863978e-07,
    1.3699951e-07, 1.4590251e-07, 1.5538408e-07, 1.6548181e-07,
    1.7623575e-07, 1.8768855e-07, 1.9988561e-07, 2.1287530e-07,
    2.2670913e-07, 2.4144197e-07, 2.5713223e-07, 2.7384213e-07,
    2.9163793e-07, 3.1059021e-07, 3.3077411e-07, 3.5226968e-07,
    3.7516214e-07, 3.9954229e-07, 4.2550680e-07, 4.5315863e-07,
    4.8260743e-07, 5.1396998e-07, 5.4737065e-07, 5.8294187e-07,
    6.2082472e-07, 6.6116941e-07, 7.0413592e-07, 7.4989464e-07,
    7.9862701e-07, 8.5052630e-07, 9.0579828e-07, 9.6466216e-07,
    1.0273513e-06, 1.0941144e-06, 1.1652161e-06, 1.2409384e-06,
    1.3215816e-06, 1.4074654e-06, 1.4989305e-06, 1.5963394e-06,
    1.7000785e-06, 1.8105592e-06, 1.9282195e-06, 2.0535261e-06,
    2.1869758e-06, 2.3290978e-06, 2.4804557e-06, 2.6416497e-06,
    2.8133190e-06, 2.9961443e-06, 3.1908506e-06, 3.3982101e-06,
    3.6190449e-06, 3.8542308e-06, 4.1047004e-06, 4.3714470e-06,
    4.6555282e-06, 4.9580707e-06, 5.2802740e-06, 5.6234160e-06,
    5.9888572e-06, 6.3780469e-06, 6.7925283e-06, 7.2339451e-06,
    7.7040476e-06, 8.2047000e-06, 8.7378876e-06, 9.3057248e-06,
    9.9104632e-06, 1.0554501e-05, 1.1240392e-05, 1.1970856e-05,
    1.2748789e-05, 1.3577278e-05, 1.4459606e-05, 1.5399272e-05,
    1.6400004e-05, 1.7465768e-05, 1.8600792e-05, 1.9809576e-05,
    2.1096914e-05, 2.2467911e-05, 2.3928002e-05, 2.5482978e-05,
    2.7139006e-05, 2.8902651e-05, 3.0780908e-05, 3.2781225e-05,
    3.4911534e-05, 3.7180282e-05, 3.9596466e-05, 4.2169667e-05,
    4.4910090e-05, 4.7828601e-05, 5.0936773e-05, 5.4246931e-05,
    5.7772202e-05, 6.1526565e-05, 6.5524908e-05, 6.9783085e-05,
    7.4317983e-05, 7.9147585e-05, 8.4291040e-05, 8.9768747e-05,
    9.5602426e-05, 1.0181521e-04, 1.0843174e-04, 1.1547824e-04,
    1.2298267e-04, 1.3097477e-04, 1.3948625e-04, 1.4855085e-04,
    1.5820453e-04, 1.6848555e-04, 1.7943469e-04, 1.9109536e-04,
    2.0351382e-04, 2.1673929e-04, 2.3082423e-04, 2.4582449e-04,
    2.6179955e-04, 2.7881275e-04, 2.9693158e-04, 3.1622787e-04,
    3.3677814e-04, 3.5866388e-04, 3.8197188e-04, 4.0679456e-04,
    4.3323036e-04, 4.6138411e-04, 4.9136745e-04, 5.2329927e-04,
    5.5730621e-04, 5.9352311e-04, 6.3209358e-04, 6.7317058e-04,
    7.1691700e-04, 7.6350630e-04, 8.1312324e-04, 8.6596457e-04,
    9.2223983e-04, 9.8217216e-04, 1.0459992e-03, 1.1139742e-03,
    1.1863665e-03, 1.2634633e-03, 1.3455702e-03, 1.4330129e-03,
    1.5261382e-03, 1.6253153e-03, 1.7309374e-03, 1.8434235e-03,
    1.9632195e-03, 2.0908006e-03, 2.2266726e-03, 2.3713743e-03,
    2.5254795e-03, 2.6895994e-03, 2.8643847e-03, 3.0505286e-03,
    3.2487691e-03, 3.4598925e-03, 3.6847358e-03, 3.9241906e-03,
    4.1792066e-03, 4.4507950e-03, 4.7400328e-03, 5.0480668e-03,
    5.3761186e-03, 5.7254891e-03, 6.0975636e-03, 6.4938176e-03,
    6.9158225e-03, 7.3652516e-03, 7.8438871e-03, 8.3536271e-03,
    8.8964928e-03, 9.4746370e-03, 1.0090352e-02, 1.0746080e-02,
    1.1444421e-02, 1.2188144e-02, 1.2980198e-02, 1.3823725e-02,
    1.4722068e-02, 1.5678791e-02, 1.6697687e-02, 1.7782797e-02,
    1.8938423e-02, 2.0169149e-02, 2.1479854e-02, 2.2875735e-02,
    2.4362330e-02, 2.5945531e-02, 2.7631618e-02, 2.9427276e-02,
    3.1339626e-02, 3.3376252e-02, 3.5545228e-02, 3.7855157e-02,
    4.0315199e-02, 4.2935108e-02, 4.5725273e-02, 4.8696758e-02,
    5.1861348e-02, 5.5231591e-02, 5.8820850e-02, 6.2643361e-02,
    6.6714279e-02, 7.1049749e-02, 7.5666962e-02, 8.0584227e-02,
    8.5821044e-02, 9.1398179e-02, 9.7337747e-02, 1.0366330e-01,
    1.1039993e-01, 1.1757434e-01, 1.2521498e-01, 1.3335215e-01,
    1.4201813e-01, 1.5124727e-01, 1.6107617e-01, 1.7154380e-01,
    1.8269168e-01, 1.9456402e-01, 2.0720788e-01, 2.2067342e-01,
    2.3501402e-01, 2.5028656e-01, 2.6655159e-01, 2.8387361e-01,
    3.0232132e-01, 3.2196786e-01, 3.4289114e-01, 3.6517414e-01,
    3.8890521e-01, 4.1417847e-01, 4.4109412e-01, 4.6975890e-01,
    5.0028648e-01, 5.3279791e-01, 5.6742212e-01, 6.0429640e-01,
    6.4356699e-01, 6.8538959e-01, 7.2993007e-01, 7.7736504e-01,
    8.2788260e-01, 8.8168307e-01, 9.3897980e-01, 1.0,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_point_线性插值() {
        assert_eq!(render_point(0, 0, 10, 10, 5), 5);
        assert_eq!(render_point(0, 10, 10, 0, 5), 5);
        assert_eq!(render_point(0, 0, 4, 10, 1), 2);
        // 垂直退化段返回起点值
        assert_eq!(render_point(3, 7, 3, 100, 3), 7);
    }

    #[test]
    fn test_find_neighbors() {
        // x_list 布局: [0, 128, 64, 32, 96]
        let xs = [0u32, 128, 64, 32, 96];
        assert_eq!(find_neighbors(&xs, 2), (0, 1));
        assert_eq!(find_neighbors(&xs, 3), (0, 2));
        assert_eq!(find_neighbors(&xs, 4), (2, 1));
    }

    #[test]
    fn test_render_line_水平线() {
        let mut out = vec![0.0f32; 8];
        render_line(0, 255, 8, 255, &mut out);
        assert!(out.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_render_line_斜线不越界() {
        let mut out = vec![0.0f32; 4];
        // 终点超出缓冲区, 渲染在边界处截断
        render_line(0, 0, 100, 200, &mut out);
        assert!(out.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_反分贝表端点() {
        assert_eq!(FLOOR1_INVERSE_DB_TABLE[255], 1.0);
        assert!(FLOOR1_INVERSE_DB_TABLE[0] < 2e-7);
        // 单调递增
        assert!(
            FLOOR1_INVERSE_DB_TABLE
                .windows(2)
                .all(|w| w[0] < w[1])
        );
    }

    #[test]
    fn test_反量化_预测点不传输() {
        let cfg = Floor1Config {
            partition_classes: vec![0],
            class_dimensions: vec![1],
            class_subclasses: vec![0],
            class_masterbooks: vec![0],
            subclass_books: vec![vec![None]],
            multiplier: 1,
            x_list: vec![0, 128, 64],
            x_sort: vec![0, 2, 1],
        };
        // y[2] = 0: 中间点落在预测线上且不参与渲染
        let (final_y, step2) = dequantize_amplitude(&cfg, 256, &[10, 30, 0]);
        assert_eq!(final_y, vec![10, 30, 20]);
        assert_eq!(step2, vec![true, true, false]);
        // y[2] 非零: 偶数值向上偏移 val/2
        let (final_y, step2) = dequantize_amplitude(&cfg, 256, &[10, 30, 4]);
        assert_eq!(final_y[2], 22);
        assert!(step2[2]);
        // 奇数值向下偏移 (val+1)/2
        let (final_y, _) = dequantize_amplitude(&cfg, 256, &[10, 30, 5]);
        assert_eq!(final_y[2], 17);
    }

    #[test]
    fn test_floor1曲线_跳过未传输点() {
        let cfg = Floor1Config {
            partition_classes: vec![0],
            class_dimensions: vec![1],
            class_subclasses: vec![0],
            class_masterbooks: vec![0],
            subclass_books: vec![vec![None]],
            multiplier: 1,
            x_list: vec![0, 16, 8],
            x_sort: vec![0, 2, 1],
        };
        let curve = floor1_curve(&cfg, &[255, 255, 0], &[true, true, false], 16);
        // 未传输的中间点不打断两端点间的水平线
        assert!(curve.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_floor解码_无能量标志() {
        let cfg = Floor1Config {
            partition_classes: vec![],
            class_dimensions: vec![],
            class_subclasses: vec![],
            class_masterbooks: vec![],
            subclass_books: vec![],
            multiplier: 1,
            x_list: vec![0, 64],
            x_sort: vec![0, 1],
        };
        let data = [0u8];
        let mut br = LsbBitReader::new(&data);
        let decoded = decode_floor1(&mut br, &cfg, &[]).unwrap();
        assert!(decoded.is_unused());
    }

    #[test]
    fn test_floor解码_位流耗尽按无能量处理() {
        let cfg = FloorConfig::Type1(Floor1Config {
            partition_classes: vec![],
            class_dimensions: vec![],
            class_subclasses: vec![],
            class_masterbooks: vec![],
            subclass_books: vec![],
            multiplier: 1,
            x_list: vec![0, 64],
            x_sort: vec![0, 1],
        });
        // nonzero 标志为 1 但后续 y 值不完整
        let data = [0b0000_0001u8];
        let mut br = LsbBitReader::new(&data);
        let decoded = decode_floor(&mut br, &cfg, &[]).unwrap();
        assert!(decoded.is_unused());
    }
}
