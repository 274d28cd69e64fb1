//! Vorbis 音频解码器.
//!
//! 按 send_packet 顺序接收三个头包 (识别头/注释头/setup 头),
//! 随后进入音频包阶段. 音频包的解码链路:
//! mode → floor → residue → 声道耦合逆变换 → floor 曲线点乘
//! → 逆 MDCT → 重叠相加.
//!
//! 音频包阶段的错误不会中断解码: 损坏的包被替换为一个静音短块,
//! 并经过正常的重叠相加路径, 保持与相邻块的平滑衔接.

mod bitreader;
mod codebook;
mod error;
mod floor;
mod headers;
mod imdct;
mod residue;
mod setup;
mod synthesis;
mod window;

pub use error::VorbisError;

use std::collections::VecDeque;

use log::{debug, warn};

use qin_core::{QinError, QinResult, Rational};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::Frame;
use crate::packet::Packet;

use bitreader::{LsbBitReader, ilog};
use error::VorbisResult;
use floor::{FloorData, decode_floor, synthesize_curve};
use headers::{CommentHeader, IdentHeader, parse_comment_header, parse_ident_header};
use imdct::imdct;
use residue::{apply_coupling_inverse, decode_residue};
use setup::SetupHeader;
use window::OverlapAdder;

/// 头包接收阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderStage {
    Ident,
    Comment,
    Setup,
    Audio,
}

/// Vorbis 解码器
pub struct VorbisDecoder {
    stage: HeaderStage,
    ident: Option<IdentHeader>,
    comment: CommentHeader,
    setup: Option<SetupHeader>,
    lap: Option<OverlapAdder>,
    queue: VecDeque<Frame>,
    /// 当前包已解析出的窗几何 (blockflag, prev_flag, next_flag),
    /// 供包头可读但后续解码失败时的静音恢复使用
    header_geometry: Option<(bool, bool, bool)>,
    /// 上一个送入重叠相加的块的 (blockflag, next_flag)
    last_block: Option<(bool, bool)>,
    /// 下一帧的 pts (以采样数为单位累计)
    next_pts: i64,
    time_base: Rational,
    flushed: bool,
}

impl VorbisDecoder {
    pub fn new() -> Self {
        Self {
            stage: HeaderStage::Ident,
            ident: None,
            comment: CommentHeader::default(),
            setup: None,
            lap: None,
            queue: VecDeque::new(),
            header_geometry: None,
            last_block: None,
            next_pts: 0,
            time_base: Rational::UNDEFINED,
            flushed: false,
        }
    }

    /// 注册表使用的工厂函数
    pub fn create() -> QinResult<Box<dyn Decoder>> {
        Ok(Box::new(Self::new()))
    }

    /// 注释头中的 vendor 字符串 (注释头尚未送入时为空)
    pub fn vendor(&self) -> &str {
        &self.comment.vendor
    }

    /// 注释头中的 `KEY=value` 对, 键已统一为大写
    pub fn comments(&self) -> &[(String, String)] {
        &self.comment.comments
    }

    fn apply_ident(&mut self, ident: IdentHeader) {
        debug!(
            "Vorbis 识别头: {} 声道, {} Hz, 块大小 {}/{}",
            ident.channels,
            ident.sample_rate,
            ident.blocksize_0(),
            ident.blocksize_1()
        );
        self.time_base = Rational::new(1, ident.sample_rate as i32);
        self.ident = Some(ident);
        self.stage = HeaderStage::Comment;
    }

    fn ident(&self) -> QinResult<&IdentHeader> {
        self.ident
            .as_ref()
            .ok_or_else(|| QinError::Internal("Vorbis 识别头尚未解析".into()))
    }

    fn decode_audio(&mut self, data: &[u8]) -> QinResult<()> {
        self.header_geometry = None;
        let emitted = match self.try_decode_block(data) {
            Ok(channels) => channels,
            Err(e) => {
                warn!("Vorbis 音频包解码失败, 以静音块恢复: {e}");
                self.silent_block()?
            }
        };
        self.emit(emitted)
    }

    /// 解码一个音频包, 返回经过重叠相加后实际输出的样本
    fn try_decode_block(&mut self, data: &[u8]) -> VorbisResult<Vec<Vec<f32>>> {
        let ident = self
            .ident
            .as_ref()
            .ok_or_else(|| VorbisError::UnsupportedMode("缺少识别头".into()))?;
        let setup = self
            .setup
            .as_ref()
            .ok_or_else(|| VorbisError::UnsupportedMode("缺少 setup 头".into()))?;
        let lap = self
            .lap
            .as_mut()
            .ok_or_else(|| VorbisError::UnsupportedMode("缺少重叠状态".into()))?;

        let mut br = LsbBitReader::new(data);
        if br.read_flag()? {
            return Err(VorbisError::UnsupportedMode("包类型位非音频".into()));
        }
        let mode_bits = ilog((setup.modes.len() - 1) as u32);
        let mode_idx = br.read_bits(mode_bits)? as usize;
        let mode = setup
            .modes
            .get(mode_idx)
            .ok_or_else(|| VorbisError::UnsupportedMode(format!("mode {mode_idx} 越界")))?;
        let mapping = &setup.mappings[usize::from(mode.mapping)];
        let blockflag = mode.blockflag;
        let (prev_flag, next_flag) = if blockflag {
            (br.read_flag()?, br.read_flag()?)
        } else {
            (false, false)
        };
        self.header_geometry = Some((blockflag, prev_flag, next_flag));

        let n = if blockflag {
            ident.blocksize_1()
        } else {
            ident.blocksize_0()
        };
        let n2 = n / 2;
        let ch = usize::from(ident.channels);

        let mut floor_data = Vec::with_capacity(ch);
        for c in 0..ch {
            let submap = usize::from(mapping.mux[c]);
            let floor_idx = usize::from(mapping.submap_floors[submap]);
            floor_data.push(decode_floor(
                &mut br,
                &setup.floors[floor_idx],
                &setup.codebooks,
            )?);
        }

        // 耦合对中只要有一个声道有能量, 两个声道都要解 residue
        let mut no_residue: Vec<bool> = floor_data.iter().map(FloorData::is_unused).collect();
        for &(m, a) in &mapping.couplings {
            let (m, a) = (usize::from(m), usize::from(a));
            if !(no_residue[m] && no_residue[a]) {
                no_residue[m] = false;
                no_residue[a] = false;
            }
        }

        let mut channels: Vec<Vec<f32>> = vec![Vec::new(); ch];
        for submap in 0..mapping.submap_floors.len() {
            let members: Vec<usize> = (0..ch)
                .filter(|&c| usize::from(mapping.mux[c]) == submap)
                .collect();
            let dnd: Vec<bool> = members.iter().map(|&c| no_residue[c]).collect();
            let res_idx = usize::from(mapping.submap_residues[submap]);
            let decoded = decode_residue(
                &mut br,
                &setup.residues[res_idx],
                &setup.codebooks,
                n2,
                &dnd,
            )?;
            for (chan, &c) in decoded.into_iter().zip(&members) {
                channels[c] = chan;
            }
        }

        apply_coupling_inverse(&mut channels, &mapping.couplings);

        // floor 曲线点乘必须在耦合逆变换之后
        for (c, chan) in channels.iter_mut().enumerate() {
            let submap = usize::from(mapping.mux[c]);
            let floor_idx = usize::from(mapping.submap_floors[submap]);
            let curve = synthesize_curve(&floor_data[c], &setup.floors[floor_idx], blockflag, n2);
            for (v, f) in chan.iter_mut().zip(&curve) {
                *v *= f;
            }
        }

        let mut time_domain = Vec::with_capacity(ch);
        for chan in &channels {
            let mut out = Vec::new();
            imdct(chan, &mut out);
            time_domain.push(out);
        }

        let out = lap.process(time_domain, blockflag, prev_flag, next_flag)?;
        self.last_block = Some((blockflag, next_flag));
        Ok(out)
    }

    /// 构造一个静音块并走正常的重叠相加路径.
    ///
    /// 块几何优先取损坏包中已解析出的包头; 包头本身不可读时沿用
    /// 上一块的声明 (长块的 next_flag 指明了本块的大小), 否则退回
    /// 短块. 这样单个损坏包既不中断解码, 也不破坏采样数的连续性.
    fn silent_block(&mut self) -> QinResult<Vec<Vec<f32>>> {
        let (blockflag, prev_flag, next_flag) = match (self.header_geometry, self.last_block) {
            (Some(geometry), _) => geometry,
            (None, Some((true, true))) => (true, true, true),
            _ => (false, false, false),
        };
        let ident = self
            .ident
            .as_ref()
            .ok_or_else(|| QinError::Internal("Vorbis 识别头尚未解析".into()))?;
        let n = if blockflag {
            ident.blocksize_1()
        } else {
            ident.blocksize_0()
        };
        let ch = usize::from(ident.channels);
        let lap = self
            .lap
            .as_mut()
            .ok_or_else(|| QinError::Internal("Vorbis 重叠状态尚未建立".into()))?;
        let out = lap.process(vec![vec![0.0; n]; ch], blockflag, prev_flag, next_flag)?;
        self.last_block = Some((blockflag, next_flag));
        Ok(out)
    }

    fn emit(&mut self, channels: Vec<Vec<f32>>) -> QinResult<()> {
        let nb = channels.first().map_or(0, |c| c.len());
        if nb == 0 {
            return Ok(());
        }
        let sample_rate = self.ident()?.sample_rate;
        let frame = synthesis::build_frame(&channels, sample_rate, self.next_pts, self.time_base);
        self.next_pts += nb as i64;
        self.queue.push_back(Frame::Audio(frame));
        Ok(())
    }
}

impl Default for VorbisDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for VorbisDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Vorbis
    }

    fn name(&self) -> &str {
        "vorbis"
    }

    /// 容器提供的 extra_data (识别头包) 在此先行解析,
    /// 之后码流内再次出现的识别头包会被跳过
    fn open(&mut self, params: &CodecParameters) -> QinResult<()> {
        if self.stage == HeaderStage::Ident && !params.extra_data.is_empty() {
            self.apply_ident(parse_ident_header(&params.extra_data)?);
        }
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> QinResult<()> {
        if packet.is_flush {
            self.flushed = true;
            return Ok(());
        }
        let data = packet.data.as_ref();
        match self.stage {
            HeaderStage::Ident => {
                self.apply_ident(parse_ident_header(data)?);
            }
            HeaderStage::Comment => {
                // 识别头已通过 extra_data 解析时, 码流内的识别头包是重复的
                if self.ident.is_some()
                    && headers::verify_header_packet(data, headers::HEADER_IDENT).is_ok()
                {
                    debug!("Vorbis 识别头已由 extra_data 提供, 跳过码流内的重复包");
                    return Ok(());
                }
                self.comment = parse_comment_header(data)?;
                debug!(
                    "Vorbis 注释头: vendor={}, {} 条注释",
                    self.comment.vendor,
                    self.comment.comments.len()
                );
                self.stage = HeaderStage::Setup;
            }
            HeaderStage::Setup => {
                let ident = self.ident()?;
                let setup = SetupHeader::parse(data, ident)?;
                self.lap = Some(OverlapAdder::new(
                    ident.blocksize_0(),
                    ident.blocksize_1(),
                ));
                self.setup = Some(setup);
                self.stage = HeaderStage::Audio;
            }
            HeaderStage::Audio => {
                self.decode_audio(data)?;
            }
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> QinResult<Frame> {
        if let Some(frame) = self.queue.pop_front() {
            return Ok(frame);
        }
        if self.flushed {
            Err(QinError::Eof)
        } else {
            Err(QinError::NeedMoreData)
        }
    }

    fn flush(&mut self) {
        self.queue.clear();
        if let Some(lap) = &mut self.lap {
            lap.reset();
        }
        // seek 之后由新的包序列重新累计
        self.header_geometry = None;
        self.last_block = None;
        self.next_pts = 0;
        self.flushed = false;
    }
}
