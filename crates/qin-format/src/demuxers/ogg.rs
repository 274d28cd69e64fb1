//! Ogg 容器解封装器.
//!
//! 实现 Ogg 物理流的页同步, CRC 校验, 跨页包重组与逻辑流管理.
//! 支持 Vorbis / Opus / FLAC 三种编码的识别, 其中 Vorbis 的
//! identification 头与 comment 头会被解析为流参数与元数据.
//!
//! 损坏处理策略:
//! - CRC 校验失败的页被丢弃, 从下一个字节起重新同步
//! - 页序号不连续时丢弃未完成的跨页包, 并将该页的时间戳置为未知
//! - 没有前半部分的延续包 (孤儿) 被丢弃

use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::sync::OnceLock;

use bytes::Bytes;
use log::{debug, warn};

use qin_codec::{CodecId, Packet};
use qin_core::timestamp::NOPTS_VALUE;
use qin_core::{ChannelLayout, MediaType, QinError, QinResult, Rational, SampleFormat};

use crate::demuxer::{Demuxer, SeekFlags};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_EXTENSION, SCORE_MAX};
use crate::stream::{AudioStreamParams, Stream, StreamParams};

/// 页头魔数
const PAGE_MAGIC: &[u8; 4] = b"OggS";

/// 页头固定部分大小 (含魔数, 不含 lacing 表)
const PAGE_HEADER_SIZE: usize = 27;

/// 本页首包是上一页包的延续
const FLAG_CONTINUED: u8 = 0x01;
/// 逻辑流的第一页
const FLAG_BOS: u8 = 0x02;
/// 逻辑流的最后一页
const FLAG_EOS: u8 = 0x04;

/// 估算时长时扫描的文件尾部窗口大小
const DURATION_SCAN_WINDOW: u64 = 64 * 1024;

/// open 阶段最多处理的页数, 超过仍未收齐头包则判定为损坏
const MAX_HEADER_PAGES: u32 = 256;

// ---------------------------------------------------------------------------
// CRC
// ---------------------------------------------------------------------------

/// Ogg 使用的 CRC32 (多项式 0x04C11DB7, 无反射, 初值与终值均为 0)
fn ogg_crc32(data: &[u8]) -> u32 {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut r = (i as u32) << 24;
            for _ in 0..8 {
                r = if r & 0x8000_0000 != 0 {
                    (r << 1) ^ 0x04C1_1DB7
                } else {
                    r << 1
                };
            }
            *entry = r;
        }
        table
    });

    let mut crc = 0u32;
    for &byte in data {
        crc = (crc << 8) ^ table[((crc >> 24) as u8 ^ byte) as usize];
    }
    crc
}

// ---------------------------------------------------------------------------
// 页
// ---------------------------------------------------------------------------

/// 一个已通过 CRC 校验的 Ogg 页
#[derive(Debug, Clone)]
struct OggPage {
    flags: u8,
    /// 粒度位置, -1 表示本页没有包结束
    granule: i64,
    serial: u32,
    sequence: u32,
    /// lacing 表
    segments: Vec<u8>,
    data: Vec<u8>,
}

impl OggPage {
    fn is_continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    fn is_bos(&self) -> bool {
        self.flags & FLAG_BOS != 0
    }

    fn is_eos(&self) -> bool {
        self.flags & FLAG_EOS != 0
    }

    /// 按 lacing 表切分页数据
    ///
    /// 返回 (包数据, 是否在本页内结束) 的列表. lacing 值 255 表示
    /// 包尚未结束, 延续到下一个 lacing 值 (或下一页).
    fn extract_packets(&self) -> Vec<(Vec<u8>, bool)> {
        let mut packets = Vec::new();
        let mut acc = Vec::new();
        let mut offset = 0usize;
        for &lace in &self.segments {
            let len = lace as usize;
            acc.extend_from_slice(&self.data[offset..offset + len]);
            offset += len;
            if lace < 255 {
                packets.push((std::mem::take(&mut acc), true));
            }
        }
        if !acc.is_empty() {
            packets.push((acc, false));
        }
        packets
    }
}

/// 从 I/O 读取下一个有效页, 返回页与页起始字节偏移
///
/// 魔数不匹配时逐字节滑动重新同步; CRC 校验失败的页被丢弃.
fn read_page(io: &mut IoContext) -> QinResult<(OggPage, u64)> {
    loop {
        // 逐字节滑动窗口寻找魔数
        let mut window = [0u8; 4];
        io.read_exact(&mut window)?;
        let mut skipped = 0u64;
        while &window != PAGE_MAGIC {
            window.copy_within(1.., 0);
            window[3] = io.read_u8()?;
            skipped += 1;
        }
        if skipped > 0 {
            warn!("Ogg: 跳过 {} 字节后重新同步到页边界", skipped);
        }
        let page_start = io.position()? - 4;

        let mut header = [0u8; PAGE_HEADER_SIZE - 4];
        io.read_exact(&mut header)?;

        let version = header[0];
        let flags = header[1];
        let granule = i64::from_le_bytes([
            header[2], header[3], header[4], header[5], header[6], header[7], header[8], header[9],
        ]);
        let serial = u32::from_le_bytes([header[10], header[11], header[12], header[13]]);
        let sequence = u32::from_le_bytes([header[14], header[15], header[16], header[17]]);
        let crc = u32::from_le_bytes([header[18], header[19], header[20], header[21]]);
        let segment_count = header[22] as usize;

        let segments = io.read_bytes(segment_count)?;
        let data_len: usize = segments.iter().map(|&l| l as usize).sum();
        let data = io.read_bytes(data_len)?;

        // CRC 覆盖整个页镜像, 其中 CRC 字段按 0 计算
        let mut image = Vec::with_capacity(PAGE_HEADER_SIZE + segment_count + data_len);
        image.extend_from_slice(PAGE_MAGIC);
        image.extend_from_slice(&header);
        image[22..26].copy_from_slice(&[0, 0, 0, 0]);
        image.extend_from_slice(&segments);
        image.extend_from_slice(&data);

        if version != 0 {
            warn!("Ogg: 不支持的页版本 {}, 丢弃该页", version);
        } else if ogg_crc32(&image) != crc {
            warn!("Ogg: 页 CRC 校验失败 (序列号 {}), 丢弃该页", sequence);
        } else {
            return Ok((
                OggPage {
                    flags,
                    granule,
                    serial,
                    sequence,
                    segments,
                    data,
                },
                page_start,
            ));
        }

        // 丢弃当前候选页, 从魔数之后的字节重新开始同步
        if io.is_seekable() {
            io.seek(SeekFrom::Start(page_start + 1))?;
        }
    }
}

// ---------------------------------------------------------------------------
// 编码识别与头包解析
// ---------------------------------------------------------------------------

/// 从 BOS 页的首个包识别编码
fn identify_codec(packet: &[u8]) -> Option<CodecId> {
    if packet.len() >= 7 && &packet[0..7] == b"\x01vorbis" {
        Some(CodecId::Vorbis)
    } else if packet.len() >= 8 && &packet[0..8] == b"OpusHead" {
        Some(CodecId::Opus)
    } else if packet.len() >= 5 && packet[0] == 0x7F && &packet[1..5] == b"FLAC" {
        Some(CodecId::Flac)
    } else {
        None
    }
}

/// Vorbis identification 头中与流参数相关的字段
struct VorbisIdent {
    channels: u8,
    sample_rate: u32,
    bitrate_nominal: i32,
}

fn parse_vorbis_ident(packet: &[u8]) -> Option<VorbisIdent> {
    if packet.len() < 30 || &packet[0..7] != b"\x01vorbis" {
        return None;
    }
    let body = &packet[7..];
    let version = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    if version != 0 {
        return None;
    }
    let channels = body[4];
    let sample_rate = u32::from_le_bytes([body[5], body[6], body[7], body[8]]);
    if channels == 0 || sample_rate == 0 {
        return None;
    }
    let bitrate_nominal = i32::from_le_bytes([body[13], body[14], body[15], body[16]]);
    Some(VorbisIdent {
        channels,
        sample_rate,
        bitrate_nominal,
    })
}

/// 解析 Vorbis comment 头, 返回 (vendor, 键值对列表)
///
/// 键被统一转为大写; 没有 `=` 的条目被跳过. 数据不完整时
/// 返回已解析出的部分.
fn parse_vorbis_comments(packet: &[u8]) -> Option<(String, Vec<(String, String)>)> {
    if packet.len() < 7 || &packet[0..7] != b"\x03vorbis" {
        return None;
    }
    let body = &packet[7..];
    let mut pos = 0usize;

    let read_block = |pos: &mut usize| -> Option<Vec<u8>> {
        if body.len() < *pos + 4 {
            return None;
        }
        let len =
            u32::from_le_bytes([body[*pos], body[*pos + 1], body[*pos + 2], body[*pos + 3]])
                as usize;
        *pos += 4;
        if body.len() < *pos + len {
            return None;
        }
        let block = body[*pos..*pos + len].to_vec();
        *pos += len;
        Some(block)
    };

    let vendor = String::from_utf8_lossy(&read_block(&mut pos)?).into_owned();
    if body.len() < pos + 4 {
        return Some((vendor, Vec::new()));
    }
    let count = u32::from_le_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]]);
    pos += 4;

    let mut comments = Vec::new();
    for _ in 0..count {
        let Some(entry) = read_block(&mut pos) else {
            break;
        };
        let entry = String::from_utf8_lossy(&entry).into_owned();
        if let Some((key, value)) = entry.split_once('=') {
            comments.push((key.to_uppercase(), value.to_string()));
        }
    }
    Some((vendor, comments))
}

/// Opus 输出采样率固定为 48kHz
fn parse_opus_head(packet: &[u8]) -> Option<(u8, u32)> {
    if packet.len() < 19 || &packet[0..8] != b"OpusHead" {
        return None;
    }
    let channels = packet[9];
    if channels == 0 {
        return None;
    }
    Some((channels, 48_000))
}

/// 从 Ogg FLAC 映射的首包解析 STREAMINFO 中的采样率与声道数
///
/// 返回 (声道数, 采样率, 头包总数).
fn parse_flac_head(packet: &[u8]) -> Option<(u8, u32, u32)> {
    if packet.len() < 9 || packet[0] != 0x7F || &packet[1..5] != b"FLAC" {
        return None;
    }
    let extra_headers = u16::from_be_bytes([packet[7], packet[8]]) as u32;
    // fLaC 魔数 (4) + 块头 (4) 之后是 34 字节的 STREAMINFO
    let streaminfo = packet.get(21..55)?;
    let sample_rate = ((streaminfo[10] as u32) << 12)
        | ((streaminfo[11] as u32) << 4)
        | ((streaminfo[12] as u32) >> 4);
    let channels = ((streaminfo[12] >> 1) & 0x07) + 1;
    if sample_rate == 0 {
        return None;
    }
    Some((channels, sample_rate, 1 + extra_headers))
}

// ---------------------------------------------------------------------------
// 逻辑流
// ---------------------------------------------------------------------------

/// 一条逻辑流的重组状态
struct LogicalStream {
    serial: u32,
    codec: Option<CodecId>,
    /// 对应 `OggDemuxer::streams` 的下标, 未识别的编码为 None
    stream_index: Option<usize>,
    /// 跨页包的已收集部分
    partial: Vec<u8>,
    partial_active: bool,
    last_sequence: Option<u32>,
    /// 已收到的完整包数 (用于区分头包与音频包)
    packets_seen: u64,
    /// 该编码的头包总数
    header_packets: u64,
}

impl LogicalStream {
    fn new(serial: u32) -> Self {
        Self {
            serial,
            codec: None,
            stream_index: None,
            partial: Vec::new(),
            partial_active: false,
            last_sequence: None,
            packets_seen: 0,
            header_packets: 0,
        }
    }

    fn headers_complete(&self) -> bool {
        self.codec.is_none() || self.packets_seen >= self.header_packets
    }
}

// ---------------------------------------------------------------------------
// 解封装器
// ---------------------------------------------------------------------------

/// Ogg 解封装器
pub struct OggDemuxer {
    streams: Vec<Stream>,
    logical: HashMap<u32, LogicalStream>,
    pending: VecDeque<Packet>,
    duration_secs: Option<f64>,
}

impl OggDemuxer {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            logical: HashMap::new(),
            pending: VecDeque::new(),
            duration_secs: None,
        }
    }

    /// 处理 BOS 页, 识别编码并建立流
    fn handle_bos_page(&mut self, page: &OggPage) {
        if self.logical.contains_key(&page.serial) {
            warn!("Ogg: 序列号 {} 重复的 BOS 页, 忽略", page.serial);
            return;
        }
        let mut ls = LogicalStream::new(page.serial);

        let first_packet = page
            .extract_packets()
            .into_iter()
            .next()
            .map(|(data, _)| data)
            .unwrap_or_default();
        let codec = identify_codec(&first_packet);

        match codec {
            Some(CodecId::Vorbis) => {
                if let Some(ident) = parse_vorbis_ident(&first_packet) {
                    ls.codec = Some(CodecId::Vorbis);
                    ls.header_packets = 3;
                    ls.stream_index = Some(self.streams.len());
                    self.streams.push(Stream {
                        index: self.streams.len(),
                        media_type: MediaType::Audio,
                        codec_id: CodecId::Vorbis,
                        time_base: Rational::new(1, ident.sample_rate as i32),
                        duration: -1,
                        start_time: 0,
                        extra_data: first_packet.clone(),
                        params: StreamParams::Audio(AudioStreamParams {
                            sample_rate: ident.sample_rate,
                            channel_layout: ChannelLayout::from_channels(ident.channels as u32),
                            sample_format: SampleFormat::F32,
                            bit_rate: ident.bitrate_nominal.max(0) as u64,
                        }),
                        metadata: Vec::new(),
                    });
                    debug!(
                        "Ogg: 发现 Vorbis 流 (序列号 {}, {} 声道, {} Hz)",
                        page.serial, ident.channels, ident.sample_rate
                    );
                } else {
                    warn!("Ogg: 序列号 {} 的 Vorbis 识别头无效", page.serial);
                }
            }
            Some(CodecId::Opus) => {
                if let Some((channels, sample_rate)) = parse_opus_head(&first_packet) {
                    ls.codec = Some(CodecId::Opus);
                    ls.header_packets = 2;
                    ls.stream_index = Some(self.streams.len());
                    self.streams.push(Stream {
                        index: self.streams.len(),
                        media_type: MediaType::Audio,
                        codec_id: CodecId::Opus,
                        time_base: Rational::new(1, 48_000),
                        duration: -1,
                        start_time: 0,
                        extra_data: first_packet.clone(),
                        params: StreamParams::Audio(AudioStreamParams {
                            sample_rate,
                            channel_layout: ChannelLayout::from_channels(channels as u32),
                            sample_format: SampleFormat::F32,
                            bit_rate: 0,
                        }),
                        metadata: Vec::new(),
                    });
                    debug!("Ogg: 发现 Opus 流 (序列号 {})", page.serial);
                }
            }
            Some(CodecId::Flac) => {
                if let Some((channels, sample_rate, header_packets)) =
                    parse_flac_head(&first_packet)
                {
                    ls.codec = Some(CodecId::Flac);
                    ls.header_packets = header_packets as u64;
                    ls.stream_index = Some(self.streams.len());
                    self.streams.push(Stream {
                        index: self.streams.len(),
                        media_type: MediaType::Audio,
                        codec_id: CodecId::Flac,
                        time_base: Rational::new(1, sample_rate as i32),
                        duration: -1,
                        start_time: 0,
                        extra_data: first_packet.clone(),
                        params: StreamParams::Audio(AudioStreamParams {
                            sample_rate,
                            channel_layout: ChannelLayout::from_channels(channels as u32),
                            sample_format: SampleFormat::S16,
                            bit_rate: 0,
                        }),
                        metadata: Vec::new(),
                    });
                    debug!("Ogg: 发现 FLAC 流 (序列号 {})", page.serial);
                }
            }
            _ => {
                warn!("Ogg: 序列号 {} 的流编码无法识别, 其数据将被跳过", page.serial);
            }
        }

        self.logical.insert(page.serial, ls);
    }

    /// 处理一页, 将重组出的完整包放入待取队列
    fn process_page(&mut self, page: OggPage, page_start: u64) {
        if page.is_bos() {
            self.handle_bos_page(&page);
        }
        let Some(ls) = self.logical.get_mut(&page.serial) else {
            warn!("Ogg: 序列号 {} 的页没有对应的 BOS 页, 丢弃", page.serial);
            return;
        };

        // 页序号不连续说明中间有页丢失: 跨页包无法完成,
        // 且粒度位置不再可信
        let mut sequence_break = false;
        if let Some(last) = ls.last_sequence {
            if page.sequence != last.wrapping_add(1) {
                warn!(
                    "Ogg: 序列号 {} 的页序号从 {} 跳变到 {}",
                    page.serial, last, page.sequence
                );
                sequence_break = true;
                ls.partial.clear();
                ls.partial_active = false;
            }
        }
        ls.last_sequence = Some(page.sequence);

        if !page.is_continued() && ls.partial_active {
            warn!("Ogg: 序列号 {} 的跨页包未等到延续部分, 丢弃", page.serial);
            ls.partial.clear();
            ls.partial_active = false;
        }

        let packets = page.extract_packets();
        let page_granule = if sequence_break || page.granule < 0 {
            NOPTS_VALUE
        } else {
            page.granule
        };
        // 粒度位置属于本页最后一个结束的包
        let last_terminated = packets.iter().rposition(|(_, term)| *term);

        let mut completed: Vec<(Vec<u8>, i64)> = Vec::new();
        for (i, (data, terminated)) in packets.into_iter().enumerate() {
            let pts = if Some(i) == last_terminated {
                page_granule
            } else {
                NOPTS_VALUE
            };
            if i == 0 && page.is_continued() {
                if ls.partial_active {
                    ls.partial.extend_from_slice(&data);
                    if terminated {
                        completed.push((std::mem::take(&mut ls.partial), pts));
                        ls.partial_active = false;
                    }
                } else {
                    debug!("Ogg: 序列号 {} 的孤儿延续包被丢弃", page.serial);
                }
                continue;
            }
            if terminated {
                completed.push((data, pts));
            } else {
                ls.partial = data;
                ls.partial_active = true;
            }
        }

        let stream_index = ls.stream_index;
        let codec = ls.codec;
        for (data, mut pts) in completed {
            ls.packets_seen += 1;
            // 头包不携带采样位置, 即使头页的粒度字段写了 0 也不作为 pts
            if ls.packets_seen <= ls.header_packets {
                pts = NOPTS_VALUE;
            }
            // Vorbis 的第二个头包是 comment 头, 解析为流元数据
            if codec == Some(CodecId::Vorbis) && ls.packets_seen == 2 {
                if let Some(index) = stream_index {
                    if let Some((vendor, comments)) = parse_vorbis_comments(&data) {
                        debug!("Ogg: Vorbis vendor: {}", vendor);
                        self.streams[index].metadata = comments;
                    }
                }
            }
            let Some(index) = stream_index else {
                continue;
            };
            self.pending.push_back(Packet {
                data: Bytes::from(data),
                pts,
                dts: pts,
                duration: 0,
                time_base: self.streams[index].time_base,
                stream_index: index,
                is_keyframe: true,
                is_flush: false,
                pos: page_start as i64,
            });
        }

        if page.is_eos() {
            debug!("Ogg: 序列号 {} 的逻辑流结束", page.serial);
        }
    }

    /// 是否所有已识别的逻辑流都收齐了头包
    fn headers_complete(&self) -> bool {
        !self.streams.is_empty() && self.logical.values().all(|ls| ls.headers_complete())
    }

    /// 清空重组状态与待取队列 (seek 之后调用)
    fn reset_runtime_state(&mut self) {
        self.pending.clear();
        for ls in self.logical.values_mut() {
            ls.partial.clear();
            ls.partial_active = false;
            ls.last_sequence = None;
        }
    }

    /// 扫描文件尾部, 用最大粒度位置估算时长
    fn estimate_duration(&mut self, io: &mut IoContext) -> QinResult<()> {
        let Some(size) = io.size() else {
            return Ok(());
        };
        let restore = io.position()?;
        io.seek(SeekFrom::Start(size.saturating_sub(DURATION_SCAN_WINDOW)))?;

        let mut last_granules: HashMap<u32, i64> = HashMap::new();
        loop {
            match read_page(io) {
                Ok((page, _)) => {
                    if page.granule >= 0 {
                        last_granules.insert(page.serial, page.granule);
                    }
                }
                Err(QinError::Eof) => break,
                Err(e) => {
                    debug!("Ogg: 时长扫描提前结束: {}", e);
                    break;
                }
            }
        }
        io.seek(SeekFrom::Start(restore))?;

        let mut max_secs: Option<f64> = None;
        for (serial, granule) in last_granules {
            let Some(ls) = self.logical.get(&serial) else {
                continue;
            };
            let Some(index) = ls.stream_index else {
                continue;
            };
            let stream = &mut self.streams[index];
            stream.duration = granule;
            let secs = granule as f64 * stream.time_base.to_f64();
            max_secs = Some(max_secs.map_or(secs, |m: f64| m.max(secs)));
        }
        self.duration_secs = max_secs;
        Ok(())
    }
}

impl Default for OggDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for OggDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Ogg
    }

    fn name(&self) -> &str {
        "ogg"
    }

    fn open(&mut self, io: &mut IoContext) -> QinResult<()> {
        let mut pages = 0u32;
        while !self.headers_complete() {
            if pages >= MAX_HEADER_PAGES {
                return Err(QinError::Format(
                    "Ogg: 未能在文件开头找到完整的流头部".to_string(),
                ));
            }
            let (page, page_start) = match read_page(io) {
                Ok(r) => r,
                Err(QinError::Eof) => {
                    return Err(QinError::Format("Ogg: 文件过早结束".to_string()));
                }
                Err(e) => return Err(e),
            };
            self.process_page(page, page_start);
            pages += 1;
        }

        if io.is_seekable() {
            self.estimate_duration(io)?;
        }
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> QinResult<Packet> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(packet);
            }
            let (page, page_start) = read_page(io)?;
            self.process_page(page, page_start);
        }
    }

    fn seek(
        &mut self,
        io: &mut IoContext,
        stream_index: usize,
        timestamp: i64,
        flags: SeekFlags,
    ) -> QinResult<()> {
        if !io.is_seekable() {
            return Err(QinError::Unsupported("Ogg: 数据源不支持 seek".to_string()));
        }
        if flags.byte {
            let target = timestamp.max(0) as u64;
            io.seek(SeekFrom::Start(target))?;
            self.reset_runtime_state();
            return Ok(());
        }

        let serial = self
            .logical
            .values()
            .find(|ls| ls.stream_index == Some(stream_index))
            .map(|ls| ls.serial)
            .ok_or(QinError::StreamNotFound(stream_index))?;

        // 头部页的粒度位置为 0, 不作为定位目标
        let min_granule = 1i64;
        let target = timestamp.max(min_granule);

        io.seek(SeekFrom::Start(0))?;
        let mut best_before: Option<u64> = None;
        let mut first_after: Option<u64> = None;
        loop {
            match read_page(io) {
                Ok((page, page_start)) => {
                    if page.serial != serial || page.granule < min_granule {
                        continue;
                    }
                    if page.granule <= target {
                        best_before = Some(page_start);
                    } else {
                        first_after = Some(page_start);
                        break;
                    }
                }
                Err(QinError::Eof) => break,
                Err(e) => return Err(e),
            }
        }

        let destination = if flags.backward {
            best_before.or(first_after)
        } else {
            first_after.or(best_before)
        };
        let destination = destination.unwrap_or(0);
        debug!("Ogg: seek 到字节偏移 {} (目标粒度 {})", destination, target);

        io.seek(SeekFrom::Start(destination))?;
        self.reset_runtime_state();
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.duration_secs
    }
}

// ---------------------------------------------------------------------------
// 探测
// ---------------------------------------------------------------------------

/// Ogg 格式探测器
pub struct OggProbe;

impl FormatProbe for OggProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if data.len() >= 4 && &data[0..4] == PAGE_MAGIC {
            return Some(SCORE_MAX);
        }
        // 部分文件在 Ogg 数据前带有 ID3 标签
        if data.len() >= 3
            && &data[0..3] == b"ID3"
            && data.windows(4).any(|w| w == PAGE_MAGIC)
        {
            return Some(SCORE_MAX / 2);
        }
        if let Some(name) = filename {
            if FormatId::from_filename(name) == Some(FormatId::Ogg) {
                return Some(SCORE_EXTENSION);
            }
        }
        None
    }

    fn format_id(&self) -> FormatId {
        FormatId::Ogg
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造一个带有效 CRC 的 Ogg 页
    fn build_ogg_page(
        serial: u32,
        sequence: u32,
        granule: i64,
        flags: u8,
        packets: &[&[u8]],
    ) -> Vec<u8> {
        let mut segments = Vec::new();
        let mut data = Vec::new();
        for packet in packets {
            let mut remaining = packet.len();
            loop {
                let lace = remaining.min(255);
                segments.push(lace as u8);
                remaining -= lace;
                if lace < 255 {
                    break;
                }
            }
            data.extend_from_slice(packet);
        }

        let mut page = Vec::new();
        page.extend_from_slice(PAGE_MAGIC);
        page.push(0); // 版本
        page.push(flags);
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&serial.to_le_bytes());
        page.extend_from_slice(&sequence.to_le_bytes());
        page.extend_from_slice(&[0, 0, 0, 0]); // CRC 占位
        page.push(segments.len() as u8);
        page.extend_from_slice(&segments);
        page.extend_from_slice(&data);

        let crc = ogg_crc32(&page);
        page[22..26].copy_from_slice(&crc.to_le_bytes());
        page
    }

    /// 构造一个未终结的延续页: 单个 lacing 值 255
    fn build_continuation_page(serial: u32, sequence: u32, flags: u8) -> Vec<u8> {
        let payload = [0xABu8; 255];
        let mut page = Vec::new();
        page.extend_from_slice(PAGE_MAGIC);
        page.push(0);
        page.push(flags);
        page.extend_from_slice(&(-1i64).to_le_bytes());
        page.extend_from_slice(&serial.to_le_bytes());
        page.extend_from_slice(&sequence.to_le_bytes());
        page.extend_from_slice(&[0, 0, 0, 0]);
        page.push(1);
        page.push(255);
        page.extend_from_slice(&payload);
        let crc = ogg_crc32(&page);
        page[22..26].copy_from_slice(&crc.to_le_bytes());
        page
    }

    /// 最小的 Vorbis identification 头包 (2 声道 44100 Hz)
    fn vorbis_ident_packet() -> Vec<u8> {
        let mut p = b"\x01vorbis".to_vec();
        p.extend_from_slice(&0u32.to_le_bytes()); // 版本
        p.push(2); // 声道
        p.extend_from_slice(&44_100u32.to_le_bytes());
        p.extend_from_slice(&0i32.to_le_bytes()); // 最大码率
        p.extend_from_slice(&128_000i32.to_le_bytes()); // 标称码率
        p.extend_from_slice(&0i32.to_le_bytes()); // 最小码率
        p.push((11 << 4) | 8); // 块大小 256 / 2048
        p.push(1); // framing
        p
    }

    fn vorbis_comment_packet() -> Vec<u8> {
        let mut p = b"\x03vorbis".to_vec();
        let vendor = b"qin";
        p.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        p.extend_from_slice(vendor);
        p.extend_from_slice(&1u32.to_le_bytes());
        let entry = "TITLE=\u{6d41}\u{6c34}"; // TITLE=流水
        p.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        p.extend_from_slice(entry.as_bytes());
        p.push(1); // framing
        p
    }

    /// 组装一个完整的 Vorbis 逻辑流: 三个头包 + 若干音频页
    fn build_vorbis_stream(serial: u32, audio_pages: &[(i64, &[&[u8]])]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(build_ogg_page(
            serial,
            0,
            0,
            FLAG_BOS,
            &[&vorbis_ident_packet()],
        ));
        data.extend(build_ogg_page(
            serial,
            1,
            0,
            0,
            &[&vorbis_comment_packet(), b"\x05vorbis-setup-placeholder"],
        ));
        for (i, (granule, packets)) in audio_pages.iter().enumerate() {
            let flags = if i + 1 == audio_pages.len() {
                FLAG_EOS
            } else {
                0
            };
            data.extend(build_ogg_page(serial, 2 + i as u32, *granule, flags, packets));
        }
        data
    }

    #[test]
    fn test_页构造与读取往返() {
        let raw = build_ogg_page(7, 3, 1024, 0, &[b"hello", b"world"]);
        let mut io = IoContext::from_data(raw);
        let (page, start) = read_page(&mut io).unwrap();
        assert_eq!(start, 0);
        assert_eq!(page.serial, 7);
        assert_eq!(page.sequence, 3);
        assert_eq!(page.granule, 1024);
        let packets = page.extract_packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], (b"hello".to_vec(), true));
        assert_eq!(packets[1], (b"world".to_vec(), true));
    }

    #[test]
    fn test_跨页lacing() {
        // 510 字节的包占用两个 lacing 值 255 + 一个 0
        let big = vec![0x42u8; 510];
        let raw = build_ogg_page(1, 0, 0, 0, &[&big]);
        let mut io = IoContext::from_data(raw);
        let (page, _) = read_page(&mut io).unwrap();
        assert_eq!(page.segments, vec![255, 255, 0]);
        let packets = page.extract_packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].0.len(), 510);
        assert!(packets[0].1);
    }

    #[test]
    fn test_crc损坏的页被跳过() {
        let mut raw = build_ogg_page(1, 0, 0, 0, &[b"bad"]);
        raw[30] ^= 0xFF; // 破坏页数据
        raw.extend(build_ogg_page(1, 1, 0, 0, &[b"good"]));
        let mut io = IoContext::from_data(raw);
        let (page, _) = read_page(&mut io).unwrap();
        assert_eq!(page.sequence, 1);
        assert_eq!(page.extract_packets()[0].0, b"good");
    }

    #[test]
    fn test_垃圾前缀后重新同步() {
        let mut raw = b"garbage-bytes".to_vec();
        raw.extend(build_ogg_page(1, 0, 0, 0, &[b"data"]));
        let mut io = IoContext::from_data(raw);
        let (page, start) = read_page(&mut io).unwrap();
        assert_eq!(start, 13);
        assert_eq!(page.extract_packets()[0].0, b"data");
    }

    #[test]
    fn test_打开vorbis流() {
        let raw = build_vorbis_stream(42, &[(128, &[b"\x00audio-1"]), (256, &[b"\x00audio-2"])]);
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();

        assert_eq!(demuxer.streams().len(), 1);
        let stream = &demuxer.streams()[0];
        assert_eq!(stream.codec_id, CodecId::Vorbis);
        assert_eq!(stream.time_base, Rational::new(1, 44_100));
        assert!(!stream.extra_data.is_empty());
        let StreamParams::Audio(params) = &stream.params else {
            panic!("应为音频流参数");
        };
        assert_eq!(params.sample_rate, 44_100);
        assert_eq!(params.channel_layout, ChannelLayout::STEREO);
        assert_eq!(params.bit_rate, 128_000);
    }

    #[test]
    fn test_comment头解析为元数据() {
        let raw = build_vorbis_stream(42, &[(128, &[b"\x00audio"])]);
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();
        let metadata = &demuxer.streams()[0].metadata;
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].0, "TITLE");
        assert_eq!(metadata[0].1, "\u{6d41}\u{6c34}");
    }

    #[test]
    fn test_包顺序与时间戳() {
        let raw = build_vorbis_stream(42, &[(128, &[b"\x00a1", b"\x00a2"]), (256, &[b"\x00a3"])]);
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();

        // 三个头包在前, 时间戳未知
        for expected in [b"\x01".as_slice(), b"\x03".as_slice(), b"\x05".as_slice()] {
            let packet = demuxer.read_packet(&mut io).unwrap();
            assert_eq!(&packet.data[0..1], expected);
            assert_eq!(packet.pts, NOPTS_VALUE);
        }
        // 粒度位置属于页内最后一个结束的包
        let a1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(a1.data.as_ref(), b"\x00a1");
        assert_eq!(a1.pts, NOPTS_VALUE);
        let a2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(a2.pts, 128);
        let a3 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(a3.pts, 256);
        assert!(matches!(
            demuxer.read_packet(&mut io),
            Err(QinError::Eof)
        ));
    }

    #[test]
    fn test_零长度包被保留() {
        let raw = build_vorbis_stream(42, &[(128, &[b"\x00a1", b"", b"\x00a2"])]);
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();
        for _ in 0..3 {
            demuxer.read_packet(&mut io).unwrap(); // 头包
        }
        let a1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(a1.data.as_ref(), b"\x00a1");
        // 零长度包是合法码流内容, 原样交给解码器而不是冲刷标记
        let empty = demuxer.read_packet(&mut io).unwrap();
        assert!(empty.is_empty());
        assert!(!empty.is_flush);
        let a2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(a2.data.as_ref(), b"\x00a2");
        assert_eq!(a2.pts, 128);
    }

    #[test]
    fn test_时长估算() {
        let raw = build_vorbis_stream(42, &[(22_050, &[b"\x00a"]), (44_100, &[b"\x00b"])]);
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();
        assert_eq!(demuxer.streams()[0].duration, 44_100);
        let secs = demuxer.duration().unwrap();
        assert!((secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_孤儿延续包被丢弃() {
        let mut raw = build_vorbis_stream(42, &[(128, &[b"\x00first"])]);
        // 一个声称延续前包的页, 但之前没有未完成的包
        raw.extend(build_ogg_page(
            42,
            3,
            256,
            FLAG_CONTINUED,
            &[b"orphan-tail", b"\x00second"],
        ));
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();

        let mut payloads = Vec::new();
        while let Ok(packet) = demuxer.read_packet(&mut io) {
            payloads.push(packet.data.to_vec());
        }
        assert!(payloads.contains(&b"\x00first".to_vec()));
        assert!(payloads.contains(&b"\x00second".to_vec()));
        assert!(!payloads.contains(&b"orphan-tail".to_vec()));
    }

    #[test]
    fn test_跨页包重组() {
        let mut raw = build_vorbis_stream(42, &[(128, &[b"\x00a"])]);
        // 510 字节的包: 前 255 字节在第一页, 其余在延续页
        let big: Vec<u8> = (0..510u32).map(|i| (i % 251) as u8).collect();
        raw.extend(build_continuation_page(42, 3, 0));
        raw.extend(build_ogg_page(42, 4, 256, FLAG_CONTINUED, &[&big[255..]]));
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();

        let mut last = None;
        while let Ok(packet) = demuxer.read_packet(&mut io) {
            last = Some(packet);
        }
        let last = last.unwrap();
        assert_eq!(last.data.len(), 255 + 255);
        assert_eq!(&last.data[..255], &[0xAB; 255]);
        assert_eq!(last.pts, 256);
    }

    #[test]
    fn test_页序号跳变丢弃跨页包() {
        let mut raw = build_vorbis_stream(42, &[(128, &[b"\x00a"])]);
        raw.extend(build_continuation_page(42, 3, 0));
        // 序号从 3 跳到 7: 延续部分丢失, 未完成的包必须丢弃
        raw.extend(build_ogg_page(42, 7, 512, 0, &[b"\x00after-gap"]));
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();

        let mut packets = Vec::new();
        while let Ok(packet) = demuxer.read_packet(&mut io) {
            packets.push(packet);
        }
        let last = packets.last().unwrap();
        assert_eq!(last.data.as_ref(), b"\x00after-gap");
        // 跳变页的粒度位置不可信
        assert_eq!(last.pts, NOPTS_VALUE);
    }

    #[test]
    fn test_seek定位到目标之前的页() {
        let raw = build_vorbis_stream(
            42,
            &[
                (1_000, &[b"\x00a"]),
                (2_000, &[b"\x00b"]),
                (3_000, &[b"\x00c"]),
            ],
        );
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();

        demuxer
            .seek(&mut io, 0, 2_500, SeekFlags::default())
            .unwrap();
        let packet = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(packet.data.as_ref(), b"\x00b");
        assert_eq!(packet.pts, 2_000);
    }

    #[test]
    fn test_未识别编码的流被跳过() {
        let mut raw = build_ogg_page(9, 0, 0, FLAG_BOS, &[b"mystery-codec"]);
        raw.extend(build_vorbis_stream(42, &[(128, &[b"\x00a"])]));
        raw.extend(build_ogg_page(9, 1, 100, 0, &[b"mystery-data"]));
        let mut io = IoContext::from_data(raw);
        let mut demuxer = OggDemuxer::new();
        demuxer.open(&mut io).unwrap();

        assert_eq!(demuxer.streams().len(), 1);
        while let Ok(packet) = demuxer.read_packet(&mut io) {
            assert_eq!(packet.stream_index, 0);
        }
    }

    #[test]
    fn test_探测() {
        let probe = OggProbe;
        let page = build_ogg_page(1, 0, 0, FLAG_BOS, &[b"x"]);
        assert_eq!(probe.probe(&page, None), Some(SCORE_MAX));

        let mut with_id3 = b"ID3\x04\x00\x00\x00\x00\x00\x0a".to_vec();
        with_id3.extend_from_slice(&page);
        assert_eq!(probe.probe(&with_id3, None), Some(SCORE_MAX / 2));

        assert_eq!(probe.probe(b"RIFF", None), None);
        assert_eq!(probe.probe(b"", Some("music.ogg")), Some(SCORE_EXTENSION));
    }

    #[test]
    fn test_通过注册表打开() {
        let mut registry = crate::FormatRegistry::new();
        crate::register_all(&mut registry);
        let raw = build_vorbis_stream(42, &[(128, &[b"\x00a"])]);
        let mut io = IoContext::from_data(raw);
        let demuxer = registry.open_input(&mut io, Some("test.ogg")).unwrap();
        assert_eq!(demuxer.format_id(), FormatId::Ogg);
        assert_eq!(demuxer.streams().len(), 1);
    }
}
