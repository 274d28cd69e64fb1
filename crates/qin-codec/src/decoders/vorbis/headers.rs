//! 识别头与注释头解析.
//!
//! 三个头包各以 1 字节类型 + "vorbis" 签名开头:
//! 0x01 识别头, 0x03 注释头, 0x05 setup 头.

use super::error::{VorbisError, VorbisResult};

/// 头包类型字节
pub(crate) const HEADER_IDENT: u8 = 0x01;
pub(crate) const HEADER_COMMENT: u8 = 0x03;
pub(crate) const HEADER_SETUP: u8 = 0x05;

const VORBIS_SIGNATURE: &[u8; 6] = b"vorbis";

/// 识别头内容
#[derive(Debug, Clone)]
pub(crate) struct IdentHeader {
    pub(crate) channels: u8,
    pub(crate) sample_rate: u32,
    pub(crate) bitrate_maximum: i32,
    pub(crate) bitrate_nominal: i32,
    pub(crate) bitrate_minimum: i32,
    /// 短块大小的以 2 为底的指数 (6..=13)
    pub(crate) blocksize_0_exp: u8,
    /// 长块大小的以 2 为底的指数 (6..=13, ≥ blocksize_0_exp)
    pub(crate) blocksize_1_exp: u8,
}

impl IdentHeader {
    /// 短块样本数
    pub(crate) fn blocksize_0(&self) -> usize {
        1usize << self.blocksize_0_exp
    }

    /// 长块样本数
    pub(crate) fn blocksize_1(&self) -> usize {
        1usize << self.blocksize_1_exp
    }
}

/// 注释头内容: vendor 字符串与 `KEY=value` 对
#[derive(Debug, Clone, Default)]
pub(crate) struct CommentHeader {
    pub(crate) vendor: String,
    pub(crate) comments: Vec<(String, String)>,
}

/// 校验包的头类型字节与 "vorbis" 签名, 返回签名之后的负载
pub(crate) fn verify_header_packet(packet: &[u8], header_type: u8) -> VorbisResult<&[u8]> {
    if packet.len() < 7 {
        return Err(VorbisError::TruncatedStream);
    }
    if packet[0] != header_type {
        return Err(VorbisError::UnsupportedMode(format!(
            "头类型错误: 期望 0x{header_type:02X}, 实际 0x{:02X}",
            packet[0]
        )));
    }
    if &packet[1..7] != VORBIS_SIGNATURE {
        return Err(VorbisError::UnsupportedMode("vorbis 签名缺失".into()));
    }
    Ok(&packet[7..])
}

/// 解析识别头 (第一个头包)
pub(crate) fn parse_ident_header(packet: &[u8]) -> VorbisResult<IdentHeader> {
    let body = verify_header_packet(packet, HEADER_IDENT)?;
    if body.len() < 23 {
        return Err(VorbisError::TruncatedStream);
    }

    let version = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    if version != 0 {
        return Err(VorbisError::UnsupportedMode(format!(
            "不支持的 vorbis 版本: {version}"
        )));
    }

    let channels = body[4];
    let sample_rate = u32::from_le_bytes([body[5], body[6], body[7], body[8]]);
    if channels == 0 {
        return Err(VorbisError::UnsupportedMode("声道数为 0".into()));
    }
    if sample_rate == 0 {
        return Err(VorbisError::UnsupportedMode("采样率为 0".into()));
    }

    let bitrate_maximum = i32::from_le_bytes([body[9], body[10], body[11], body[12]]);
    let bitrate_nominal = i32::from_le_bytes([body[13], body[14], body[15], body[16]]);
    let bitrate_minimum = i32::from_le_bytes([body[17], body[18], body[19], body[20]]);

    let blocksizes = body[21];
    let blocksize_0_exp = blocksizes & 0x0F;
    let blocksize_1_exp = blocksizes >> 4;
    if !(6..=13).contains(&blocksize_0_exp)
        || !(6..=13).contains(&blocksize_1_exp)
        || blocksize_0_exp > blocksize_1_exp
    {
        return Err(VorbisError::UnsupportedMode(format!(
            "块大小非法: 2^{blocksize_0_exp} / 2^{blocksize_1_exp}"
        )));
    }

    if body[22] & 1 != 1 {
        return Err(VorbisError::UnsupportedMode("识别头 framing 位缺失".into()));
    }

    Ok(IdentHeader {
        channels,
        sample_rate,
        bitrate_maximum,
        bitrate_nominal,
        bitrate_minimum,
        blocksize_0_exp,
        blocksize_1_exp,
    })
}

/// 解析注释头 (第二个头包)
pub(crate) fn parse_comment_header(packet: &[u8]) -> VorbisResult<CommentHeader> {
    let body = verify_header_packet(packet, HEADER_COMMENT)?;
    let mut pos = 0usize;

    let vendor_bytes = read_length_prefixed(body, &mut pos)?;
    let vendor = String::from_utf8_lossy(vendor_bytes).into_owned();

    let count = read_u32(body, &mut pos)? as usize;
    let mut comments = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let raw = read_length_prefixed(body, &mut pos)?;
        let text = String::from_utf8_lossy(raw);
        // 没有 '=' 的条目不符合规范, 跳过而不是报错
        if let Some((key, value)) = text.split_once('=') {
            comments.push((key.to_uppercase(), value.to_string()));
        }
    }

    if pos >= body.len() || body[pos] & 1 != 1 {
        return Err(VorbisError::UnsupportedMode("注释头 framing 位缺失".into()));
    }

    Ok(CommentHeader { vendor, comments })
}

fn read_u32(body: &[u8], pos: &mut usize) -> VorbisResult<u32> {
    let end = pos
        .checked_add(4)
        .ok_or(VorbisError::TruncatedStream)?;
    if end > body.len() {
        return Err(VorbisError::TruncatedStream);
    }
    let v = u32::from_le_bytes([body[*pos], body[*pos + 1], body[*pos + 2], body[*pos + 3]]);
    *pos = end;
    Ok(v)
}

fn read_length_prefixed<'a>(body: &'a [u8], pos: &mut usize) -> VorbisResult<&'a [u8]> {
    let len = read_u32(body, pos)? as usize;
    let end = pos
        .checked_add(len)
        .ok_or(VorbisError::TruncatedStream)?;
    if end > body.len() {
        return Err(VorbisError::TruncatedStream);
    }
    let out = &body[*pos..end];
    *pos = end;
    Ok(out)
}
