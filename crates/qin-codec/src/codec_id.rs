//! 编解码器标识符.

use std::fmt;

use qin_core::MediaType;

/// 编解码器标识符
///
/// 标识一种音频编码格式. Ogg 容器中可以出现的编码都在此列出,
/// 但并非每一种都注册了解码器.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecId {
    /// Vorbis
    Vorbis,
    /// Opus
    Opus,
    /// FLAC
    Flac,
}

impl CodecId {
    /// 获取编解码器所属的媒体类型
    pub const fn media_type(&self) -> MediaType {
        MediaType::Audio
    }

    /// 获取编解码器的人类可读名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Vorbis => "vorbis",
            Self::Opus => "opus",
            Self::Flac => "flac",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
