//! Vorbis 解码错误分类.
//!
//! setup 阶段的错误是致命的, 会阻止流打开; 音频包阶段的错误在
//! 解码器内部恢复为静音块, 不会中断播放.

use thiserror::Error;

use qin_core::QinError;

/// Vorbis 解码错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VorbisError {
    /// 位流在读取字段途中耗尽
    #[error("Vorbis 位流截断")]
    TruncatedStream,

    /// setup 中的 codebook 非法 (前缀码过度/欠指定等)
    #[error("Vorbis codebook 非法: {0}")]
    InvalidCodebook(String),

    /// 解码时没有任何码字与位流前缀匹配
    #[error("Vorbis 码字无法匹配")]
    InvalidCodeword,

    /// floor 配置或数据非法
    #[error("Vorbis floor 数据非法: {0}")]
    InvalidFloorData(String),

    /// residue 配置或数据非法
    #[error("Vorbis residue 数据非法: {0}")]
    InvalidResidueData(String),

    /// mode/mapping 超出声明表, 或使用了规范保留的类型
    #[error("Vorbis 模式不支持: {0}")]
    UnsupportedMode(String),
}

/// Vorbis 解码内部 Result 类型
pub type VorbisResult<T> = Result<T, VorbisError>;

impl From<VorbisError> for QinError {
    fn from(e: VorbisError) -> Self {
        QinError::Codec(e.to_string())
    }
}
