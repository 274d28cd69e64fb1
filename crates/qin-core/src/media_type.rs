//! 媒体类型定义.

use std::fmt;

/// 媒体流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// 音频流
    Audio,
    /// 数据流 (如骨架/时间码)
    Data,
    /// 附件流 (如封面图片)
    Attachment,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Audio => "音频",
            Self::Data => "数据",
            Self::Attachment => "附件",
        };
        write!(f, "{name}")
    }
}
