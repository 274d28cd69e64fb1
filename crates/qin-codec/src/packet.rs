//! 压缩数据包 (Packet).
//!
//! 表示从容器格式中读取的一个压缩数据单元.

use bytes::Bytes;
use qin_core::Rational;

/// 压缩数据包
///
/// 从容器格式中读取的一个压缩数据单元, 需要送入解码器进行解码.
/// 对 Vorbis 而言, 一个 Packet 对应一个完整的 Vorbis 包
/// (头包或一个音频块).
#[derive(Debug, Clone)]
pub struct Packet {
    /// 压缩数据
    pub data: Bytes,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 解码时间戳 (DTS)
    pub dts: i64,
    /// 数据包时长 (以 time_base 为单位)
    pub duration: i64,
    /// 时间基
    pub time_base: Rational,
    /// 所属流的索引
    pub stream_index: usize,
    /// 是否为关键帧
    pub is_keyframe: bool,
    /// 冲刷标记: 通知解码器输入已结束, 排空缓存帧.
    /// 与零长度数据包区分 (Ogg 中零长度包是合法的码流内容).
    pub is_flush: bool,
    /// 在容器中的字节偏移量 (-1 表示未知)
    pub pos: i64,
}

impl Packet {
    /// 创建空数据包
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            pts: qin_core::timestamp::NOPTS_VALUE,
            dts: qin_core::timestamp::NOPTS_VALUE,
            duration: 0,
            time_base: Rational::UNDEFINED,
            stream_index: 0,
            is_keyframe: false,
            is_flush: false,
            pos: -1,
        }
    }

    /// 创建冲刷包, 送入解码器表示输入结束
    pub fn flush_marker() -> Self {
        Self {
            is_flush: true,
            ..Self::empty()
        }
    }

    /// 从数据创建数据包
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::empty()
        }
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 数据是否为空 (零长度包在 Ogg 中是合法内容, 不等于冲刷)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
