//! 解码后的帧数据 (Frame).
//!
//! 表示解码后的原始音频数据.

use qin_core::{ChannelLayout, Rational, SampleFormat};

/// 音频帧
///
/// 包含解码后的原始音频采样数据.
/// 平面格式: data 中每个 Vec 对应一个声道.
/// 交错格式: data 中只有一个 Vec, 所有声道交替排列.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// 音频采样数据 (平面格式: 每声道一个 Vec; 交错格式: 单个 Vec)
    pub data: Vec<Vec<u8>>,
    /// 本帧包含的采样数 (每声道)
    pub nb_samples: u32,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 采样格式
    pub sample_format: SampleFormat,
    /// 声道布局
    pub channel_layout: ChannelLayout,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
    /// 帧时长 (以 time_base 为单位)
    pub duration: i64,
}

impl AudioFrame {
    /// 创建空的音频帧
    pub fn new(
        nb_samples: u32,
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
    ) -> Self {
        let plane_count = if sample_format.is_planar() {
            channel_layout.channels as usize
        } else {
            1
        };
        Self {
            data: vec![Vec::new(); plane_count],
            nb_samples,
            sample_rate,
            sample_format,
            channel_layout,
            pts: qin_core::timestamp::NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
            duration: 0,
        }
    }
}

/// 帧 (统一包装, 便于未来扩展其他媒体类型)
#[derive(Debug, Clone)]
pub enum Frame {
    /// 音频帧
    Audio(AudioFrame),
}
