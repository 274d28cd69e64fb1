//! 输出端合成: 声道重排与 F32 交织帧构造.

use qin_core::{ChannelLayout, Rational, SampleFormat};

use crate::frame::AudioFrame;

/// Vorbis 声道序到输出声道序的映射.
///
/// 返回向量的第 i 项是输出声道 i 对应的 Vorbis 声道号.
/// 3 声道以上 Vorbis 把中置/LFE 排在与常见输出布局不同的位置.
pub(crate) fn vorbis_channel_order(channels: usize) -> Vec<usize> {
    match channels {
        3 => vec![0, 2, 1],
        5 => vec![0, 2, 1, 3, 4],
        6 => vec![0, 2, 1, 5, 3, 4],
        n => (0..n).collect(),
    }
}

/// 把各声道等长的 PCM 样本交织为一个 F32 音频帧
pub(crate) fn build_frame(
    channels: &[Vec<f32>],
    sample_rate: u32,
    pts: i64,
    time_base: Rational,
) -> AudioFrame {
    let ch = channels.len();
    let nb_samples = channels.first().map_or(0, |c| c.len());
    let order = vorbis_channel_order(ch);

    let mut data = Vec::with_capacity(nb_samples * ch * 4);
    for i in 0..nb_samples {
        for &src in &order {
            data.extend_from_slice(&channels[src][i].to_le_bytes());
        }
    }

    let mut frame = AudioFrame::new(
        nb_samples as u32,
        sample_rate,
        SampleFormat::F32,
        ChannelLayout::from_channels(ch as u32),
    );
    frame.data = vec![data];
    frame.pts = pts;
    frame.time_base = time_base;
    frame.duration = nb_samples as i64;
    frame
}
