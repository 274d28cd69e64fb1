//! 窗斜率与重叠相加.
//!
//! 每个块的右半窗样本以未加窗的原始形式保存, 与下一块的左半窗
//! 在重叠区内一起加窗相加. 第一个音频块没有前块, 只保存不输出.

use super::error::{VorbisError, VorbisResult};

/// 跨块的重叠相加状态机
pub(crate) struct OverlapAdder {
    bs0: usize,
    /// 上升窗斜率, [0] 对应短块, [1] 对应长块
    slopes: [Vec<f32>; 2],
    /// 上一块保存的右半窗原始样本, 每声道一份
    prev_right: Option<Vec<Vec<f32>>>,
}

impl OverlapAdder {
    pub(crate) fn new(bs0: usize, bs1: usize) -> Self {
        Self {
            bs0,
            slopes: [window_slope(bs0), window_slope(bs1)],
            prev_right: None,
        }
    }

    /// 丢弃跨块状态 (seek 或 flush 之后)
    pub(crate) fn reset(&mut self) {
        self.prev_right = None;
    }

    /// 对一组 IMDCT 输出做重叠相加.
    ///
    /// 返回本块实际输出的样本 (每声道等长); 第一个块返回空声道.
    pub(crate) fn process(
        &mut self,
        mut channels: Vec<Vec<f32>>,
        blockflag: bool,
        prev_flag: bool,
        next_flag: bool,
    ) -> VorbisResult<Vec<Vec<f32>>> {
        let n = channels.first().map_or(0, |c| c.len());
        let center = n >> 1;

        // 左窗: 前块为短块时, 长块的重叠区收窄到中间 bs0/2 个样本
        let (left_start, left_use_bs1) = if prev_flag || !blockflag {
            (0, blockflag)
        } else {
            ((n - self.bs0) >> 2, false)
        };
        // 右窗: 后块为短块时同理收窄
        let (right_start, right_end) = if next_flag || !blockflag {
            (center, n)
        } else {
            ((3 * n - self.bs0) >> 2, (3 * n + self.bs0) >> 2)
        };

        if let Some(prev) = self.prev_right.take() {
            if prev.len() != channels.len() {
                return Err(VorbisError::UnsupportedMode("重叠声道数不一致".into()));
            }
            let slope = &self.slopes[usize::from(left_use_bs1)];
            for (chan, p) in channels.iter_mut().zip(&prev) {
                // 几何不一致时 (丢包后的静音恢复块) 收窄到可用长度,
                // 多出的前块样本被丢弃而不是中断解码
                let plen = p
                    .len()
                    .min(slope.len())
                    .min(n.saturating_sub(left_start));
                for (i, &pv) in p[..plen].iter().enumerate() {
                    let v = chan[left_start + i];
                    chan[left_start + i] = v * slope[i] + pv * slope[plen - 1 - i];
                }
            }

            let mut rights = Vec::with_capacity(channels.len());
            for chan in channels.iter_mut() {
                rights.push(chan[right_start..right_end].to_vec());
                chan.truncate(right_start);
                chan.drain(..left_start);
            }
            self.prev_right = Some(rights);
            Ok(channels)
        } else {
            // 第一个块: 只保存右半窗, 不输出样本
            let mut rights = Vec::with_capacity(channels.len());
            for chan in channels.iter_mut() {
                rights.push(chan[right_start..right_end].to_vec());
                chan.clear();
            }
            self.prev_right = Some(rights);
            Ok(channels)
        }
    }
}

/// Vorbis 窗的上升半段: w[i] = sin(π/2 · sin²(π(i+0.5)/bs))
fn window_slope(bs: usize) -> Vec<f32> {
    let half = bs / 2;
    (0..half)
        .map(|i| {
            let inner = (std::f64::consts::PI * (i as f64 + 0.5) / bs as f64).sin();
            (std::f64::consts::FRAC_PI_2 * inner * inner).sin() as f32
        })
        .collect()
}
