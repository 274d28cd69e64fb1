//! 包内位读取器.
//!
//! Vorbis 位流以字节内最低位优先 (LSB-first) 的顺序排列.
//! 位置以包为单位, 每个新包从 0 开始.

use super::error::{VorbisError, VorbisResult};

pub(crate) struct LsbBitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> LsbBitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// 剩余可读位数
    pub(crate) fn remaining_bits(&self) -> usize {
        self.data
            .len()
            .saturating_mul(8)
            .saturating_sub(self.bit_pos)
    }

    /// 读取单个标志位
    pub(crate) fn read_flag(&mut self) -> VorbisResult<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    /// 读取 n 位无符号整数 (n ≤ 32), 跨字节边界仍为 LSB-first
    pub(crate) fn read_bits(&mut self, n: u8) -> VorbisResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        debug_assert!(n <= 32, "read_bits 位数超限: {n}");
        if self.remaining_bits() < n as usize {
            return Err(VorbisError::TruncatedStream);
        }

        let mut out = 0u32;
        for i in 0..n {
            let bit_idx = self.bit_pos + i as usize;
            let byte = self.data[bit_idx / 8];
            let bit = (byte >> (bit_idx % 8)) & 1;
            out |= u32::from(bit) << i;
        }
        self.bit_pos += n as usize;
        Ok(out)
    }

    /// 读取一元编码: 统计连续的 1 位个数, 直到遇到 0 终止位
    pub(crate) fn read_unary(&mut self) -> VorbisResult<u32> {
        let mut count = 0u32;
        while self.read_bits(1)? == 1 {
            count += 1;
        }
        Ok(count)
    }

    /// 当前位位置 (相对包起始)
    pub(crate) fn bit_position(&self) -> usize {
        self.bit_pos
    }
}

/// Vorbis 规范定义的 ilog: 最高非零位的位置 (ilog(0) = 0)
pub(crate) fn ilog(v: u32) -> u8 {
    if v == 0 {
        return 0;
    }
    (32 - v.leading_zeros()) as u8
}
