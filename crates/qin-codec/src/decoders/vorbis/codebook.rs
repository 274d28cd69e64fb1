//! Codebook: 前缀码 (Huffman) 构建与 VQ 向量查表.
//!
//! codebook 在 setup 头中声明, 构建一次后只读共享.
//! 码字按规范的 canonical 方式分配: 按条目顺序取同长度下
//! 最小的可用码字; 过度或欠指定的长度表都会被拒绝.

use super::bitreader::{LsbBitReader, ilog};
use super::error::{VorbisError, VorbisResult};

/// codebook 同步字 ("BCV" 的小端排列)
const CODEBOOK_SYNC: u32 = 0x564342;

/// 一个已构建的 codebook
#[derive(Debug, Clone)]
pub(crate) struct Codebook {
    /// 每个码字对应的向量维度
    pub(crate) dimensions: u16,
    /// 条目总数
    pub(crate) entries: u32,
    /// VQ 查表配置 (lookup_type 1/2), None 表示纯标量 codebook
    pub(crate) lookup: Option<VqLookup>,
    tree: HuffmanTree,
}

/// VQ 查表配置
#[derive(Debug, Clone)]
pub(crate) struct VqLookup {
    pub(crate) lookup_type: u8,
    pub(crate) minimum_value: f32,
    pub(crate) delta_value: f32,
    pub(crate) sequence_p: bool,
    pub(crate) lookup_values: u32,
    pub(crate) multiplicands: Vec<u32>,
}

impl Codebook {
    /// 从 setup 位流解析一个 codebook 并构建解码树
    pub(crate) fn parse(br: &mut LsbBitReader<'_>) -> VorbisResult<Self> {
        let sync = br.read_bits(24)?;
        if sync != CODEBOOK_SYNC {
            return Err(VorbisError::InvalidCodebook(format!(
                "同步字错误: 0x{sync:06X}"
            )));
        }

        let dimensions = br.read_bits(16)? as u16;
        let entries = br.read_bits(24)?;
        if dimensions == 0 || entries == 0 {
            return Err(VorbisError::InvalidCodebook(
                "dimensions/entries 不能为 0".into(),
            ));
        }

        let lengths = parse_codeword_lengths(br, entries)?;
        let tree = HuffmanTree::from_lengths(&lengths)?;

        let lookup_type = br.read_bits(4)? as u8;
        let lookup = match lookup_type {
            0 => None,
            1 | 2 => {
                let minimum_value = float32_unpack(br.read_bits(32)?);
                let delta_value = float32_unpack(br.read_bits(32)?);
                let value_bits = br.read_bits(4)? as u8 + 1;
                let sequence_p = br.read_flag()?;

                let lookup_values = if lookup_type == 1 {
                    lookup1_values(entries, u32::from(dimensions))
                } else {
                    entries
                        .checked_mul(u32::from(dimensions))
                        .ok_or_else(|| VorbisError::InvalidCodebook("查表值数量溢出".into()))?
                };
                let mut multiplicands = Vec::with_capacity(lookup_values as usize);
                for _ in 0..lookup_values {
                    multiplicands.push(br.read_bits(value_bits)?);
                }
                Some(VqLookup {
                    lookup_type,
                    minimum_value,
                    delta_value,
                    sequence_p,
                    lookup_values,
                    multiplicands,
                })
            }
            t => {
                return Err(VorbisError::InvalidCodebook(format!(
                    "保留的 lookup_type: {t}"
                )));
            }
        };

        Ok(Self {
            dimensions,
            entries,
            lookup,
            tree,
        })
    }

    /// 是否带有 value mapping (可用于向量解码)
    pub(crate) fn has_lookup(&self) -> bool {
        self.lookup.is_some()
    }

    /// 逐位匹配前缀码, 返回条目索引
    pub(crate) fn decode_scalar(&self, br: &mut LsbBitReader<'_>) -> VorbisResult<u32> {
        self.tree.decode(br)
    }

    /// 解码一个 VQ 向量, 写入 `out` (先清空, 再追加 dimensions 个值)
    pub(crate) fn read_vector(
        &self,
        br: &mut LsbBitReader<'_>,
        out: &mut Vec<f32>,
    ) -> VorbisResult<()> {
        let lookup = self
            .lookup
            .as_ref()
            .ok_or_else(|| VorbisError::InvalidCodebook("缺少 value mapping".into()))?;
        let sym = self.decode_scalar(br)? as usize;
        let dims = usize::from(self.dimensions);

        out.clear();
        let mut last = 0.0f32;
        let mut index_divisor = 1usize;
        for i in 0..dims {
            let m_idx = if lookup.lookup_type == 1 {
                (sym / index_divisor) % lookup.lookup_values as usize
            } else {
                sym * dims + i
            };
            let mul = lookup
                .multiplicands
                .get(m_idx)
                .copied()
                .ok_or_else(|| VorbisError::InvalidCodebook("multiplicand 索引越界".into()))?;
            let v = lookup.minimum_value + lookup.delta_value * mul as f32 + last;
            if lookup.sequence_p {
                last = v;
            }
            out.push(v);
            if lookup.lookup_type == 1 {
                index_divisor *= lookup.lookup_values as usize;
            }
        }
        Ok(())
    }
}

/// 解析码字长度表 (ordered / unordered, sparse 可选), 0 表示条目未使用
fn parse_codeword_lengths(br: &mut LsbBitReader<'_>, entries: u32) -> VorbisResult<Vec<u8>> {
    let mut lengths = vec![0u8; entries as usize];
    let ordered = br.read_flag()?;
    if ordered {
        let mut current_entry = 0u32;
        let mut current_length = br.read_bits(5)? as u8 + 1;
        while current_entry < entries {
            let left = entries - current_entry;
            let number = br.read_bits(ilog(left))?;
            if number == 0 || number > left {
                return Err(VorbisError::InvalidCodebook("ordered 长度组越界".into()));
            }
            if current_length > 32 {
                return Err(VorbisError::InvalidCodebook("码长超过 32".into()));
            }
            for slot in lengths
                .iter_mut()
                .skip(current_entry as usize)
                .take(number as usize)
            {
                *slot = current_length;
            }
            current_entry += number;
            current_length += 1;
        }
    } else {
        let sparse = br.read_flag()?;
        for slot in &mut lengths {
            let used = if sparse { br.read_flag()? } else { true };
            if used {
                *slot = br.read_bits(5)? as u8 + 1;
            }
        }
    }
    Ok(lengths)
}

/// 前缀码解码树
///
/// 节点用扁平数组存储; 子指针 > 0 指向内部节点,
/// < 0 表示叶子 (-(sym+1)), == 0 表示空槽.
#[derive(Debug, Clone)]
struct HuffmanTree {
    nodes: Vec<[i64; 2]>,
}

impl HuffmanTree {
    fn from_lengths(lengths: &[u8]) -> VorbisResult<Self> {
        let used: Vec<(u32, u8)> = lengths
            .iter()
            .enumerate()
            .filter(|&(_, &len)| len > 0)
            .map(|(sym, &len)| (sym as u32, len))
            .collect();

        if used.is_empty() {
            // 全部未使用的 sparse codebook: 不能从位流解码任何符号
            return Ok(Self {
                nodes: vec![[0, 0]],
            });
        }

        // 单条目特例: 规范要求码长为 1, 解码时读 1 位后无条件返回该条目
        if used.len() == 1 {
            let (sym, len) = used[0];
            if len != 1 {
                return Err(VorbisError::InvalidCodebook(
                    "单条目 codebook 的码长必须为 1".into(),
                ));
            }
            let leaf = -(i64::from(sym) + 1);
            return Ok(Self {
                nodes: vec![[leaf, leaf]],
            });
        }

        let codewords = assign_codewords(&used)?;
        let mut tree = Self {
            nodes: vec![[0, 0]],
        };
        for &(sym, code, len) in &codewords {
            tree.insert(sym, code, len)?;
        }
        Ok(tree)
    }

    /// 沿树插入一个码字 (code 为 MSB 对齐的 32 位值)
    fn insert(&mut self, sym: u32, code: u32, len: u8) -> VorbisResult<()> {
        let mut node = 0usize;
        for depth in 0..len {
            let bit = ((code >> (31 - depth)) & 1) as usize;
            let slot = self.nodes[node][bit];
            if slot < 0 {
                return Err(VorbisError::InvalidCodebook("前缀码冲突".into()));
            }
            if depth == len - 1 {
                self.nodes[node][bit] = -(i64::from(sym) + 1);
            } else if slot == 0 {
                let next = self.nodes.len();
                self.nodes.push([0, 0]);
                self.nodes[node][bit] = next as i64;
                node = next;
            } else {
                node = slot as usize;
            }
        }
        Ok(())
    }

    fn decode(&self, br: &mut LsbBitReader<'_>) -> VorbisResult<u32> {
        let mut node = 0usize;
        loop {
            let bit = br.read_bits(1)? as usize;
            let slot = self.nodes[node][bit];
            if slot < 0 {
                return Ok((-slot - 1) as u32);
            }
            if slot == 0 {
                return Err(VorbisError::InvalidCodeword);
            }
            node = slot as usize;
        }
    }
}

/// 按 canonical 规则为每个使用中的条目分配码字.
///
/// 维护每层最多一个空闲叶子的 `available` 表; 分配失败即过度指定,
/// 处理完后仍有空闲叶子即欠指定.
fn assign_codewords(used: &[(u32, u8)]) -> VorbisResult<Vec<(u32, u32, u8)>> {
    let mut available = [0u32; 33];
    let mut out = Vec::with_capacity(used.len());

    let (first_sym, first_len) = used[0];
    out.push((first_sym, 0u32, first_len));
    for i in 1..=usize::from(first_len) {
        available[i] = 1u32 << (32 - i);
    }

    for &(sym, len) in &used[1..] {
        let mut z = usize::from(len);
        while z > 0 && available[z] == 0 {
            z -= 1;
        }
        if z == 0 {
            return Err(VorbisError::InvalidCodebook("长度表过度指定".into()));
        }
        let code = available[z];
        available[z] = 0;
        out.push((sym, code, len));
        // 将占掉的叶子沿路径拆出更深层的空闲叶子
        for y in (z + 1)..=usize::from(len) {
            available[y] = code + (1u32 << (32 - y));
        }
    }

    if available[1..].iter().any(|&v| v != 0) {
        return Err(VorbisError::InvalidCodebook("长度表欠指定".into()));
    }
    Ok(out)
}

/// Vorbis 规范的 float32_unpack: 21 位尾数 + 10 位指数 + 符号位
pub(crate) fn float32_unpack(x: u32) -> f32 {
    let mantissa = (x & 0x1f_ffff) as f32;
    let exponent = ((x & 0x7fe0_0000) >> 21) as i32;
    let signed = if x & 0x8000_0000 != 0 {
        -mantissa
    } else {
        mantissa
    };
    signed * 2.0f32.powi(exponent - 788)
}

/// lookup1_values: 满足 v^dimensions ≤ entries 的最大整数 v
pub(crate) fn lookup1_values(entries: u32, dimensions: u32) -> u32 {
    if entries == 0 || dimensions == 0 {
        return 0;
    }
    let mut lo = 1u32;
    let mut hi = entries.max(1);
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if pow_le(mid, dimensions, entries) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

fn pow_le(base: u32, exp: u32, limit: u32) -> bool {
    let mut out = 1u128;
    for _ in 0..exp {
        out *= u128::from(base);
        if out > u128::from(limit) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(lengths: &[u8]) -> HuffmanTree {
        HuffmanTree::from_lengths(lengths).expect("构建失败")
    }

    /// 以 LSB-first 方式打包一串码字位, 再逐个解码
    fn decode_bits(t: &HuffmanTree, bits: u32, len: u8) -> u32 {
        let mut v = 0u8;
        for i in 0..len {
            if ((bits >> i) & 1) != 0 {
                v |= 1 << i;
            }
        }
        let buf = [v];
        let mut br = LsbBitReader::new(&buf);
        t.decode(&mut br).expect("解码失败")
    }

    #[test]
    fn test_huffman_构建与解码() {
        let t = tree(&[1, 2, 2]);
        let data = [0b0001_1010u8];
        let mut br = LsbBitReader::new(&data);
        assert_eq!(t.decode(&mut br).unwrap(), 0);
        assert_eq!(t.decode(&mut br).unwrap(), 1);
        assert_eq!(t.decode(&mut br).unwrap(), 2);
    }

    #[test]
    fn test_huffman_官方示例映射() {
        // Vorbis I 规范 3.2.1 节的示例长度表与码字分配
        let t = tree(&[2, 4, 4, 4, 4, 2, 3, 3]);
        assert_eq!(decode_bits(&t, 0b00, 2), 0);
        assert_eq!(decode_bits(&t, 0b0010, 4), 1);
        assert_eq!(decode_bits(&t, 0b1010, 4), 2);
        assert_eq!(decode_bits(&t, 0b0110, 4), 3);
        assert_eq!(decode_bits(&t, 0b1110, 4), 4);
        assert_eq!(decode_bits(&t, 0b01, 2), 5);
        assert_eq!(decode_bits(&t, 0b011, 3), 6);
        assert_eq!(decode_bits(&t, 0b111, 3), 7);
    }

    #[test]
    fn test_过度指定被拒绝() {
        assert!(matches!(
            HuffmanTree::from_lengths(&[1, 1, 1]),
            Err(VorbisError::InvalidCodebook(_))
        ));
    }

    #[test]
    fn test_欠指定被拒绝() {
        assert!(matches!(
            HuffmanTree::from_lengths(&[1, 2]),
            Err(VorbisError::InvalidCodebook(_))
        ));
    }

    #[test]
    fn test_单条目特例() {
        let t = tree(&[0, 1, 0]);
        assert_eq!(decode_bits(&t, 0, 1), 1);
        assert_eq!(decode_bits(&t, 1, 1), 1);
        assert!(matches!(
            HuffmanTree::from_lengths(&[0, 3, 0]),
            Err(VorbisError::InvalidCodebook(_))
        ));
    }

    #[test]
    fn test_稀疏长度表() {
        // 未使用的条目 (长度 0) 不参与码字分配
        let t = tree(&[2, 0, 2, 2, 0, 2]);
        assert_eq!(decode_bits(&t, 0b00, 2), 0);
        assert_eq!(decode_bits(&t, 0b10, 2), 2);
        assert_eq!(decode_bits(&t, 0b01, 2), 3);
        assert_eq!(decode_bits(&t, 0b11, 2), 5);
    }

    #[test]
    fn test_float32_unpack_已知值() {
        // 1.0 = 尾数 1, 指数 788
        assert_eq!(float32_unpack(788 << 21), 0.0);
        assert_eq!(float32_unpack((788 << 21) | 1), 1.0);
        assert_eq!(float32_unpack((789 << 21) | 1), 2.0);
        assert_eq!(float32_unpack((788 << 21) | 1 | 0x8000_0000), -1.0);
    }

    #[test]
    fn test_lookup1_values() {
        assert_eq!(lookup1_values(8, 3), 2);
        assert_eq!(lookup1_values(9, 2), 3);
        assert_eq!(lookup1_values(1, 1), 1);
        assert_eq!(lookup1_values(256, 4), 4);
    }
}
