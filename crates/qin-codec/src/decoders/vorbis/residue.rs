//! residue 残差谱解码与声道耦合逆变换.
//!
//! residue 以 8 个 pass 累加的方式重建谱线; 分类码字在 pass 0
//! 一次性解出, 按 classbook 维度分解为逐分区的类别号.

use super::bitreader::LsbBitReader;
use super::codebook::Codebook;
use super::error::{VorbisError, VorbisResult};
use super::setup::ResidueConfig;

/// 解码一个 submap 的 residue, 返回每声道长度 n2 的残差谱.
///
/// `do_not_decode` 与声道一一对应; 位流在中途耗尽时保留已解出的
/// 部分, 其余谱线保持为零, 不算错误.
pub(crate) fn decode_residue(
    br: &mut LsbBitReader<'_>,
    cfg: &ResidueConfig,
    codebooks: &[Codebook],
    n2: usize,
    do_not_decode: &[bool],
) -> VorbisResult<Vec<Vec<f32>>> {
    let ch = do_not_decode.len();
    let mut out = vec![vec![0.0f32; n2]; ch];

    if cfg.residue_type == 2 {
        // type 2: 全部声道静默时不读任何位
        if do_not_decode.iter().all(|&d| d) {
            return Ok(out);
        }
        let mut interleaved = vec![vec![0.0f32; n2 * ch]];
        run_inner(br, cfg, codebooks, &mut interleaved, &[false])?;
        for (pos, chunk) in interleaved[0].chunks(ch).enumerate() {
            for (c, &v) in chunk.iter().enumerate() {
                out[c][pos] = v;
            }
        }
    } else {
        run_inner(br, cfg, codebooks, &mut out, do_not_decode)?;
    }
    Ok(out)
}

/// 执行内层解码, 把位流耗尽转换为正常结束
fn run_inner(
    br: &mut LsbBitReader<'_>,
    cfg: &ResidueConfig,
    codebooks: &[Codebook],
    out: &mut [Vec<f32>],
    do_not_decode: &[bool],
) -> VorbisResult<()> {
    match residue_inner(br, cfg, codebooks, out, do_not_decode) {
        Err(VorbisError::TruncatedStream) => Ok(()),
        other => other,
    }
}

fn residue_inner(
    br: &mut LsbBitReader<'_>,
    cfg: &ResidueConfig,
    codebooks: &[Codebook],
    out: &mut [Vec<f32>],
    do_not_decode: &[bool],
) -> VorbisResult<()> {
    let ch = out.len();
    let actual_size = out.first().map_or(0, |v| v.len());
    let begin = (cfg.begin as usize).min(actual_size);
    let end = (cfg.end as usize).min(actual_size);
    let psize = cfg.partition_size as usize;

    let classbook = &codebooks[usize::from(cfg.classbook)];
    let classwords = usize::from(classbook.dimensions);
    let class_count = cfg.books.len() as u32;

    let partitions_to_read = (end - begin) / psize;
    if partitions_to_read == 0 {
        return Ok(());
    }
    // 尾部多留 classwords 个槽位, 分解最后一个分类码字时不越界
    let cl_stride = partitions_to_read + classwords;
    let mut classifications = vec![0u32; ch * cl_stride];
    let mut vector = Vec::new();

    for pass in 0..8 {
        let mut partition_count = 0usize;
        while partition_count < partitions_to_read {
            if pass == 0 {
                for (j, dnd) in do_not_decode.iter().enumerate() {
                    if *dnd {
                        continue;
                    }
                    let mut temp = classbook.decode_scalar(br)?;
                    for i in (0..classwords).rev() {
                        classifications[j * cl_stride + i + partition_count] = temp % class_count;
                        temp /= class_count;
                    }
                }
            }
            for _ in 0..classwords {
                if partition_count >= partitions_to_read {
                    break;
                }
                for (j, dnd) in do_not_decode.iter().enumerate() {
                    if *dnd {
                        continue;
                    }
                    let vqclass = classifications[j * cl_stride + partition_count] as usize;
                    if let Some(book) = cfg.books[vqclass][pass] {
                        let offset = begin + partition_count * psize;
                        read_partition(
                            br,
                            cfg.residue_type,
                            &codebooks[usize::from(book)],
                            &mut out[j][offset..offset + psize],
                            &mut vector,
                        )?;
                    }
                }
                partition_count += 1;
            }
        }
    }
    Ok(())
}

/// 用一个 codebook 把向量累加进单个分区
fn read_partition(
    br: &mut LsbBitReader<'_>,
    residue_type: u16,
    book: &Codebook,
    partition: &mut [f32],
    vector: &mut Vec<f32>,
) -> VorbisResult<()> {
    let psize = partition.len();
    let dims = usize::from(book.dimensions);
    if residue_type == 0 {
        let step = psize / dims;
        for i in 0..step {
            book.read_vector(br, vector)?;
            for (j, &e) in vector.iter().enumerate() {
                partition[i + j * step] += e;
            }
        }
    } else {
        let mut i = 0usize;
        while i < psize {
            book.read_vector(br, vector)?;
            for &e in vector.iter() {
                if i >= psize {
                    break;
                }
                partition[i] += e;
                i += 1;
            }
        }
    }
    Ok(())
}

/// 声道耦合逆变换: 按声明的逆序把 (magnitude, angle) 还原为独立声道.
///
/// 必须在 floor 曲线点乘之前执行.
pub(crate) fn apply_coupling_inverse(channels: &mut [Vec<f32>], couplings: &[(u8, u8)]) {
    for &(mag_ch, ang_ch) in couplings.iter().rev() {
        let m_i = usize::from(mag_ch);
        let a_i = usize::from(ang_ch);
        let len = channels[m_i].len().min(channels[a_i].len());
        for i in 0..len {
            let m = channels[m_i][i];
            let a = channels[a_i][i];
            let (new_m, new_a) = if m > 0.0 {
                if a > 0.0 { (m, m - a) } else { (m + a, m) }
            } else if a > 0.0 {
                (m, m + a)
            } else {
                (m - a, m)
            };
            channels[m_i][i] = new_m;
            channels[a_i][i] = new_a;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::vorbis::setup::test_support::BitWriter;

    /// 构造一个 dims=2, entries=2, 码长 [1,1] 的 lookup1 codebook,
    /// 任何码字都解出向量 [1.0, 1.0]
    fn unit_codebook() -> Codebook {
        let mut w = BitWriter::new();
        w.write_bits(0x564342, 24);
        w.write_bits(2, 16);
        w.write_bits(2, 24);
        w.write_flag(false); // 非 ordered
        w.write_flag(false); // 非 sparse
        w.write_bits(0, 5); // 码长 1
        w.write_bits(0, 5); // 码长 1
        w.write_bits(1, 4); // lookup type 1
        w.write_bits(0, 32); // minimum = 0.0
        w.write_bits((788 << 21) | 1, 32); // delta = 1.0
        w.write_bits(0, 4); // value_bits = 1
        w.write_flag(false); // sequence_p
        w.write_bits(1, 1); // multiplicand[0] = 1
        let bytes = w.finish();
        let mut br = LsbBitReader::new(&bytes);
        Codebook::parse(&mut br).unwrap()
    }

    fn unit_residue() -> ResidueConfig {
        ResidueConfig {
            residue_type: 1,
            begin: 0,
            end: 4,
            partition_size: 2,
            classbook: 0,
            books: vec![[Some(0), None, None, None, None, None, None, None]],
        }
    }

    #[test]
    fn test_residue1_单声道累加() {
        let books = vec![unit_codebook()];
        let cfg = unit_residue();
        // pass 0: 1 位分类码字 + 每分区 1 位向量码字
        let data = [0u8];
        let mut br = LsbBitReader::new(&data);
        let out = decode_residue(&mut br, &cfg, &books, 4, &[false]).unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0, 1.0, 1.0]]);
        assert_eq!(br.bit_position(), 3);
    }

    #[test]
    fn test_residue0_按步长交织() {
        let books = vec![unit_codebook()];
        let mut cfg = unit_residue();
        cfg.residue_type = 0;
        let data = [0u8];
        let mut br = LsbBitReader::new(&data);
        let out = decode_residue(&mut br, &cfg, &books, 4, &[false]).unwrap();
        // dims=2, psize=2 ⇒ step=1, 两个谱线各累加一个向量元素
        assert_eq!(out, vec![vec![1.0, 1.0, 1.0, 1.0]]);
    }

    #[test]
    fn test_residue2_全静默不读位() {
        let books = vec![unit_codebook()];
        let mut cfg = unit_residue();
        cfg.residue_type = 2;
        let data = [0xFFu8];
        let mut br = LsbBitReader::new(&data);
        let out = decode_residue(&mut br, &cfg, &books, 4, &[true, true]).unwrap();
        assert_eq!(out, vec![vec![0.0; 4]; 2]);
        assert_eq!(br.bit_position(), 0);
    }

    #[test]
    fn test_residue2_解交织() {
        let books = vec![unit_codebook()];
        let mut cfg = unit_residue();
        cfg.residue_type = 2;
        cfg.end = 8;
        let data = [0u8];
        let mut br = LsbBitReader::new(&data);
        // 2 声道 × n2=4, 交织长度 8 再拆回各声道
        let out = decode_residue(&mut br, &cfg, &books, 4, &[false, false]).unwrap();
        assert_eq!(out, vec![vec![1.0; 4]; 2]);
    }

    #[test]
    fn test_residue_位流耗尽保留零() {
        let books = vec![unit_codebook()];
        let cfg = unit_residue();
        let data: [u8; 0] = [];
        let mut br = LsbBitReader::new(&data);
        let out = decode_residue(&mut br, &cfg, &books, 4, &[false]).unwrap();
        assert_eq!(out, vec![vec![0.0; 4]]);
    }

    #[test]
    fn test_耦合逆变换四象限() {
        let mut chans = vec![vec![2.0, 2.0, -2.0, -2.0], vec![1.0, -1.0, 1.0, -1.0]];
        apply_coupling_inverse(&mut chans, &[(0, 1)]);
        assert_eq!(chans[0], vec![2.0, 1.0, -2.0, -1.0]);
        assert_eq!(chans[1], vec![1.0, 2.0, -1.0, -2.0]);
    }

    #[test]
    fn test_耦合逆变换按逆序应用() {
        // 两步耦合: 后声明的先还原
        let mut chans = vec![vec![4.0], vec![1.0], vec![2.0]];
        apply_coupling_inverse(&mut chans, &[(0, 1), (0, 2)]);
        // 先还原 (0,2): m=4,a=2 ⇒ (4,2); 再还原 (0,1): m=4,a=1 ⇒ (4,3)
        assert_eq!(chans[0], vec![4.0]);
        assert_eq!(chans[1], vec![3.0]);
        assert_eq!(chans[2], vec![2.0]);
    }
}
