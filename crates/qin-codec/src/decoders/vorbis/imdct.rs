//! 逆 MDCT.
//!
//! 采用直接求和形式, 角度在 f64 中累积以避免大块长下的相位误差.
//! 窗函数不在变换内应用, 由重叠相加阶段统一处理.

/// 把长度 n/2 的谱序列变换为长度 n 的时域序列, 追加写入 `output`
pub(crate) fn imdct(spectrum: &[f32], output: &mut Vec<f32>) {
    let n2 = spectrum.len();
    let n = n2 * 2;
    output.clear();
    output.reserve(n);

    let scale = std::f64::consts::PI / n2 as f64;
    let shift = n as f64 / 4.0;
    for m in 0..n {
        let t = scale * (m as f64 + 0.5 + shift);
        let mut acc = 0.0f64;
        for (k, &x) in spectrum.iter().enumerate() {
            acc += f64::from(x) * (t * (k as f64 + 0.5)).cos();
        }
        output.push(acc as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!((a - e).abs() < 1e-5, "样本 {i}: {a} != {e}");
        }
    }

    #[test]
    fn test_imdct_零谱() {
        let mut out = Vec::new();
        imdct(&[0.0; 4], &mut out);
        assert_eq!(out, vec![0.0; 8]);
    }

    #[test]
    fn test_imdct_单谱线_n2() {
        // n=2: y[m] = cos(π(m+1)/2)
        let mut out = Vec::new();
        imdct(&[1.0], &mut out);
        assert_close(&out, &[0.0, -1.0]);
    }

    #[test]
    fn test_imdct_单谱线_n4() {
        // n=4: y[m] = cos(π(m+1.5)/4)
        let mut out = Vec::new();
        imdct(&[1.0, 0.0], &mut out);
        let c = std::f32::consts::FRAC_PI_4;
        assert_close(
            &out,
            &[
                (1.5 * c).cos(),
                (2.5 * c).cos(),
                (3.5 * c).cos(),
                (4.5 * c).cos(),
            ],
        );
    }

    #[test]
    fn test_imdct_线性叠加() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        let mut sum = Vec::new();
        imdct(&[1.0, 0.0, 0.0, 0.0], &mut a);
        imdct(&[0.0, 0.5, 0.0, 0.0], &mut b);
        imdct(&[1.0, 0.5, 0.0, 0.0], &mut sum);
        let combined: Vec<f32> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
        assert_close(&sum, &combined);
    }
}
