//! 密行列（行優先, f32）
//!
//! 学習制御と参照実装の実行エンジンが必要とする最小限の線形代数のみを持つ。

use serde::{Deserialize, Serialize};

/// 行優先の密行列
///
/// 逆シリアライズ時も `rows * cols == data.len()` を検証する。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "MatrixRaw")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct MatrixRaw {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl TryFrom<MatrixRaw> for Matrix {
    type Error = String;

    fn try_from(raw: MatrixRaw) -> Result<Self, Self::Error> {
        let len = raw.data.len();
        Matrix::from_vec(raw.rows, raw.cols, raw.data).ok_or_else(|| {
            format!("matrix data has {len} elements, expected {}x{}", raw.rows, raw.cols)
        })
    }
}

impl Matrix {
    /// ゼロ行列を作成
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// 行優先データから作成
    ///
    /// `data.len() != rows * cols` の場合は `None`。
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    /// 行のスライス列から作成（全行が同じ長さであること）
    pub fn from_rows(rows: &[Vec<f32>]) -> Option<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let data = rows.iter().flatten().copied().collect();
        Some(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    #[inline]
    pub fn num_rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn num_cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.data[r * self.cols + c] = v;
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, r: usize) -> &mut [f32] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// 全要素の和
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// 全要素を `alpha` 倍
    pub fn scale(&mut self, alpha: f32) {
        if alpha == 0.0 {
            // 0 倍は NaN/Inf を残さないよう明示的にゼロ埋めする
            self.data.fill(0.0);
        } else {
            self.data.iter_mut().for_each(|x| *x *= alpha);
        }
    }

    /// `self += alpha * other`（同形であること）
    pub fn add_mat(&mut self, alpha: f32, other: &Matrix) {
        debug_assert_eq!((self.rows, self.cols), (other.rows, other.cols));
        for (x, y) in self.data.iter_mut().zip(&other.data) {
            *x += alpha * y;
        }
    }

    /// `tr(self · otherᵀ)` = 要素ごとの積の総和
    pub fn trace_mat_mat_trans(&self, other: &Matrix) -> f32 {
        debug_assert_eq!((self.rows, self.cols), (other.rows, other.cols));
        self.data.iter().zip(&other.data).map(|(a, b)| a * b).sum()
    }

    /// フロベニウスノルム
    pub fn frobenius_norm(&self) -> f32 {
        self.trace_mat_mat_trans(self).sqrt()
    }

    /// 行範囲 `[start, start + len)` のフロベニウスノルム
    pub fn row_range_norm(&self, start: usize, len: usize) -> f32 {
        let slice = &self.data[start * self.cols..(start + len) * self.cols];
        slice.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// 行範囲 `[start, start + len)` を `alpha` 倍
    pub fn scale_row_range(&mut self, start: usize, len: usize, alpha: f32) {
        let cols = self.cols;
        self.data[start * cols..(start + len) * cols]
            .iter_mut()
            .for_each(|x| *x *= alpha);
    }

    /// 各行の最大要素の列インデックス（同値の場合は先頭）
    pub fn row_argmax(&self, r: usize) -> usize {
        let row = self.row(r);
        let mut best = 0;
        for (c, &v) in row.iter().enumerate() {
            if v > row[best] {
                best = c;
            }
        }
        best
    }

    /// 列ごとの和
    pub fn column_sums(&self) -> Vec<f32> {
        let mut sums = vec![0.0; self.cols];
        for r in 0..self.rows {
            for (s, v) in sums.iter_mut().zip(self.row(r)) {
                *s += v;
            }
        }
        sums
    }

    /// `self · otherᵀ`（self: N×K, other: M×K → N×M）
    pub fn matmul_trans(&self, other: &Matrix) -> Matrix {
        debug_assert_eq!(self.cols, other.cols);
        let mut out = Matrix::zeros(self.rows, other.rows);
        for i in 0..self.rows {
            let a = self.row(i);
            for j in 0..other.rows {
                let b = other.row(j);
                out.data[i * other.rows + j] = a.iter().zip(b).map(|(x, y)| x * y).sum();
            }
        }
        out
    }

    /// `self · other`（self: N×K, other: K×M → N×M）
    pub fn matmul(&self, other: &Matrix) -> Matrix {
        debug_assert_eq!(self.cols, other.rows);
        let mut out = Matrix::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self.get(i, k);
                if a == 0.0 {
                    continue;
                }
                let b = other.row(k);
                for (o, v) in out.row_mut(i).iter_mut().zip(b) {
                    *o += a * v;
                }
            }
        }
        out
    }

    /// `selfᵀ · other`（self: N×K, other: N×M → K×M）
    pub fn trans_matmul(&self, other: &Matrix) -> Matrix {
        debug_assert_eq!(self.rows, other.rows);
        let mut out = Matrix::zeros(self.cols, other.cols);
        for n in 0..self.rows {
            let b = other.row(n);
            for k in 0..self.cols {
                let a = self.get(n, k);
                if a == 0.0 {
                    continue;
                }
                for (o, v) in out.row_mut(k).iter_mut().zip(b) {
                    *o += a * v;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_rejects_ragged() {
        assert!(Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_none());
        let m = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!((m.num_rows(), m.num_cols()), (2, 2));
        assert_eq!(m.get(1, 0), 3.0);
    }

    #[test]
    fn test_norms_and_trace() {
        let m = Matrix::from_rows(&[vec![3.0, 4.0], vec![0.0, 0.0]]).unwrap();
        assert!((m.frobenius_norm() - 5.0).abs() < 1e-6);
        assert!((m.row_range_norm(1, 1)).abs() < 1e-6);
        assert!((m.trace_mat_mat_trans(&m) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_matmul_variants() {
        // a: 2x3, b: 3x2
        let a = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let b = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap();
        let ab = a.matmul(&b);
        assert_eq!(ab.row(0), &[4.0, 5.0]);
        assert_eq!(ab.row(1), &[10.0, 11.0]);

        // a · aᵀ
        let aat = a.matmul_trans(&a);
        assert_eq!(aat.row(0), &[14.0, 32.0]);

        // aᵀ · a の (0,0) = 1 + 16
        let ata = a.trans_matmul(&a);
        assert_eq!(ata.get(0, 0), 17.0);
    }

    #[test]
    fn test_scale_zero_clears_non_finite() {
        let mut m = Matrix::from_vec(1, 2, vec![f32::NAN, f32::INFINITY]).unwrap();
        m.scale(0.0);
        assert_eq!(m.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_row_argmax_first_on_tie() {
        let m = Matrix::from_rows(&[vec![0.5, 0.5, 0.1]]).unwrap();
        assert_eq!(m.row_argmax(0), 0);
    }
}
