//! 教師信号などに使う汎用行列
//!
//! 疎行列・密行列・圧縮行列の 3 表現をタグ付き列挙型 [`GeneralMatrix`] で扱い、
//! 呼び出し側には「密行列への展開」と「総和」の一様なインターフェイスだけを見せる。

use crate::matrix::Matrix;
use serde::{Deserialize, Serialize};

/// 行ごとに (列, 値) を持つ疎行列
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "SparseMatrixRaw")]
pub struct SparseMatrix {
    num_cols: usize,
    rows: Vec<Vec<(usize, f32)>>,
}

#[derive(Deserialize)]
struct SparseMatrixRaw {
    num_cols: usize,
    rows: Vec<Vec<(usize, f32)>>,
}

impl TryFrom<SparseMatrixRaw> for SparseMatrix {
    type Error = String;

    fn try_from(raw: SparseMatrixRaw) -> Result<Self, Self::Error> {
        let num_cols = raw.num_cols;
        SparseMatrix::new(num_cols, raw.rows)
            .ok_or_else(|| format!("sparse matrix has a column index >= num_cols ({num_cols})"))
    }
}

impl SparseMatrix {
    /// 疎行列を作成
    ///
    /// 列インデックスが `num_cols` 以上の要素を含む場合は `None`。
    pub fn new(num_cols: usize, rows: Vec<Vec<(usize, f32)>>) -> Option<Self> {
        let in_range = rows.iter().flatten().all(|&(c, _)| c < num_cols);
        in_range.then_some(Self { num_cols, rows })
    }

    /// 1 行に 1 つだけ 1.0 を立てた行列（one-hot ラベル）
    pub fn one_hot(num_cols: usize, labels: &[usize]) -> Option<Self> {
        Self::new(num_cols, labels.iter().map(|&l| vec![(l, 1.0)]).collect())
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn row(&self, r: usize) -> &[(usize, f32)] {
        &self.rows[r]
    }

    pub fn sum(&self) -> f32 {
        self.rows.iter().flatten().map(|&(_, v)| v).sum()
    }

    /// 密行列へ展開
    pub fn to_dense(&self) -> Matrix {
        let mut m = Matrix::zeros(self.rows.len(), self.num_cols);
        for (r, row) in self.rows.iter().enumerate() {
            for &(c, v) in row {
                m.set(r, c, m.get(r, c) + v);
            }
        }
        m
    }
}

/// 8bit 量子化した圧縮行列
///
/// 行列全体で 1 組の `min`/`range` を持ち、各要素を 0..=255 に量子化する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CompressedMatrixRaw")]
pub struct CompressedMatrix {
    rows: usize,
    cols: usize,
    min: f32,
    range: f32,
    data: Vec<u8>,
}

#[derive(Deserialize)]
struct CompressedMatrixRaw {
    rows: usize,
    cols: usize,
    min: f32,
    range: f32,
    data: Vec<u8>,
}

impl TryFrom<CompressedMatrixRaw> for CompressedMatrix {
    type Error = String;

    fn try_from(raw: CompressedMatrixRaw) -> Result<Self, Self::Error> {
        if raw.data.len() != raw.rows * raw.cols {
            return Err(format!(
                "compressed matrix has {} elements, expected {}x{}",
                raw.data.len(),
                raw.rows,
                raw.cols
            ));
        }
        if !(raw.min.is_finite() && raw.range.is_finite() && raw.range >= 0.0) {
            return Err(format!(
                "compressed matrix has invalid header min={} range={}",
                raw.min, raw.range
            ));
        }
        Ok(Self {
            rows: raw.rows,
            cols: raw.cols,
            min: raw.min,
            range: raw.range,
            data: raw.data,
        })
    }
}

impl CompressedMatrix {
    /// 密行列を圧縮
    pub fn compress(m: &Matrix) -> Self {
        let slice = m.as_slice();
        let min = slice.iter().copied().fold(f32::INFINITY, f32::min);
        let max = slice.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let (min, range) = if slice.is_empty() {
            (0.0, 0.0)
        } else {
            (min, max - min)
        };
        let data = slice
            .iter()
            .map(|&x| {
                if range > 0.0 {
                    (((x - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8
                } else {
                    0
                }
            })
            .collect();
        Self {
            rows: m.num_rows(),
            cols: m.num_cols(),
            min,
            range,
            data,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn num_cols(&self) -> usize {
        self.cols
    }

    /// 展開
    pub fn decompress(&self) -> Matrix {
        let data = self
            .data
            .iter()
            .map(|&q| self.min + self.range * (q as f32) / 255.0)
            .collect();
        // rows * cols == data.len() は compress と逆シリアライズ時の検証で保証済み
        Matrix::from_vec(self.rows, self.cols, data).unwrap_or_default()
    }
}

/// 3 表現のいずれかを保持する行列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneralMatrix {
    Sparse(SparseMatrix),
    Full(Matrix),
    Compressed(CompressedMatrix),
}

impl GeneralMatrix {
    pub fn num_rows(&self) -> usize {
        match self {
            Self::Sparse(s) => s.num_rows(),
            Self::Full(m) => m.num_rows(),
            Self::Compressed(c) => c.num_rows(),
        }
    }

    pub fn num_cols(&self) -> usize {
        match self {
            Self::Sparse(s) => s.num_cols(),
            Self::Full(m) => m.num_cols(),
            Self::Compressed(c) => c.num_cols(),
        }
    }

    /// 全要素の和（教師信号の重み合計）
    pub fn sum(&self) -> f32 {
        match self {
            Self::Sparse(s) => s.sum(),
            Self::Full(m) => m.sum(),
            Self::Compressed(c) => c.decompress().sum(),
        }
    }

    /// 密行列へ展開
    pub fn to_dense(&self) -> Matrix {
        match self {
            Self::Sparse(s) => s.to_dense(),
            Self::Full(m) => m.clone(),
            Self::Compressed(c) => c.decompress(),
        }
    }
}

impl From<Matrix> for GeneralMatrix {
    fn from(m: Matrix) -> Self {
        Self::Full(m)
    }
}

impl From<SparseMatrix> for GeneralMatrix {
    fn from(s: SparseMatrix) -> Self {
        Self::Sparse(s)
    }
}

impl From<CompressedMatrix> for GeneralMatrix {
    fn from(c: CompressedMatrix) -> Self {
        Self::Compressed(c)
    }
}
