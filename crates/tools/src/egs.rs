//! 学習サンプル（egs）
//!
//! `NnetExample` を 1 行 1 ミニバッチの JSON lines で保存する。
//! 実データがない場合の動作確認用に、クラス中心の周りに点を散らした
//! 分類タスクを合成できる。

use crate::common::io::{read_json_lines, write_json_lines};
use anyhow::{Context, Result, bail};
use nnet_core::{
    CompressedMatrix, GeneralMatrix, Matrix, Nnet, NnetExample, NnetIo, NodeKind, ObjectiveType,
    SparseMatrix,
};
use rand::Rng;
use std::path::Path;

/// JSON lines（`.gz` なら gzip）からサンプルを読み込む
pub fn read_egs<P: AsRef<Path>>(path: P, limit: Option<usize>) -> Result<Vec<NnetExample>> {
    let path = path.as_ref();
    let egs = read_json_lines(path, limit)
        .with_context(|| format!("Failed to read examples from {}", path.display()))?;
    log::info!("Read {} examples from {}", egs.len(), path.display());
    Ok(egs)
}

/// サンプルを JSON lines（`.gz` なら gzip）で書き出す
pub fn write_egs<P: AsRef<Path>>(path: P, egs: &[NnetExample]) -> Result<()> {
    let path = path.as_ref();
    write_json_lines(path, egs)
        .with_context(|| format!("Failed to write examples to {}", path.display()))?;
    log::info!("Wrote {} examples to {}", egs.len(), path.display());
    Ok(())
}

/// 合成分類タスク
///
/// 各クラスに `[-1, 1]^dim` の中心を 1 つ割り当て、中心に一様ノイズを
/// 加えた点を入力とする。教師信号は出力の目的関数に合わせて、
/// linear なら疎な one-hot、quadratic なら密な one-hot になる。
#[derive(Debug, Clone)]
pub struct SyntheticTask {
    input_name: String,
    output_name: String,
    objective_type: ObjectiveType,
    centers: Vec<Vec<f32>>,
    noise: f32,
    compress_inputs: bool,
}

impl SyntheticTask {
    /// ネットワークの入力次元と最初の出力ノードからタスクを作る
    pub fn for_nnet<R: Rng>(nnet: &Nnet, noise: f32, rng: &mut R) -> Result<Self> {
        let input = nnet.input_node();
        let Some(output) = nnet.output_nodes().first() else {
            bail!("network has no output node");
        };
        let Some(NodeKind::Output { dim, objective_type }) = nnet.node_kind(&output.name) else {
            bail!("'{}' is not an output node", output.name);
        };
        if dim == 0 || input.dim == 0 {
            bail!("synthetic task needs nonzero input and output dims");
        }
        let centers = (0..dim)
            .map(|_| (0..input.dim).map(|_| rng.random_range(-1.0f32..=1.0)).collect())
            .collect();
        Ok(Self {
            input_name: input.name.clone(),
            output_name: output.name.clone(),
            objective_type,
            centers,
            noise,
            compress_inputs: false,
        })
    }

    /// 入力を 8bit 圧縮行列で保持する
    pub fn with_compressed_inputs(mut self, compress: bool) -> Self {
        self.compress_inputs = compress;
        self
    }

    pub fn num_classes(&self) -> usize {
        self.centers.len()
    }

    pub fn input_dim(&self) -> usize {
        self.centers.first().map_or(0, Vec::len)
    }

    /// `rows` 行（各行が独立した系列）のミニバッチを 1 つ作る
    pub fn sample<R: Rng>(&self, rows: usize, rng: &mut R) -> Result<NnetExample> {
        let labels: Vec<usize> =
            (0..rows).map(|_| rng.random_range(0..self.num_classes())).collect();

        let mut x = Matrix::zeros(rows, self.input_dim());
        for (r, &label) in labels.iter().enumerate() {
            for (v, &c) in x.row_mut(r).iter_mut().zip(&self.centers[label]) {
                *v = c + self.noise * rng.random_range(-1.0f32..=1.0);
            }
        }
        let features: GeneralMatrix = if self.compress_inputs {
            GeneralMatrix::Compressed(CompressedMatrix::compress(&x))
        } else {
            x.into()
        };

        let one_hot = SparseMatrix::one_hot(self.num_classes(), &labels)
            .context("label out of range")?;
        let supervision: GeneralMatrix = match self.objective_type {
            ObjectiveType::Linear => one_hot.into(),
            ObjectiveType::Quadratic => one_hot.to_dense().into(),
        };

        Ok(NnetExample::new(vec![
            NnetIo::new(self.input_name.clone(), features),
            NnetIo::new(self.output_name.clone(), supervision),
        ]))
    }

    /// `count` 個のミニバッチを作る
    pub fn generate<R: Rng>(
        &self,
        count: usize,
        rows: usize,
        rng: &mut R,
    ) -> Result<Vec<NnetExample>> {
        (0..count).map(|_| self.sample(rows, rng)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nnet_core::NnetConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const CONFIG: &str = r#"
[input]
dim = 5

[[component]]
name = "affine"
type = "affine"
input_dim = 5
output_dim = 4

[[component]]
name = "logsoftmax"
type = "log_softmax"
dim = 4

[[output]]
objective = "linear"
"#;

    fn nnet(objective: &str) -> Nnet {
        let text = CONFIG.replace("\"linear\"", &format!("\"{objective}\""));
        let cfg = NnetConfig::from_toml_str(&text).unwrap();
        Nnet::from_config(&cfg, &mut ChaCha8Rng::seed_from_u64(0)).unwrap()
    }

    #[test]
    fn test_sample_shapes_follow_nnet() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let task = SyntheticTask::for_nnet(&nnet("linear"), 0.1, &mut rng).unwrap();
        assert_eq!(task.num_classes(), 4);
        assert_eq!(task.input_dim(), 5);

        let eg = task.sample(6, &mut rng).unwrap();
        assert_eq!(eg.minibatch_size, 6);
        let input = &eg.find("input").unwrap().features;
        assert_eq!((input.num_rows(), input.num_cols()), (6, 5));
        let output = &eg.find("output").unwrap().features;
        assert!(matches!(output, GeneralMatrix::Sparse(_)));
        assert_eq!(output.num_cols(), 4);
        assert_eq!(output.sum(), 6.0);
    }

    #[test]
    fn test_inputs_stay_near_class_centers() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let task = SyntheticTask::for_nnet(&nnet("linear"), 0.05, &mut rng).unwrap();
        let eg = task.sample(20, &mut rng).unwrap();
        let x = eg.find("input").unwrap().features.to_dense();
        let y = eg.find("output").unwrap().features.to_dense();
        for r in 0..20 {
            let center = &task.centers[y.row_argmax(r)];
            for (v, c) in x.row(r).iter().zip(center) {
                assert!((v - c).abs() <= 0.05 + 1e-6);
            }
        }
    }

    #[test]
    fn test_quadratic_outputs_get_dense_targets() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let task = SyntheticTask::for_nnet(&nnet("quadratic"), 0.1, &mut rng)
            .unwrap()
            .with_compressed_inputs(true);
        let eg = task.sample(3, &mut rng).unwrap();
        assert!(matches!(eg.find("output").unwrap().features, GeneralMatrix::Full(_)));
        assert!(matches!(eg.find("input").unwrap().features, GeneralMatrix::Compressed(_)));
    }

    #[test]
    fn test_egs_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("egs.jsonl.gz");
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let task = SyntheticTask::for_nnet(&nnet("linear"), 0.1, &mut rng).unwrap();
        let egs = task.generate(3, 4, &mut rng).unwrap();
        write_egs(&path, &egs).unwrap();

        let read = read_egs(&path, None).unwrap();
        assert_eq!(read.len(), 3);
        for (a, b) in read.iter().zip(&egs) {
            assert_eq!(a.minibatch_size, b.minibatch_size);
            assert_eq!(a.find("output"), b.find("output"));
            let xa = a.find("input").unwrap().features.to_dense();
            let xb = b.find("input").unwrap().features.to_dense();
            for (u, v) in xa.as_slice().iter().zip(xb.as_slice()) {
                assert!((u - v).abs() < 1e-6);
            }
        }
        assert_eq!(read_egs(&path, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_egs_file_has_context() {
        let err = read_egs("/nonexistent/egs.jsonl", None).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read examples"));
    }

    #[test]
    fn test_out_of_range_supervision_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        let line = concat!(
            r#"{"io":[{"name":"input","features":{"type":"full","rows":1,"cols":5,"#,
            r#""data":[0.0,0.0,0.0,0.0,0.0]}},"#,
            r#"{"name":"output","features":{"type":"sparse","num_cols":4,"rows":[[[7,1.0]]]}}],"#,
            r#""minibatch_size":1}"#,
        );
        std::fs::write(&path, format!("{line}\n")).unwrap();
        let err = read_egs(&path, None).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("line 1"), "{msg}");
        assert!(msg.contains("num_cols"), "{msg}");
    }
}
