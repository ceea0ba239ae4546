//! 学習サンプル（ミニバッチ）

use crate::general_matrix::GeneralMatrix;
use serde::{Deserialize, Serialize};

/// 名前付きの入力または教師信号
///
/// ノードが入力か出力かはネットワーク側の名前で決まる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NnetIo {
    pub name: String,
    pub features: GeneralMatrix,
}

impl NnetIo {
    pub fn new(name: impl Into<String>, features: impl Into<GeneralMatrix>) -> Self {
        Self {
            name: name.into(),
            features: features.into(),
        }
    }
}

/// 1 ミニバッチ分のサンプル
///
/// 各 `NnetIo` の行は `minibatch_size` 個の系列ブロックに等分されている
/// （ブロック長 = 行数 / minibatch_size）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NnetExample {
    pub io: Vec<NnetIo>,
    #[serde(default = "default_minibatch_size")]
    pub minibatch_size: usize,
}

fn default_minibatch_size() -> usize {
    1
}

impl NnetExample {
    /// 各行を独立した系列として扱うサンプルを作成
    pub fn new(io: Vec<NnetIo>) -> Self {
        let minibatch_size = io.first().map_or(1, |i| i.features.num_rows().max(1));
        Self { io, minibatch_size }
    }

    pub fn with_minibatch_size(mut self, minibatch_size: usize) -> Self {
        self.minibatch_size = minibatch_size.max(1);
        self
    }

    /// 名前で io を探す
    pub fn find(&self, name: &str) -> Option<&NnetIo> {
        self.io.iter().find(|io| io.name == name)
    }
}
