//! 計算リクエストのコンパイルとキャッシュ
//!
//! サンプルの入出力形状から [`ComputationRequest`] を作り、参照実装の実行エンジン
//! 向けのコマンド列 [`NnetComputation`] にコンパイルする。同一形状のリクエストは
//! キャッシュ済みの計算を再利用する。キャッシュはテキスト（JSON）または
//! バイナリ（マジック + gzip 圧縮 JSON）で保存・復元できる。

use crate::error::{NnetError, NnetResult};
use crate::example::NnetExample;
use crate::nnet::{NodeKind, Nnet};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

/// バイナリ形式キャッシュの先頭マジック
const BINARY_MAGIC: &[u8; 4] = b"\0NNC";

/// 入力・出力 1 つ分の形状指定
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoSpecification {
    pub name: String,
    pub num_rows: usize,
    pub num_cols: usize,
    /// 微分が必要か（出力: 逆伝播の種を受け取る, 入力: 入力微分を返す）
    pub has_deriv: bool,
}

/// 計算リクエスト
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputationRequest {
    pub inputs: Vec<IoSpecification>,
    pub outputs: Vec<IoSpecification>,
    pub need_model_derivative: bool,
    pub store_component_stats: bool,
}

/// サンプルから計算リクエストを作る
pub fn get_computation_request(
    nnet: &Nnet,
    eg: &NnetExample,
    need_model_derivative: bool,
    store_component_stats: bool,
) -> NnetResult<ComputationRequest> {
    let mut request = ComputationRequest {
        inputs: Vec::new(),
        outputs: Vec::new(),
        need_model_derivative,
        store_component_stats,
    };
    for io in &eg.io {
        let spec = |has_deriv| IoSpecification {
            name: io.name.clone(),
            num_rows: io.features.num_rows(),
            num_cols: io.features.num_cols(),
            has_deriv,
        };
        match nnet.node_kind(&io.name) {
            Some(NodeKind::Input { .. }) => request.inputs.push(spec(false)),
            Some(NodeKind::Output { .. }) => request.outputs.push(spec(need_model_derivative)),
            None => return Err(NnetError::UnknownNode(io.name.clone())),
        }
    }
    Ok(request)
}

/// 実行エンジンのコマンド
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// コンポーネントの順伝播
    Propagate { component: usize, store_stats: bool },
    /// 出力ノードの値を確定（`tap` 個目のコンポーネントの出力）
    ProvideOutput { node: String, tap: usize },
    /// 出力ノードの微分を逆伝播の種として加算
    AcceptDeriv { node: String, tap: usize },
    /// コンポーネントの逆伝播（`update` なら delta に勾配を蓄積）
    Backprop { component: usize, update: bool },
    /// 入力ノードの微分を出力として提供
    ProvideInputDeriv { node: String },
}

/// コンパイル済みの計算
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NnetComputation {
    pub request: ComputationRequest,
    pub input_node: String,
    pub forward: Vec<Command>,
    pub backward: Vec<Command>,
}

impl NnetComputation {
    /// 逆伝播を伴うか
    pub fn has_backward(&self) -> bool {
        !self.backward.is_empty()
    }
}

/// リクエストをコンパイル（キャッシュなし）
pub fn compile(nnet: &Nnet, request: &ComputationRequest) -> NnetResult<NnetComputation> {
    let input = nnet.input_node();
    let input_spec = match request.inputs.as_slice() {
        [spec] => spec,
        [] => return Err(NnetError::MissingInput(input.name.clone())),
        [_, extra, ..] => return Err(NnetError::UnknownNode(extra.name.clone())),
    };
    if input_spec.name != input.name {
        return Err(NnetError::NotAnInputNode(input_spec.name.clone()));
    }
    if input_spec.num_cols != input.dim {
        return Err(NnetError::DimensionMismatch {
            name: input.name.clone(),
            expected: input.dim,
            actual: input_spec.num_cols,
        });
    }

    let mut taps = Vec::with_capacity(request.outputs.len());
    for spec in &request.outputs {
        let node = nnet
            .output_node(&spec.name)
            .ok_or_else(|| NnetError::NotAnOutputNode(spec.name.clone()))?;
        taps.push((spec, node.tap));
    }
    let depth = taps.iter().map(|&(_, t)| t).max().unwrap_or(0);

    let mut forward = Vec::new();
    for c in 0..depth {
        forward.push(Command::Propagate {
            component: c,
            store_stats: request.store_component_stats,
        });
        for &(spec, tap) in &taps {
            if tap == c + 1 {
                forward.push(Command::ProvideOutput {
                    node: spec.name.clone(),
                    tap,
                });
            }
        }
    }

    let mut backward = Vec::new();
    let deriv_depth = taps
        .iter()
        .filter(|(spec, _)| spec.has_deriv)
        .map(|&(_, t)| t)
        .max()
        .unwrap_or(0);
    let need_backprop = request.need_model_derivative || input_spec.has_deriv;
    if deriv_depth > 0 && need_backprop {
        for c in (0..deriv_depth).rev() {
            for &(spec, tap) in &taps {
                if spec.has_deriv && tap == c + 1 {
                    backward.push(Command::AcceptDeriv {
                        node: spec.name.clone(),
                        tap,
                    });
                }
            }
            let update =
                request.need_model_derivative && nnet.component(c).as_updatable().is_some();
            backward.push(Command::Backprop {
                component: c,
                update,
            });
        }
        if input_spec.has_deriv {
            backward.push(Command::ProvideInputDeriv {
                node: input.name.clone(),
            });
        }
    }

    Ok(NnetComputation {
        request: request.clone(),
        input_node: input.name.clone(),
        forward,
        backward,
    })
}

/// キャッシュファイルの中身
#[derive(Serialize, Deserialize)]
struct CacheFile {
    signature: String,
    computations: Vec<NnetComputation>,
}

/// コンパイル結果をメモ化するコンパイラ
#[derive(Debug)]
pub struct CachingCompiler {
    signature: String,
    cache: HashMap<ComputationRequest, Arc<NnetComputation>>,
    num_compilations: usize,
}

impl CachingCompiler {
    pub fn new(nnet: &Nnet) -> Self {
        Self {
            signature: nnet.signature(),
            cache: HashMap::new(),
            num_compilations: 0,
        }
    }

    /// コンパイル（キャッシュにあれば再利用）
    pub fn compile(
        &mut self,
        nnet: &Nnet,
        request: &ComputationRequest,
    ) -> NnetResult<Arc<NnetComputation>> {
        if let Some(c) = self.cache.get(request) {
            return Ok(Arc::clone(c));
        }
        let computation = Arc::new(compile(nnet, request)?);
        self.num_compilations += 1;
        self.cache.insert(request.clone(), Arc::clone(&computation));
        Ok(computation)
    }

    /// これまでに実際にコンパイルした回数（キャッシュヒットは含まない）
    pub fn num_compilations(&self) -> usize {
        self.num_compilations
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// キャッシュを読み込む（形式は先頭マジックで自動判別）
    ///
    /// 別構造のネットワーク向けに書かれたキャッシュは警告して破棄する。
    /// 戻り値は取り込んだ計算の数。
    pub fn read_cache<R: Read>(&mut self, mut reader: R) -> NnetResult<usize> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let file: CacheFile = if let Some(body) = bytes.strip_prefix(BINARY_MAGIC.as_slice()) {
            let mut json = Vec::new();
            GzDecoder::new(body).read_to_end(&mut json)?;
            serde_json::from_slice(&json)?
        } else {
            serde_json::from_slice(&bytes)?
        };

        if file.signature != self.signature {
            log::warn!(
                "Computation cache was written for a different nnet structure; ignoring it."
            );
            return Ok(0);
        }
        let n = file.computations.len();
        for c in file.computations {
            self.cache.insert(c.request.clone(), Arc::new(c));
        }
        Ok(n)
    }

    /// キャッシュを書き出す
    pub fn write_cache<W: Write>(&self, mut writer: W, binary: bool) -> NnetResult<()> {
        let mut computations: Vec<NnetComputation> =
            self.cache.values().map(|c| c.as_ref().clone()).collect();
        // 出力を決定的にするため行数でソート
        computations.sort_by_key(|c| {
            (
                c.request.inputs.first().map_or(0, |i| i.num_rows),
                c.request.outputs.len(),
                c.request.inputs.iter().any(|i| i.has_deriv),
            )
        });
        let file = CacheFile {
            signature: self.signature.clone(),
            computations,
        };
        if binary {
            writer.write_all(BINARY_MAGIC)?;
            let mut enc = GzEncoder::new(&mut writer, Compression::default());
            serde_json::to_writer(&mut enc, &file)?;
            enc.finish()?;
        } else {
            serde_json::to_writer_pretty(&mut writer, &file)?;
        }
        writer.flush()?;
        Ok(())
    }
}
