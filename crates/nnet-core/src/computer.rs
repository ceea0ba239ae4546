//! 参照実装の実行エンジン
//!
//! コンパイル済みの [`NnetComputation`] を解釈して実行する。
//! `run()` の 1 回目で順伝播、出力微分を `accept_input` で与えたあとの 2 回目で
//! 逆伝播を行い、勾配は delta ネットワークへ蓄積する。

use crate::compiler::{Command, NnetComputation};
use crate::error::{NnetError, NnetResult};
use crate::example::NnetIo;
use crate::matrix::Matrix;
use crate::nnet::Nnet;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Forward,
    Backward,
    Done,
}

/// 実行エンジン
pub struct NnetComputer<'a> {
    computation: &'a NnetComputation,
    nnet: &'a Nnet,
    delta: Option<&'a mut Nnet>,
    /// values[0] = 入力, values[c + 1] = コンポーネント c の出力
    values: Vec<Matrix>,
    memos: Vec<Option<Matrix>>,
    input: Option<Matrix>,
    outputs: HashMap<String, Matrix>,
    output_derivs: HashMap<String, Matrix>,
    stage: Stage,
}

impl<'a> NnetComputer<'a> {
    /// `delta` は勾配の蓄積先および統計の保存先
    pub fn new(
        computation: &'a NnetComputation,
        nnet: &'a Nnet,
        delta: Option<&'a mut Nnet>,
    ) -> Self {
        Self {
            computation,
            nnet,
            delta,
            values: Vec::new(),
            memos: Vec::new(),
            input: None,
            outputs: HashMap::new(),
            output_derivs: HashMap::new(),
            stage: Stage::Forward,
        }
    }

    /// サンプルの入力ノード分をまとめて受け取る（出力ノードは無視）
    pub fn accept_inputs(&mut self, nnet: &Nnet, io: &[NnetIo]) -> NnetResult<()> {
        for item in io {
            if nnet.is_input_node(&item.name) {
                self.accept_input(&item.name, item.features.to_dense())?;
            }
        }
        Ok(())
    }

    /// 入力（順伝播前）または出力微分（逆伝播前）を受け取る
    pub fn accept_input(&mut self, name: &str, value: Matrix) -> NnetResult<()> {
        match self.stage {
            Stage::Forward => {
                let spec = self
                    .computation
                    .request
                    .inputs
                    .iter()
                    .find(|s| s.name == name)
                    .ok_or_else(|| NnetError::NotAnInputNode(name.to_string()))?;
                check_shape(name, spec.num_rows, spec.num_cols, &value)?;
                self.input = Some(value);
                Ok(())
            }
            Stage::Backward => {
                let spec = self
                    .computation
                    .request
                    .outputs
                    .iter()
                    .find(|s| s.name == name && s.has_deriv)
                    .ok_or_else(|| NnetError::NotAnOutputNode(name.to_string()))?;
                let out = self.get_output(name)?;
                check_shape(name, spec.num_rows, out.num_cols(), &value)?;
                self.output_derivs.insert(name.to_string(), value);
                Ok(())
            }
            Stage::Done => Err(NnetError::ComputationStage("computation already finished")),
        }
    }

    /// 1 回目: 順伝播, 2 回目: 逆伝播
    pub fn run(&mut self) -> NnetResult<()> {
        match self.stage {
            Stage::Forward => {
                self.run_forward()?;
                self.stage = if self.computation.has_backward() {
                    Stage::Backward
                } else {
                    Stage::Done
                };
            }
            Stage::Backward => {
                self.run_backward()?;
                self.stage = Stage::Done;
            }
            Stage::Done => return Err(NnetError::ComputationStage("run() called too many times")),
        }
        Ok(())
    }

    fn run_forward(&mut self) -> NnetResult<()> {
        let input = self
            .input
            .take()
            .ok_or_else(|| NnetError::MissingInput(self.computation.input_node.clone()))?;
        self.values.push(input);

        let computation = self.computation;
        for cmd in &computation.forward {
            match cmd {
                Command::Propagate {
                    component,
                    store_stats,
                } => {
                    let (out, memo) =
                        self.nnet.component(*component).propagate(&self.values[*component]);
                    if *store_stats {
                        if let Some(delta) = self.delta.as_deref_mut() {
                            delta.component_mut(*component).store_stats(&out);
                        }
                    }
                    self.values.push(out);
                    self.memos.push(memo);
                }
                Command::ProvideOutput { node, tap } => {
                    self.outputs.insert(node.clone(), self.values[*tap].clone());
                }
                _ => return Err(NnetError::ComputationStage("backward command in forward pass")),
            }
        }
        Ok(())
    }

    fn run_backward(&mut self) -> NnetResult<()> {
        let mut deriv: Option<Matrix> = None;
        let computation = self.computation;
        for cmd in &computation.backward {
            match cmd {
                Command::AcceptDeriv { node, .. } => {
                    let d = self
                        .output_derivs
                        .remove(node)
                        .ok_or_else(|| NnetError::MissingInput(node.clone()))?;
                    deriv = Some(match deriv.take() {
                        None => d,
                        Some(mut acc) => {
                            acc.add_mat(1.0, &d);
                            acc
                        }
                    });
                }
                Command::Backprop { component, update } => {
                    let c = *component;
                    let out_deriv = deriv
                        .take()
                        .ok_or(NnetError::ComputationStage("no derivative to backpropagate"))?;
                    if *update {
                        let delta = self
                            .delta
                            .as_deref_mut()
                            .ok_or(NnetError::ComputationStage("no delta nnet to update"))?;
                        delta.component_mut(c).update_from(&self.values[c], &out_deriv);
                    }
                    let in_deriv = self.nnet.component(c).backprop(
                        &self.values[c],
                        &self.values[c + 1],
                        self.memos[c].as_ref(),
                        &out_deriv,
                    );
                    deriv = Some(in_deriv);
                }
                Command::ProvideInputDeriv { node } => {
                    let d = deriv
                        .take()
                        .ok_or(NnetError::ComputationStage("no input derivative"))?;
                    self.outputs.insert(node.clone(), d);
                }
                _ => return Err(NnetError::ComputationStage("forward command in backward pass")),
            }
        }
        Ok(())
    }

    /// 出力（または逆伝播後の入力微分）を参照
    pub fn get_output(&self, name: &str) -> NnetResult<&Matrix> {
        self.outputs
            .get(name)
            .ok_or_else(|| NnetError::MissingOutput(name.to_string()))
    }

    /// 出力を取り出す（以後 `get_output` では参照できない）
    pub fn get_output_destructive(&mut self, name: &str) -> NnetResult<Matrix> {
        self.outputs
            .remove(name)
            .ok_or_else(|| NnetError::MissingOutput(name.to_string()))
    }
}

fn check_shape(name: &str, rows: usize, cols: usize, value: &Matrix) -> NnetResult<()> {
    if value.num_cols() != cols {
        return Err(NnetError::DimensionMismatch {
            name: name.to_string(),
            expected: cols,
            actual: value.num_cols(),
        });
    }
    if value.num_rows() != rows {
        return Err(NnetError::DimensionMismatch {
            name: name.to_string(),
            expected: rows,
            actual: value.num_rows(),
        });
    }
    Ok(())
}
