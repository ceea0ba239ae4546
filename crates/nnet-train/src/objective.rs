//! 目的関数の評価
//!
//! 出力行列と教師信号から (重み, 目的関数値, 勾配) を求める。教師信号の表現
//! （疎・密・圧縮）は [`GeneralMatrix`] の一様な操作で吸収する。

use crate::error::TrainResult;
use nnet_core::{GeneralMatrix, Matrix, NnetComputer, NnetError, NnetResult, ObjectiveType};

/// 評価結果
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveValue {
    /// 重み（フレーム数）
    pub weight: f32,
    /// 目的関数値（重み付きの総和）
    pub objf: f32,
    /// 出力に対する勾配（要求時のみ）
    pub deriv: Option<Matrix>,
}

fn check_dims(name: &str, output: &Matrix, supervision: &GeneralMatrix) -> NnetResult<()> {
    if output.num_cols() != supervision.num_cols() {
        return Err(NnetError::DimensionMismatch {
            name: name.to_string(),
            expected: supervision.num_cols(),
            actual: output.num_cols(),
        });
    }
    if output.num_rows() != supervision.num_rows() {
        return Err(NnetError::DimensionMismatch {
            name: name.to_string(),
            expected: supervision.num_rows(),
            actual: output.num_rows(),
        });
    }
    Ok(())
}

/// 出力行列と教師信号から目的関数を評価する
///
/// - `Linear`: 重み = 教師信号の総和, 値 = `tr(output · supervisionᵀ)`, 勾配 = 教師信号
/// - `Quadratic`: 重み = 行数, 値 = `-0.5 |output - supervision|²`, 勾配 = `supervision - output`
pub fn evaluate(
    name: &str,
    output: &Matrix,
    supervision: &GeneralMatrix,
    objective_type: ObjectiveType,
    want_deriv: bool,
) -> NnetResult<ObjectiveValue> {
    check_dims(name, output, supervision)?;
    match objective_type {
        ObjectiveType::Linear => {
            let weight = supervision.sum();
            let objf = match supervision {
                // 疎行列は非ゼロ要素だけ見れば足りる
                GeneralMatrix::Sparse(s) => (0..s.num_rows())
                    .map(|r| s.row(r).iter().map(|&(c, v)| v * output.get(r, c)).sum::<f32>())
                    .sum(),
                _ => output.trace_mat_mat_trans(&supervision.to_dense()),
            };
            Ok(ObjectiveValue {
                weight,
                objf,
                deriv: want_deriv.then(|| supervision.to_dense()),
            })
        }
        ObjectiveType::Quadratic => {
            let mut diff = supervision.to_dense();
            diff.add_mat(-1.0, output);
            let objf = -0.5 * diff.trace_mat_mat_trans(&diff);
            Ok(ObjectiveValue {
                weight: diff.num_rows() as f32,
                objf,
                deriv: want_deriv.then_some(diff),
            })
        }
    }
}

/// 実行エンジンの出力 `output_name` について目的関数を計算する
///
/// `supply_deriv` なら勾配を逆伝播の種として実行エンジンに渡す。
/// 戻り値は (重み, 目的関数値)。
pub fn compute_objective_function(
    supervision: &GeneralMatrix,
    objective_type: ObjectiveType,
    output_name: &str,
    supply_deriv: bool,
    computer: &mut NnetComputer<'_>,
) -> TrainResult<(f32, f32)> {
    let value = {
        let output = computer.get_output(output_name)?;
        evaluate(output_name, output, supervision, objective_type, supply_deriv)?
    };
    if let Some(deriv) = value.deriv {
        computer.accept_input(output_name, deriv)?;
    }
    Ok((value.weight, value.objf))
}

/// 正解率（行ごとの arg-max 一致）
///
/// 戻り値は (重み, 正解の重み)。行の重みは教師信号の行和。
pub fn compute_accuracy(
    supervision: &GeneralMatrix,
    output: &Matrix,
) -> NnetResult<(f32, f32)> {
    check_dims("accuracy", output, supervision)?;
    let dense = supervision.to_dense();
    let mut tot_weight = 0.0;
    let mut tot_correct = 0.0;
    for r in 0..dense.num_rows() {
        let row_weight: f32 = dense.row(r).iter().sum();
        tot_weight += row_weight;
        if dense.row_argmax(r) == output.row_argmax(r) {
            tot_correct += row_weight;
        }
    }
    Ok((tot_weight, tot_correct))
}
