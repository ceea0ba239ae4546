//! 1 ミニバッチ分の学習パス
//!
//! 順伝播 → 目的関数と勾配 → 逆伝播（delta へ蓄積） → max-change 付き更新、を
//! 1 パスとして実行する。backstitch では同じ計算で負方向・正方向の 2 パスを行う。

use crate::error::TrainResult;
use crate::max_change::{MaxChangeStats, update_nnet_with_max_change};
use crate::objective::{compute_accuracy, compute_objective_function};
use crate::stats::OutputStats;
use nnet_core::{Nnet, NnetComputation, NnetComputer, NnetExample, NodeKind, ObjectiveType};
use std::ops::{Deref, DerefMut};

/// パスの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// 通常の学習（momentum あり）
    Conventional,
    /// backstitch の 1 パス目（勾配と逆方向に動かす）
    BackstitchNegative,
    /// backstitch の 2 パス目（拡大した正方向の更新）
    BackstitchPositive,
}

/// 更新時の係数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassScales {
    /// max-change の上限に掛ける係数
    pub max_change_scale: f32,
    /// `nnet += scale_adding * delta`
    pub scale_adding: f32,
    /// 更新後に delta に掛ける係数（次のミニバッチへの持ち越し）
    pub scale_delta_nnet: f32,
}

impl PassKind {
    pub fn scales(self, momentum: f32, backstitch_scale: f32) -> PassScales {
        match self {
            Self::Conventional => PassScales {
                max_change_scale: 1.0,
                scale_adding: 1.0 - momentum,
                scale_delta_nnet: momentum,
            },
            Self::BackstitchNegative => PassScales {
                max_change_scale: backstitch_scale,
                scale_adding: -backstitch_scale,
                scale_delta_nnet: 0.0,
            },
            Self::BackstitchPositive => PassScales {
                max_change_scale: 1.0 + backstitch_scale,
                scale_adding: 1.0 + backstitch_scale,
                scale_delta_nnet: 0.0,
            },
        }
    }

    /// 統計名の接尾辞（負方向のパスは主系列と分けて集計する）
    pub fn stats_suffix(self) -> &'static str {
        match self {
            Self::BackstitchNegative => "_backstitch",
            _ => "",
        }
    }
}

/// natural gradient の統計更新を凍結するガード
///
/// 生存中は対象ネットワークの前処理統計を凍結し、drop 時に必ず解除する。
pub struct NaturalGradientFreeze<'a> {
    nnet: &'a mut Nnet,
}

impl<'a> NaturalGradientFreeze<'a> {
    pub fn new(nnet: &'a mut Nnet) -> Self {
        nnet.freeze_natural_gradient(true);
        Self { nnet }
    }
}

impl Deref for NaturalGradientFreeze<'_> {
    type Target = Nnet;

    fn deref(&self) -> &Nnet {
        self.nnet
    }
}

impl DerefMut for NaturalGradientFreeze<'_> {
    fn deref_mut(&mut self) -> &mut Nnet {
        self.nnet
    }
}

impl Drop for NaturalGradientFreeze<'_> {
    fn drop(&mut self) {
        self.nnet.freeze_natural_gradient(false);
    }
}

/// 出力ノードごとに目的関数を計算し、勾配を実行エンジンへ渡して統計を更新する
pub(crate) fn process_outputs(
    suffix: &str,
    eg: &NnetExample,
    nnet: &Nnet,
    computer: &mut NnetComputer<'_>,
    stats: &mut OutputStats,
    minibatches_per_phase: u64,
    minibatch_counter: u64,
) -> TrainResult<()> {
    for io in &eg.io {
        let Some(NodeKind::Output { objective_type, .. }) = nnet.node_kind(&io.name) else {
            continue;
        };
        let name = format!("{}{suffix}", io.name);
        let (tot_weight, tot_objf) =
            compute_objective_function(&io.features, objective_type, &io.name, true, computer)?;
        stats.objf_info(&name).update_stats(
            &name,
            minibatches_per_phase,
            minibatch_counter,
            tot_weight,
            tot_objf,
            0.0,
        )?;
        if objective_type == ObjectiveType::Linear {
            let (tot_weight, tot_accuracy) =
                compute_accuracy(&io.features, computer.get_output(&io.name)?)?;
            stats.accuracy_info(&name).update_stats(
                &name,
                minibatches_per_phase,
                minibatch_counter,
                tot_weight,
                tot_accuracy,
                0.0,
            )?;
        }
    }
    Ok(())
}

/// 学習パスの入力一式
pub(crate) struct PassContext<'a> {
    pub kind: PassKind,
    pub scales: PassScales,
    pub max_param_change: f32,
    pub minibatches_per_phase: u64,
    pub minibatch_counter: u64,
    pub computation: &'a NnetComputation,
    pub eg: &'a NnetExample,
}

/// 1 パス分の学習
///
/// 戻り値は更新が適用されたか。途中で失敗した場合は delta を破棄してから
/// エラーを返す。
pub(crate) fn train_pass(
    ctx: &PassContext<'_>,
    nnet: &mut Nnet,
    delta: &mut Nnet,
    output_stats: &mut OutputStats,
    max_change_stats: &mut MaxChangeStats,
) -> TrainResult<bool> {
    if let Err(e) = forward_backward(ctx, nnet, delta, output_stats) {
        delta.scale(0.0);
        return Err(e);
    }

    let scales = ctx.scales;
    let success = update_nnet_with_max_change(
        delta,
        ctx.max_param_change,
        scales.max_change_scale,
        scales.scale_adding,
        nnet,
        max_change_stats,
    );
    if success {
        delta.scale(scales.scale_delta_nnet);
    } else {
        delta.scale(0.0);
    }
    Ok(success)
}

fn forward_backward(
    ctx: &PassContext<'_>,
    nnet: &Nnet,
    delta: &mut Nnet,
    output_stats: &mut OutputStats,
) -> TrainResult<()> {
    let mut computer = NnetComputer::new(ctx.computation, nnet, Some(delta));
    computer.accept_inputs(nnet, &ctx.eg.io)?;
    computer.run()?;
    process_outputs(
        ctx.kind.stats_suffix(),
        ctx.eg,
        nnet,
        &mut computer,
        output_stats,
        ctx.minibatches_per_phase,
        ctx.minibatch_counter,
    )?;
    computer.run()?;
    Ok(())
}
