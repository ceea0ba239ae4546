//! 出力ごとの目的関数統計
//!
//! `minibatch_counter / minibatches_per_phase` が変わるたびに直前フェーズの平均を
//! ログへ出し、フェーズ内の和をリセットする。学習全体の和は別に保持する。

use crate::error::{TrainError, TrainResult};
use std::collections::BTreeMap;

/// 1 フェーズ分の集計結果
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSummary {
    /// 最初のミニバッチ番号
    pub start_minibatch: u64,
    /// 集計したフェーズの最後のミニバッチ番号（含む）
    pub end_minibatch: u64,
    /// 実際に集計したミニバッチ数
    pub num_minibatches: u64,
    pub weight: f64,
    pub objf: f64,
    pub aux_objf: f64,
}

impl PhaseSummary {
    /// 重み当たりの目的関数値（重み 0 なら `None`）
    pub fn average_objf(&self) -> Option<f64> {
        (self.weight != 0.0).then(|| self.objf / self.weight)
    }

    pub fn average_aux_objf(&self) -> Option<f64> {
        (self.weight != 0.0).then(|| self.aux_objf / self.weight)
    }
}

/// 出力 1 つ分の統計
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectiveFunctionInfo {
    current_phase: u64,
    minibatches_this_phase: u64,
    tot_weight_this_phase: f64,
    tot_objf_this_phase: f64,
    tot_aux_objf_this_phase: f64,
    tot_weight: f64,
    tot_objf: f64,
    tot_aux_objf: f64,
}

impl ObjectiveFunctionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1 ミニバッチ分の統計を加える
    ///
    /// フェーズが切り替わった場合は直前フェーズの集計を返す（ログにも出力する）。
    /// フェーズ番号が減少した場合はエラー。
    pub fn update_stats(
        &mut self,
        output_name: &str,
        minibatches_per_phase: u64,
        minibatch_counter: u64,
        this_minibatch_weight: f32,
        this_minibatch_tot_objf: f32,
        this_minibatch_tot_aux_objf: f32,
    ) -> TrainResult<Option<PhaseSummary>> {
        let minibatches_per_phase = minibatches_per_phase.max(1);
        let phase = minibatch_counter / minibatches_per_phase;
        let mut summary = None;
        if phase != self.current_phase {
            if phase < self.current_phase {
                return Err(TrainError::PhaseRegression {
                    name: output_name.to_string(),
                    current: self.current_phase,
                    requested: phase,
                });
            }
            let s = PhaseSummary {
                start_minibatch: self.current_phase * minibatches_per_phase,
                end_minibatch: (self.current_phase + 1) * minibatches_per_phase - 1,
                num_minibatches: self.minibatches_this_phase,
                weight: self.tot_weight_this_phase,
                objf: self.tot_objf_this_phase,
                aux_objf: self.tot_aux_objf_this_phase,
            };
            log_phase_summary(output_name, minibatches_per_phase, &s);
            summary = Some(s);
            self.current_phase = phase;
            self.minibatches_this_phase = 0;
            self.tot_weight_this_phase = 0.0;
            self.tot_objf_this_phase = 0.0;
            self.tot_aux_objf_this_phase = 0.0;
        }
        self.minibatches_this_phase += 1;
        self.tot_weight_this_phase += this_minibatch_weight as f64;
        self.tot_objf_this_phase += this_minibatch_tot_objf as f64;
        self.tot_aux_objf_this_phase += this_minibatch_tot_aux_objf as f64;
        self.tot_weight += this_minibatch_weight as f64;
        self.tot_objf += this_minibatch_tot_objf as f64;
        self.tot_aux_objf += this_minibatch_tot_aux_objf as f64;
        Ok(summary)
    }

    /// 学習全体の平均をログに出力し、重みが 0 でなかったかを返す
    pub fn print_total_stats(&self, name: &str) -> bool {
        if self.tot_weight == 0.0 {
            log::warn!("Total weight for '{name}' is zero; no objective function to report.");
            return false;
        }
        let objf = self.tot_objf / self.tot_weight;
        let aux_objf = self.tot_aux_objf / self.tot_weight;
        if aux_objf == 0.0 {
            log::info!(
                "Overall average objective function for '{name}' is {objf} over {} frames.",
                self.tot_weight
            );
        } else {
            log::info!(
                "Overall average objective function for '{name}' is {objf} + {aux_objf} = {} over {} frames.",
                objf + aux_objf,
                self.tot_weight
            );
        }
        log::info!("[this line is to be parsed by a script:] log-prob-per-frame={objf}");
        true
    }

    pub fn current_phase(&self) -> u64 {
        self.current_phase
    }

    pub fn tot_weight(&self) -> f64 {
        self.tot_weight
    }

    pub fn tot_objf(&self) -> f64 {
        self.tot_objf
    }

    pub fn tot_aux_objf(&self) -> f64 {
        self.tot_aux_objf
    }

    /// 学習全体の重み当たり目的関数値（重み 0 なら `None`）
    pub fn average_objf(&self) -> Option<f64> {
        (self.tot_weight != 0.0).then(|| self.tot_objf / self.tot_weight)
    }
}

/// 出力名ごとの目的関数・正解率の統計
#[derive(Debug, Clone, Default)]
pub struct OutputStats {
    objf_info: BTreeMap<String, ObjectiveFunctionInfo>,
    accuracy_info: BTreeMap<String, ObjectiveFunctionInfo>,
}

impl OutputStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 目的関数の統計（無ければ作成）
    pub fn objf_info(&mut self, name: &str) -> &mut ObjectiveFunctionInfo {
        self.objf_info.entry(name.to_string()).or_default()
    }

    /// 正解率の統計（無ければ作成）
    pub fn accuracy_info(&mut self, name: &str) -> &mut ObjectiveFunctionInfo {
        self.accuracy_info.entry(name.to_string()).or_default()
    }

    pub fn get_objf_info(&self, name: &str) -> Option<&ObjectiveFunctionInfo> {
        self.objf_info.get(name)
    }

    pub fn get_accuracy_info(&self, name: &str) -> Option<&ObjectiveFunctionInfo> {
        self.accuracy_info.get(name)
    }

    /// 目的関数の統計を持つ出力名
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objf_info.keys().map(String::as_str)
    }

    /// 全出力の総計をログに出力
    ///
    /// いずれかの出力（目的関数または正解率）の重みが 0 でなければ `true`。
    pub fn print_total_stats(&self) -> bool {
        let mut ans = false;
        for (name, info) in &self.objf_info {
            ans |= info.print_total_stats(name);
        }
        if !self.accuracy_info.is_empty() {
            log::info!("The following line is for accuracy.");
            for (name, info) in &self.accuracy_info {
                ans |= info.print_total_stats(name);
            }
        }
        ans
    }
}

fn log_phase_summary(name: &str, minibatches_per_phase: u64, s: &PhaseSummary) {
    let range = if s.num_minibatches == minibatches_per_phase {
        format!("for minibatches {}-{}", s.start_minibatch, s.end_minibatch)
    } else {
        format!(
            "using {} minibatches in minibatch range {}-{}",
            s.num_minibatches, s.start_minibatch, s.end_minibatch
        )
    };
    let (Some(objf), Some(aux)) = (s.average_objf(), s.average_aux_objf()) else {
        log::warn!("Objective function for '{name}' {range} has zero weight.");
        return;
    };
    if s.aux_objf == 0.0 {
        log::info!(
            "Average objective function for '{name}' {range} is {objf} over {} frames.",
            s.weight
        );
    } else {
        log::info!(
            "Average objective function for '{name}' {range} is {objf} + {aux} = {} over {} frames.",
            objf + aux,
            s.weight
        );
    }
}
