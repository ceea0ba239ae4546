//! ミニバッチ学習の制御
//!
//! ネットワーク本体・delta・統計・計算キャッシュなど、ミニバッチをまたいで
//! 持ち越す状態を保持し、1 サンプルごとの学習を行う。

use crate::config::NnetTrainerOptions;
use crate::error::TrainResult;
use crate::max_change::MaxChangeStats;
use crate::stats::OutputStats;
use crate::step::{NaturalGradientFreeze, PassContext, PassKind, process_outputs, train_pass};
use nnet_core::{
    CachingCompiler, GeneralMatrix, Nnet, NnetComputation, NnetComputer, NnetExample,
    get_computation_request,
};
use rand::Rng;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind};

/// 乱数シードを自動で選ぶときの上限
const MAX_RANDOM_SEED: u64 = 100_000;

/// ミニバッチ学習の制御
///
/// ネットワークは構築時から drop まで排他的に借用する。
/// drop 時、`write_cache` が設定されていて未書き出しなら計算キャッシュを書き出す。
pub struct NnetTrainer<'a> {
    config: NnetTrainerOptions,
    nnet: &'a mut Nnet,
    /// 勾配の蓄積先（パラメータ形状はネットワークと同じ）
    delta: Nnet,
    compiler: CachingCompiler,
    output_stats: OutputStats,
    max_change_stats: MaxChangeStats,
    num_minibatches_processed: u64,
    srand_seed: u64,
    cache_written: bool,
}

impl<'a> NnetTrainer<'a> {
    pub fn new(config: NnetTrainerOptions, nnet: &'a mut Nnet) -> TrainResult<Self> {
        config.validate()?;
        if config.zero_component_stats {
            nnet.zero_component_stats();
        }
        let mut delta = nnet.clone();
        delta.scale(0.0);
        let max_change_stats = MaxChangeStats::new(delta.num_updatable_components());

        let mut compiler = CachingCompiler::new(nnet);
        if let Some(path) = &config.read_cache {
            match File::open(path) {
                Ok(file) => {
                    let n = compiler.read_cache(BufReader::new(file))?;
                    log::info!(
                        "Read computation cache from {} ({n} computations)",
                        path.display()
                    );
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    log::warn!(
                        "Could not open cached computation {}. Probably this is the first training iteration.",
                        path.display()
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        let srand_seed = config
            .srand_seed
            .unwrap_or_else(|| rand::rng().random_range(0..=MAX_RANDOM_SEED));

        Ok(Self {
            config,
            nnet,
            delta,
            compiler,
            output_stats: OutputStats::new(),
            max_change_stats,
            num_minibatches_processed: 0,
            srand_seed,
            cache_written: false,
        })
    }

    /// 1 サンプル（ミニバッチ）分の学習
    pub fn train(&mut self, eg: &NnetExample) -> TrainResult<()> {
        let request =
            get_computation_request(self.nnet, eg, true, self.config.store_component_stats)?;
        let computation = self.compiler.compile(self.nnet, &request)?;

        if self.is_backstitch_minibatch() {
            let seed = self.srand_seed.wrapping_add(self.num_minibatches_processed);
            {
                let mut delta = NaturalGradientFreeze::new(&mut self.delta);
                self.nnet.reset_generators(seed);
                let ctx = pass_context(
                    &self.config,
                    PassKind::BackstitchNegative,
                    self.num_minibatches_processed,
                    &computation,
                    eg,
                );
                train_pass(
                    &ctx,
                    self.nnet,
                    &mut delta,
                    &mut self.output_stats,
                    &mut self.max_change_stats,
                )?;
            }
            self.nnet.reset_generators(seed);
            let ctx = pass_context(
                &self.config,
                PassKind::BackstitchPositive,
                self.num_minibatches_processed,
                &computation,
                eg,
            );
            train_pass(
                &ctx,
                self.nnet,
                &mut self.delta,
                &mut self.output_stats,
                &mut self.max_change_stats,
            )?;
        } else {
            let ctx = pass_context(
                &self.config,
                PassKind::Conventional,
                self.num_minibatches_processed,
                &computation,
                eg,
            );
            train_pass(
                &ctx,
                self.nnet,
                &mut self.delta,
                &mut self.output_stats,
                &mut self.max_change_stats,
            )?;
        }

        self.num_minibatches_processed += 1;
        Ok(())
    }

    /// このミニバッチで backstitch を行うか
    fn is_backstitch_minibatch(&self) -> bool {
        self.config.backstitch_enabled()
            && self.num_minibatches_processed % self.config.backstitch_training_interval == 0
    }

    /// 入力微分の方向に入力を摂動したサンプルを返す
    ///
    /// 微分は系列ブロックごとに（全入力ノードをまとめた）L2 ノルムで正規化し、
    /// `features - perturb_epsilon * deriv` を新しい入力とする。ネットワーク本体は
    /// 変更しない。出力の目的関数は通常のパスと同じ名前で統計に記録する。
    pub fn perturb_input_with_input_deriv(&mut self, eg: &NnetExample) -> TrainResult<NnetExample> {
        let mut request =
            get_computation_request(self.nnet, eg, true, self.config.store_component_stats)?;
        for input in &mut request.inputs {
            input.has_deriv = true;
        }
        let computation = self.compiler.compile(self.nnet, &request)?;

        let nnet: &Nnet = &*self.nnet;
        let mut scratch = nnet.clone();
        let mut computer = NnetComputer::new(&computation, nnet, Some(&mut scratch));
        computer.accept_inputs(nnet, &eg.io)?;
        computer.run()?;
        process_outputs(
            "",
            eg,
            nnet,
            &mut computer,
            &mut self.output_stats,
            self.config.print_interval,
            self.num_minibatches_processed,
        )?;
        computer.run()?;

        let minibatch_size = eg.minibatch_size.max(1);
        let mut deriv_norm_sqr = vec![0.0f32; minibatch_size];
        for io in eg.io.iter().filter(|io| nnet.is_input_node(&io.name)) {
            let deriv = computer.get_output(&io.name)?;
            let block_size = io.features.num_rows() / minibatch_size;
            for (j, sqr) in deriv_norm_sqr.iter_mut().enumerate() {
                let norm = deriv.row_range_norm(j * block_size, block_size);
                *sqr += norm * norm;
            }
        }

        let mut perturbed = eg.clone();
        for io in perturbed.io.iter_mut() {
            if !nnet.is_input_node(&io.name) {
                continue;
            }
            let mut deriv = computer.get_output_destructive(&io.name)?;
            let block_size = io.features.num_rows() / minibatch_size;
            for (j, &sqr) in deriv_norm_sqr.iter().enumerate() {
                if sqr != 0.0 {
                    deriv.scale_row_range(j * block_size, block_size, 1.0 / sqr.sqrt());
                }
            }
            let mut input = io.features.to_dense();
            input.add_mat(-self.config.perturb_epsilon, &deriv);
            io.features = GeneralMatrix::Full(input);
        }
        Ok(perturbed)
    }

    /// 全出力の総計と max-change の適用率をログに出力する
    ///
    /// いずれかの出力の重みが 0 でなければ `true`。
    pub fn print_total_stats(&self) -> bool {
        let ans = self.output_stats.print_total_stats();
        self.print_max_change_stats();
        ans
    }

    /// max-change の適用率をログに出力する
    pub fn print_max_change_stats(&self) {
        self.max_change_stats.print(&self.delta);
    }

    /// 計算キャッシュを書き出す（`write_cache` 未設定なら何もしない）
    ///
    /// 書き出しに成功すると drop 時には再度書き出さない。
    pub fn write_cache(&mut self) -> TrainResult<()> {
        let Some(path) = &self.config.write_cache else {
            return Ok(());
        };
        let file = File::create(path)?;
        self.compiler
            .write_cache(BufWriter::new(file), self.config.binary_write_cache)?;
        self.cache_written = true;
        log::info!("Wrote computation cache to {}", path.display());
        Ok(())
    }

    /// 学習の終了処理
    ///
    /// 計算キャッシュを書き出し、総計を出力する。戻り値は [`Self::print_total_stats`] と同じ。
    pub fn finish(mut self) -> TrainResult<bool> {
        self.write_cache()?;
        Ok(self.print_total_stats())
    }

    pub fn config(&self) -> &NnetTrainerOptions {
        &self.config
    }

    pub fn nnet(&self) -> &Nnet {
        &*self.nnet
    }

    pub fn delta(&self) -> &Nnet {
        &self.delta
    }

    pub fn compiler(&self) -> &CachingCompiler {
        &self.compiler
    }

    pub fn output_stats(&self) -> &OutputStats {
        &self.output_stats
    }

    pub fn max_change_stats(&self) -> &MaxChangeStats {
        &self.max_change_stats
    }

    pub fn num_minibatches_processed(&self) -> u64 {
        self.num_minibatches_processed
    }

    pub fn srand_seed(&self) -> u64 {
        self.srand_seed
    }
}

impl Drop for NnetTrainer<'_> {
    fn drop(&mut self) {
        if self.cache_written || self.config.write_cache.is_none() {
            return;
        }
        if let Err(e) = self.write_cache() {
            log::warn!("Failed to write computation cache: {e}");
        }
    }
}

fn pass_context<'c>(
    config: &NnetTrainerOptions,
    kind: PassKind,
    minibatch_counter: u64,
    computation: &'c NnetComputation,
    eg: &'c NnetExample,
) -> PassContext<'c> {
    PassContext {
        kind,
        scales: kind.scales(config.momentum, config.backstitch_training_scale),
        max_param_change: config.max_param_change,
        minibatches_per_phase: config.print_interval,
        minibatch_counter,
        computation,
        eg,
    }
}
