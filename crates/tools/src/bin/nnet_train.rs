//! ミニバッチ学習ドライバ
//!
//! ネットワーク構成（TOML）と学習設定（TOML）を読み込み、サンプルを
//! 1 ミニバッチずつ `NnetTrainer` に流す。サンプルは JSON lines
//! （`.gz` 可）から読むか、`--egs` 省略時は合成分類タスクから作る。
//!
//! Ctrl-C で中断した場合も統計の出力と計算キャッシュの書き出しは行う。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use nnet_core::{Nnet, NnetConfig, NnetExample};
use nnet_train::{NnetTrainer, NnetTrainerOptions};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tools::egs::{SyntheticTask, read_egs};

#[derive(Parser, Debug)]
#[command(name = "nnet_train")]
#[command(about = "Train a network one minibatch at a time (momentum, max-change, backstitch)")]
struct Cli {
    /// ネットワーク構成ファイル（TOML）
    #[arg(long)]
    nnet_config: PathBuf,

    /// 学習設定ファイル（TOML、省略時は既定値）
    #[arg(long)]
    trainer_config: Option<PathBuf>,

    /// 学習サンプル（JSON lines、.gz 可、`-` で標準入力）
    #[arg(long)]
    egs: Option<PathBuf>,

    /// 読み込むサンプル数の上限
    #[arg(long)]
    limit: Option<usize>,

    /// サンプル全体を何周するか
    #[arg(long, default_value_t = 1)]
    epochs: usize,

    /// 計算キャッシュの読み込み元（学習設定より優先）
    #[arg(long)]
    read_cache: Option<PathBuf>,

    /// 計算キャッシュの書き出し先（学習設定より優先）
    #[arg(long)]
    write_cache: Option<PathBuf>,

    /// パラメータ初期化と合成データのシード
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// 合成タスクのミニバッチ数（--egs 省略時）
    #[arg(long, default_value_t = 200)]
    num_minibatches: usize,

    /// 合成タスクのミニバッチあたり行数（--egs 省略時）
    #[arg(long, default_value_t = 16)]
    minibatch_size: usize,

    /// 合成タスクの入力ノイズ幅（--egs 省略時）
    #[arg(long, default_value_t = 0.3)]
    noise: f32,
}

fn load_options(cli: &Cli) -> Result<NnetTrainerOptions> {
    let mut options = match &cli.trainer_config {
        Some(path) => NnetTrainerOptions::load(path)
            .with_context(|| format!("Failed to load trainer config {}", path.display()))?,
        None => NnetTrainerOptions::default(),
    };
    if cli.read_cache.is_some() {
        options.read_cache = cli.read_cache.clone();
    }
    if cli.write_cache.is_some() {
        options.write_cache = cli.write_cache.clone();
    }
    options.validate().context("Invalid trainer config")?;
    Ok(options)
}

fn load_egs(cli: &Cli, nnet: &Nnet, rng: &mut ChaCha8Rng) -> Result<Vec<NnetExample>> {
    if let Some(path) = &cli.egs {
        return read_egs(path, cli.limit);
    }
    if cli.minibatch_size == 0 {
        bail!("--minibatch-size must be >= 1");
    }
    let task = SyntheticTask::for_nnet(nnet, cli.noise, rng)?;
    let count = cli.limit.map_or(cli.num_minibatches, |n| n.min(cli.num_minibatches));
    log::info!(
        "Synthesising {count} minibatches of {} rows ({} classes, input dim {})",
        cli.minibatch_size,
        task.num_classes(),
        task.input_dim()
    );
    task.generate(count, cli.minibatch_size, rng)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let options = load_options(&cli)?;

    let nnet_config = NnetConfig::load(&cli.nnet_config)
        .with_context(|| format!("Failed to load nnet config {}", cli.nnet_config.display()))?;
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let mut nnet = Nnet::from_config(&nnet_config, &mut rng).context("Failed to build nnet")?;
    log::info!(
        "Network: {} components ({} updatable), {} parameters",
        nnet.num_components(),
        nnet.num_updatable_components(),
        nnet.num_parameters()
    );

    let egs = load_egs(&cli, &nnet, &mut rng)?;
    if egs.is_empty() {
        bail!("no examples to train on");
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, finishing current minibatch...");
            flag.store(true, Ordering::SeqCst);
        })
        .ok();
    }

    let perturb = options.perturb_epsilon > 0.0;
    let mut trainer = NnetTrainer::new(options, &mut nnet).context("Failed to create trainer")?;

    let progress = ProgressBar::new((egs.len() * cli.epochs) as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?,
    );

    'epochs: for epoch in 0..cli.epochs {
        for eg in &egs {
            if interrupted.load(Ordering::SeqCst) {
                break 'epochs;
            }
            if perturb {
                let perturbed = trainer.perturb_input_with_input_deriv(eg)?;
                trainer.train(&perturbed)?;
            } else {
                trainer.train(eg)?;
            }
            progress.set_message(format!("epoch {}", epoch + 1));
            progress.inc(1);
        }
    }
    progress.finish();

    let num_minibatches = trainer.num_minibatches_processed();
    let num_compilations = trainer.compiler().num_compilations();
    let ok = trainer.finish()?;
    log::info!("Processed {num_minibatches} minibatches, {num_compilations} compilations");
    if !ok {
        bail!("no output had nonzero weight");
    }
    Ok(())
}
