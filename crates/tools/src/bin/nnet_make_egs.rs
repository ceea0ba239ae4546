//! 合成学習サンプル生成ツール
//!
//! ネットワーク構成から入力次元とクラス数を取り、合成分類タスクの
//! ミニバッチを JSON lines（出力パスが `.gz` なら gzip）で書き出す。

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use nnet_core::{Nnet, NnetConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tools::egs::{SyntheticTask, write_egs};

#[derive(Parser, Debug)]
#[command(name = "nnet_make_egs")]
#[command(about = "Write synthetic classification minibatches as JSON lines")]
struct Cli {
    /// ネットワーク構成ファイル（TOML）
    #[arg(long)]
    nnet_config: PathBuf,

    /// 出力ファイル（.gz で gzip、`-` で標準出力）
    #[arg(short, long)]
    output: PathBuf,

    /// ミニバッチ数
    #[arg(long, default_value_t = 1000)]
    num_minibatches: usize,

    /// ミニバッチあたり行数
    #[arg(long, default_value_t = 16)]
    minibatch_size: usize,

    /// 入力ノイズ幅
    #[arg(long, default_value_t = 0.3)]
    noise: f32,

    /// 入力を 8bit 圧縮行列で保存する
    #[arg(long, default_value_t = false)]
    compress: bool,

    /// クラス中心とサンプルのシード
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    if cli.minibatch_size == 0 {
        bail!("--minibatch-size must be >= 1");
    }

    let nnet_config = NnetConfig::load(&cli.nnet_config)
        .with_context(|| format!("Failed to load nnet config {}", cli.nnet_config.display()))?;
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let nnet = Nnet::from_config(&nnet_config, &mut rng).context("Failed to build nnet")?;

    let task = SyntheticTask::for_nnet(&nnet, cli.noise, &mut rng)?
        .with_compressed_inputs(cli.compress);
    let egs = task.generate(cli.num_minibatches, cli.minibatch_size, &mut rng)?;
    write_egs(&cli.output, &egs)
}
