//! nnet-train: ミニバッチ単位の学習制御
//!
//! 1 サンプルごとに順伝播・逆伝播を行い、momentum と max-change を適用して
//! パラメータを更新する。backstitch（負方向のパスの後に拡大した正方向のパス）にも対応する。
//!
//! - [`trainer`]: 学習制御本体 [`NnetTrainer`]
//! - [`step`]: 1 パス分の処理と natural gradient の凍結ガード
//! - [`max_change`]: max-change 付きの更新
//! - [`objective`]: 目的関数と正解率
//! - [`stats`]: フェーズごとの統計

pub mod config;
pub mod error;
pub mod max_change;
pub mod objective;
pub mod stats;
pub mod step;
pub mod trainer;

pub use config::NnetTrainerOptions;
pub use error::{TrainError, TrainResult};
pub use max_change::{MaxChangeStats, update_nnet_with_max_change};
pub use objective::{ObjectiveValue, compute_accuracy, compute_objective_function};
pub use stats::{ObjectiveFunctionInfo, OutputStats, PhaseSummary};
pub use step::{NaturalGradientFreeze, PassKind, PassScales};
pub use trainer::NnetTrainer;
