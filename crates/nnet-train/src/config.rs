//! 学習制御の設定

use crate::error::{TrainError, TrainResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 学習制御の設定
///
/// 単独の TOML ファイルとして読み込む。未知のキーはエラーにする。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NnetTrainerOptions {
    /// 構築時にネットワークの既存統計をゼロにする
    pub zero_component_stats: bool,
    /// 順伝播時にコンポーネント統計を蓄積する
    pub store_component_stats: bool,
    /// 統計を集計・出力するミニバッチ数（フェーズ長）
    pub print_interval: u64,
    /// モメンタム（0 以上）
    pub momentum: f32,
    /// 全体の max-change（0 なら無効）
    pub max_param_change: f32,
    /// backstitch のスケール（0 なら無効）
    pub backstitch_training_scale: f32,
    /// backstitch を行うミニバッチ間隔
    pub backstitch_training_interval: u64,
    /// 計算キャッシュの読み込み元
    pub read_cache: Option<PathBuf>,
    /// 計算キャッシュの書き出し先
    pub write_cache: Option<PathBuf>,
    /// 計算キャッシュをバイナリ形式で書き出す
    pub binary_write_cache: bool,
    /// 入力摂動のステップ幅
    pub perturb_epsilon: f32,
    /// 乱数シード（未指定なら 0..=100000 から選ぶ）
    pub srand_seed: Option<u64>,
}

impl Default for NnetTrainerOptions {
    fn default() -> Self {
        Self {
            zero_component_stats: true,
            store_component_stats: true,
            print_interval: 100,
            momentum: 0.0,
            max_param_change: 2.0,
            backstitch_training_scale: 0.0,
            backstitch_training_interval: 1,
            read_cache: None,
            write_cache: None,
            binary_write_cache: true,
            perturb_epsilon: 0.0,
            srand_seed: None,
        }
    }
}

impl NnetTrainerOptions {
    pub fn from_toml_str(s: &str) -> TrainResult<Self> {
        let options: Self = toml::from_str(s)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// backstitch が有効か
    pub fn backstitch_enabled(&self) -> bool {
        self.backstitch_training_scale > 0.0
    }

    /// 設定値の検証
    pub fn validate(&self) -> TrainResult<()> {
        fn bad(msg: String) -> TrainResult<()> {
            Err(TrainError::InvalidConfig(msg))
        }
        // NaN も弾くため否定形で比較する
        if !(self.momentum >= 0.0) {
            return bad(format!("momentum must be >= 0, got {}", self.momentum));
        }
        if !(self.max_param_change >= 0.0) {
            return bad(format!("max_param_change must be >= 0, got {}", self.max_param_change));
        }
        if !(self.backstitch_training_scale >= 0.0) {
            return bad(format!(
                "backstitch_training_scale must be >= 0, got {}",
                self.backstitch_training_scale
            ));
        }
        if !(self.perturb_epsilon >= 0.0) {
            return bad(format!("perturb_epsilon must be >= 0, got {}", self.perturb_epsilon));
        }
        if self.print_interval == 0 {
            return bad("print_interval must be >= 1".to_string());
        }
        if self.backstitch_training_interval == 0 {
            return bad("backstitch_training_interval must be >= 1".to_string());
        }
        if self.backstitch_enabled() && self.momentum != 0.0 {
            return bad(format!(
                "backstitch training is incompatible with momentum > 0 (momentum = {})",
                self.momentum
            ));
        }
        Ok(())
    }
}
