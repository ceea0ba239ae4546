//! 学習制御のエラー型

use nnet_core::NnetError;

/// 学習制御のエラー
///
/// いずれも致命的で、呼び出し側は学習を中止する想定。
/// 数値的に退化した更新のスキップと計算キャッシュの欠如はエラーにせず警告で処理する。
#[derive(thiserror::Error, Debug)]
pub enum TrainError {
    /// 設定値の違反（構築時に検出）
    #[error("invalid trainer config: {0}")]
    InvalidConfig(String),

    /// 統計のフェーズ番号が後退した
    #[error("phase for '{name}' went backwards: {current} -> {requested}")]
    PhaseRegression {
        name: String,
        current: u64,
        requested: u64,
    },

    /// ネットワーク・コンパイラ・実行エンジン側のエラー
    #[error(transparent)]
    Nnet(#[from] NnetError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// 学習制御の Result 型
pub type TrainResult<T> = Result<T, TrainError>;
