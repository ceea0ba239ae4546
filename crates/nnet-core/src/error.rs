//! nnet-core のエラー型
//!
//! 形状・名前解決の違反は呼び出し側/データのバグとして扱い、
//! すべて `Err` として返す（その場でのスキップはしない）。

/// ネットワーク・コンパイラ・実行エンジンのエラー
#[derive(thiserror::Error, Debug)]
pub enum NnetError {
    /// 行列の次元不一致
    #[error("dimension mismatch for '{name}': {actual} (got) vs. {expected} (expected)")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// ネットワークに存在しないノード名
    #[error("no node named '{0}' in nnet")]
    UnknownNode(String),

    /// 入力ノードではない
    #[error("node '{0}' is not an input node")]
    NotAnInputNode(String),

    /// 出力ノードではない
    #[error("node '{0}' is not an output node")]
    NotAnOutputNode(String),

    /// 未対応の目的関数種別
    #[error("objective function type '{0}' not handled")]
    UnsupportedObjective(String),

    /// 未知のコンポーネント種別
    #[error("unknown component type '{0}'")]
    UnknownComponent(String),

    /// ネットワーク設定の不整合
    #[error("invalid network config: {0}")]
    InvalidConfig(String),

    /// 実行エンジンの呼び出し順序違反
    #[error("computation stage error: {0}")]
    ComputationStage(&'static str),

    /// 入力（または出力微分）が与えられていない
    #[error("missing input for '{0}'")]
    MissingInput(String),

    /// 出力が存在しない（未計算または取り出し済み）
    #[error("no output available for '{0}'")]
    MissingOutput(String),

    /// 計算キャッシュのフォーマット不正
    #[error("computation cache format error: {0}")]
    CacheFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// nnet-core 操作の Result 型
pub type NnetResult<T> = Result<T, NnetError>;
