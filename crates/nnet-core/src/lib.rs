//! nnet-core: 学習制御が利用するネットワーク側の部品
//!
//! - [`nnet`] / [`components`]: ネットワーク構造とコンポーネント
//! - [`compiler`]: 計算リクエストのコンパイルとキャッシュ
//! - [`computer`]: 参照実装の実行エンジン
//! - [`matrix`] / [`general_matrix`]: 数値コンテナ

pub mod compiler;
pub mod components;
pub mod computer;
pub mod error;
pub mod example;
pub mod general_matrix;
pub mod matrix;
pub mod nnet;
pub mod nnet_config;

pub use compiler::{
    CachingCompiler, ComputationRequest, IoSpecification, NnetComputation, get_computation_request,
};
pub use components::{Component, UpdatableComponent};
pub use computer::NnetComputer;
pub use error::{NnetError, NnetResult};
pub use example::{NnetExample, NnetIo};
pub use general_matrix::{CompressedMatrix, GeneralMatrix, SparseMatrix};
pub use matrix::Matrix;
pub use nnet::{InputNode, Nnet, NodeKind, ObjectiveType, OutputNode};
pub use nnet_config::NnetConfig;
