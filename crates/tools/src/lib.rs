//! nnet 学習ツール群の共通ライブラリ
//!
//! - [`common::io`]: gzip 対応のファイル入出力
//! - [`egs`]: 学習サンプル（JSON lines）の読み書きと合成

pub mod common;
pub mod egs;
