//! 分類モデル構築時のエラー

use std::path::PathBuf;
use thiserror::Error;

/// バックボーンの構築・重み読み込みで発生するエラー
#[derive(Debug, Error)]
pub enum ModelError {
    /// 未対応のバックボーン名
    #[error("unknown backbone '{0}' (expected efficientnet-b0..b8 or resnet18/34/50/101/152)")]
    UnknownBackbone(String),

    /// 事前学習済み重みファイルが見つからない
    #[error("pretrained weights for '{name}' not found at {path:?}")]
    MissingWeights { name: String, path: PathBuf },

    /// 重みのシリアライズ・デシリアライズに失敗
    #[error("failed to record weights for '{name}': {message}")]
    Record { name: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
