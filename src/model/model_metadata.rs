//! チェックポイントのメタデータ
//!
//! tar.gz形式のチェックポイントに `metadata.json` として保存されます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// チェックポイントのメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: 分類器全体の重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// バックボーン名（例: "efficientnet-b0", "resnet18"）
    pub encoder: String,

    /// 二値分類か
    pub binary: bool,

    /// 出力ロジット数（1 または 7）
    pub num_outputs: usize,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// パラメータ総数
    #[serde(default)]
    pub num_params: usize,

    /// 実験名
    pub experiment: String,

    /// データセット名
    pub dataset: String,

    /// 乱数シード
    pub seed: u64,

    /// 保存時刻（RFC 3339）
    pub saved_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        encoder: String,
        binary: bool,
        num_outputs: usize,
        image_size: usize,
        num_params: usize,
        experiment: String,
        dataset: String,
        seed: u64,
    ) -> Self {
        Self {
            encoder,
            binary,
            num_outputs,
            image_size,
            num_params,
            experiment,
            dataset,
            seed,
            saved_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// 実験設定からメタデータを作成
    pub fn from_settings(settings: &Settings, num_outputs: usize, num_params: usize) -> Self {
        Self::new(
            settings.encoder.to_string(),
            settings.binary,
            num_outputs,
            settings.image_size,
            num_params,
            settings.experiment.clone(),
            settings.dataset.clone(),
            settings.seed,
        )
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
