//! チェックポイントからの推論

use anyhow::{Context, Result};
use std::path::Path;
use burn::tensor::{backend::Backend, Tensor};

use crate::ml::{load_and_normalize_image, ClassifierModel, EncoderKind, ImageClassifier, WeightStore};
use crate::model::{load_checkpoint, ModelMetadata};

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: ClassifierModel<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// チェックポイントを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(checkpoint_path: P, device: &B::Device) -> Result<Self> {
        let (metadata, weights) = load_checkpoint(checkpoint_path.as_ref())?;
        let encoder: EncoderKind = metadata
            .encoder
            .parse()
            .with_context(|| format!("Invalid encoder in checkpoint: {}", metadata.encoder))?;

        // 重みは直後に上書きするのでランダム初期化で構築する
        let model = ClassifierModel::new(
            encoder,
            metadata.binary,
            false,
            device,
            &WeightStore::default(),
        )?;
        let model = model
            .load_bytes(weights, device)
            .context("Failed to restore classifier weights")?;

        if model.num_outputs() != metadata.num_outputs {
            anyhow::bail!(
                "Checkpoint metadata expects {} outputs but the model has {}",
                metadata.num_outputs,
                model.num_outputs()
            );
        }

        tracing::info!(
            "[Inference] {} を読み込みました ({} パラメータ)",
            metadata.encoder,
            model.num_params()
        );

        Ok(Self {
            model,
            metadata,
            device: device.clone(),
        })
    }

    /// 画像バッチのロジット
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.model.forward(images)
    }

    /// 単一画像のロジット
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Vec<f32>> {
        let size = self.metadata.image_size;
        let image_data = load_and_normalize_image(image_path.as_ref(), size)?;

        // Tensorに変換 [1, 3, size, size]
        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device)
            .reshape([1, 3, size, size]);

        self.forward(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
    }

    pub fn model(&self) -> &ClassifierModel<B> {
        &self.model
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}
