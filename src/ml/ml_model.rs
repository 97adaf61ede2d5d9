//! 分類モデルの共通定義
//!
//! バックボーン（EfficientNet / ResNet）にプーリング・隠れ層・出力層を
//! 付けた画像分類器を提供します。出力は正規化前のロジットで、
//! softmax / sigmoid は損失関数側に任せます。

use burn::{
    config::Config,
    module::Module,
    nn::{Linear, LinearConfig},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        activation::{relu, silu},
        backend::Backend,
        Tensor,
    },
};

use crate::ml::efficientnet::{EfficientNet, EfficientNetConfig};
use crate::ml::encoder::{EncoderKind, FeatureEncoder};
use crate::ml::error::ModelError;
use crate::ml::resnet::{ResNet, ResNetConfig};
use crate::ml::weights::WeightStore;

/// 多クラス分類のクラス数
pub const NUM_CLASSES: usize = 7;

/// 隠れ層の幅
pub const HIDDEN_WIDTH: usize = 512;

/// ImageNetの平均
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNetの標準偏差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 出力ロジット数（二値: 1, 多クラス: 7）
pub fn num_outputs(binary: bool) -> usize {
    if binary {
        1
    } else {
        NUM_CLASSES
    }
}

/// 画像バッチからロジットを出す分類器
pub trait ImageClassifier<B: Backend> {
    /// `[batch_size, 3, h, w]` -> `[batch_size, num_outputs]`
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_outputs(&self) -> usize;
}

/// 隠れ層の活性化関数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiddenActivation {
    Silu,
    Relu,
}

/// 分類ヘッド（特徴 -> 512 -> ロジット）
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    hidden: Linear<B>,
    classifier: Linear<B>,
    num_outputs: usize,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(feature_width: usize, binary: bool, device: &B::Device) -> Self {
        let num_outputs = num_outputs(binary);
        Self {
            hidden: LinearConfig::new(feature_width, HIDDEN_WIDTH).init(device),
            classifier: LinearConfig::new(HIDDEN_WIDTH, num_outputs).init(device),
            num_outputs,
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>, activation: HiddenActivation) -> Tensor<B, 2> {
        let x = self.hidden.forward(features);
        let x = match activation {
            HiddenActivation::Silu => silu(x),
            HiddenActivation::Relu => relu(x),
        };
        self.classifier.forward(x)
    }

    /// エンコーダの特徴をヘッドに通す
    pub fn classify<E: FeatureEncoder<B>>(
        &self,
        encoder: &E,
        images: Tensor<B, 4>,
        activation: HiddenActivation,
    ) -> Tensor<B, 2> {
        self.forward(encoder.encode(images), activation)
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }
}

/// EfficientNetエンコーダの分類器設定
#[derive(Config, Debug)]
pub struct CnnClassifierConfig {
    /// 二値分類か
    pub binary: bool,
    /// EfficientNetの複合係数
    #[config(default = 0)]
    pub compound_coefficient: usize,
    /// 事前学習済み重みを使うか
    #[config(default = true)]
    pub pretrained: bool,
}

impl CnnClassifierConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
        weights: &WeightStore,
    ) -> Result<CnnClassifier<B>, ModelError> {
        let kind = EncoderKind::EfficientNet(self.compound_coefficient);
        let encoder = EfficientNetConfig::new()
            .with_compound_coefficient(self.compound_coefficient)
            .init(device)?;
        let encoder = if self.pretrained {
            weights.load(encoder, &kind.weights_name(), device)?
        } else {
            encoder
        };
        let head = ClassifierHead::new(encoder.feature_width(), self.binary, device);

        Ok(CnnClassifier { encoder, head })
    }
}

/// EfficientNetエンコーダの分類器
///
/// # アーキテクチャ
/// - EfficientNet `extract_features`
/// - AdaptiveAvgPool (1x1) + Flatten
/// - FC: feature_width -> 512 + SiLU
/// - FC: 512 -> 1 または 7
#[derive(Module, Debug)]
pub struct CnnClassifier<B: Backend> {
    encoder: EfficientNet<B>,
    head: ClassifierHead<B>,
}

impl<B: Backend> CnnClassifier<B> {
    /// 順伝播
    ///
    /// # 戻り値
    /// - ロジット [batch_size, num_outputs]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head
            .classify(&self.encoder, images, HiddenActivation::Silu)
    }

    pub fn encoder(&self) -> &EfficientNet<B> {
        &self.encoder
    }
}

impl<B: Backend> ImageClassifier<B> for CnnClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        CnnClassifier::forward(self, images)
    }

    fn num_outputs(&self) -> usize {
        self.head.num_outputs()
    }
}

/// ResNetエンコーダの分類器設定
#[derive(Config, Debug)]
pub struct ResNetClassifierConfig {
    /// 二値分類か
    pub binary: bool,
    /// ResNetの層数
    pub num_layers: usize,
    /// 事前学習済み重みを使うか
    #[config(default = true)]
    pub pretrained: bool,
}

impl ResNetClassifierConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
        weights: &WeightStore,
    ) -> Result<ResNetClassifier<B>, ModelError> {
        let kind = EncoderKind::ResNet(self.num_layers);
        let encoder = ResNetConfig::new(self.num_layers).init(device)?;
        let encoder = if self.pretrained {
            weights.load(encoder, &kind.weights_name(), device)?
        } else {
            encoder
        };
        let head = ClassifierHead::new(encoder.feature_width(), self.binary, device);

        Ok(ResNetClassifier { encoder, head })
    }
}

/// ResNetエンコーダの分類器
///
/// # アーキテクチャ
/// - conv1 / bn1 / relu / maxpool / layer1〜4 / avgpool + Flatten
/// - FC: feature_width -> 512 + ReLU
/// - FC: 512 -> 1 または 7
#[derive(Module, Debug)]
pub struct ResNetClassifier<B: Backend> {
    encoder: ResNet<B>,
    head: ClassifierHead<B>,
}

impl<B: Backend> ResNetClassifier<B> {
    /// 順伝播
    ///
    /// # 戻り値
    /// - ロジット [batch_size, num_outputs]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head
            .classify(&self.encoder, images, HiddenActivation::Relu)
    }

    pub fn encoder(&self) -> &ResNet<B> {
        &self.encoder
    }
}

impl<B: Backend> ImageClassifier<B> for ResNetClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        ResNetClassifier::forward(self, images)
    }

    fn num_outputs(&self) -> usize {
        self.head.num_outputs()
    }
}

/// 実行時にバックボーンを選ぶための分類器
#[derive(Debug, Clone)]
pub enum ClassifierModel<B: Backend> {
    Cnn(CnnClassifier<B>),
    ResNet(ResNetClassifier<B>),
}

impl<B: Backend> ClassifierModel<B> {
    /// バックボーンの種類に応じた分類器を作る
    pub fn new(
        encoder: EncoderKind,
        binary: bool,
        pretrained: bool,
        device: &B::Device,
        weights: &WeightStore,
    ) -> Result<Self, ModelError> {
        let model = match encoder.validate()? {
            EncoderKind::EfficientNet(b) => ClassifierModel::Cnn(
                CnnClassifierConfig::new(binary)
                    .with_compound_coefficient(b)
                    .with_pretrained(pretrained)
                    .init(device, weights)?,
            ),
            EncoderKind::ResNet(layers) => ClassifierModel::ResNet(
                ResNetClassifierConfig::new(binary, layers)
                    .with_pretrained(pretrained)
                    .init(device, weights)?,
            ),
        };
        Ok(model)
    }

    pub fn encoder_kind(&self) -> EncoderKind {
        match self {
            ClassifierModel::Cnn(model) => model.encoder().kind(),
            ClassifierModel::ResNet(model) => model.encoder().kind(),
        }
    }

    /// エンコーダのプーリング済み特徴
    pub fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            ClassifierModel::Cnn(model) => model.encoder().encode(images),
            ClassifierModel::ResNet(model) => model.encoder().encode(images),
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            ClassifierModel::Cnn(model) => model.num_params(),
            ClassifierModel::ResNet(model) => model.num_params(),
        }
    }

    /// 全体の重みをバイト列にする（f32精度）
    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let result = match self {
            ClassifierModel::Cnn(model) => {
                Recorder::<B>::record(&recorder, model.clone().into_record(), ())
            }
            ClassifierModel::ResNet(model) => {
                Recorder::<B>::record(&recorder, model.clone().into_record(), ())
            }
        };
        result.map_err(|e| ModelError::Record {
            name: self.encoder_kind().to_string(),
            message: format!("{:?}", e),
        })
    }

    /// [`Self::to_bytes`] の出力から重みを復元する
    pub fn load_bytes(self, bytes: Vec<u8>, device: &B::Device) -> Result<Self, ModelError> {
        let name = self.encoder_kind().to_string();
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record_error = |e| ModelError::Record {
            name: name.clone(),
            message: format!("{:?}", e),
        };

        let model = match self {
            ClassifierModel::Cnn(model) => {
                let record = Recorder::<B>::load(&recorder, bytes, device).map_err(record_error)?;
                ClassifierModel::Cnn(model.load_record(record))
            }
            ClassifierModel::ResNet(model) => {
                let record = Recorder::<B>::load(&recorder, bytes, device).map_err(record_error)?;
                ClassifierModel::ResNet(model.load_record(record))
            }
        };
        Ok(model)
    }
}

impl<B: Backend> ImageClassifier<B> for ClassifierModel<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            ClassifierModel::Cnn(model) => model.forward(images),
            ClassifierModel::ResNet(model) => model.forward(images),
        }
    }

    fn num_outputs(&self) -> usize {
        match self {
            ClassifierModel::Cnn(model) => ImageClassifier::num_outputs(model),
            ClassifierModel::ResNet(model) => ImageClassifier::num_outputs(model),
        }
    }
}

/// 画像を読み込んでリサイズ・正規化
///
/// ImageNetの平均と標準偏差で正規化します。
///
/// # 引数
/// - `path`: 画像ファイルのパス
/// - `image_size`: モデル入力サイズ（正方形）
///
/// # 戻り値
/// - 正規化されたRGB画像データ (C, H, W) の順で平坦化
pub fn load_and_normalize_image(
    path: &std::path::Path,
    image_size: usize,
) -> anyhow::Result<Vec<f32>> {
    let size = image_size as u32;
    let img = image::open(path)?
        .resize_exact(size, size, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let mut data = Vec::with_capacity(3 * image_size * image_size);
    for channel in 0..3 {
        for pixel in img.pixels() {
            let value = pixel[channel] as f32 / 255.0;
            data.push((value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn images(batch_size: usize) -> Tensor<TestBackend, 4> {
        let device = Default::default();
        Tensor::<TestBackend, 4>::ones([batch_size, 3, 32, 32], &device)
    }

    fn to_vec(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    fn random_store() -> WeightStore {
        WeightStore::new("does-not-exist")
    }

    #[test]
    fn test_num_outputs() {
        assert_eq!(num_outputs(true), 1);
        assert_eq!(num_outputs(false), 7);
    }

    #[test]
    fn test_cnn_classifier_output_shape() {
        let device = Default::default();
        for (binary, outputs) in [(true, 1), (false, 7)] {
            let model = CnnClassifierConfig::new(binary)
                .with_pretrained(false)
                .init::<TestBackend>(&device, &random_store())
                .unwrap();
            assert_eq!(ImageClassifier::num_outputs(&model), outputs);
            assert_eq!(model.forward(images(3)).dims(), [3, outputs]);
        }
    }

    #[test]
    fn test_resnet_classifier_output_shape() {
        let device = Default::default();
        for (binary, outputs) in [(true, 1), (false, 7)] {
            let model = ResNetClassifierConfig::new(binary, 18)
                .with_pretrained(false)
                .init::<TestBackend>(&device, &random_store())
                .unwrap();
            assert_eq!(ImageClassifier::num_outputs(&model), outputs);
            assert_eq!(model.forward(images(3)).dims(), [3, outputs]);
        }
    }

    #[test]
    fn test_output_rows_follow_batch_size() {
        let device = Default::default();
        for encoder in [EncoderKind::EfficientNet(0), EncoderKind::ResNet(18)] {
            let model = ClassifierModel::<TestBackend>::new(encoder, false, false, &device, &random_store())
                .unwrap();
            for batch_size in [1, 2, 5] {
                assert_eq!(model.forward(images(batch_size)).dims(), [batch_size, NUM_CLASSES]);
            }
        }
    }

    #[test]
    fn test_pretrained_requires_weights() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());

        let err = ClassifierModel::<TestBackend>::new(EncoderKind::ResNet(18), true, true, &device, &store)
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingWeights { ref name, .. } if name == "resnet18"));
    }

    #[test]
    fn test_unknown_backbone_is_rejected() {
        let device = Default::default();
        let err = ClassifierModel::<TestBackend>::new(
            EncoderKind::ResNet(20),
            true,
            false,
            &device,
            &random_store(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::UnknownBackbone(_)));
    }

    #[test]
    fn test_pretrained_weights_change_outputs_not_shape() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());

        // 「事前学習済み」として保存しておくバックボーン
        let reference = ResNetConfig::new(18).init::<TestBackend>(&device).unwrap();
        store.save(reference.clone(), "resnet18").unwrap();
        let expected = to_vec(reference.encode(images(2)));

        let pretrained = ResNetClassifierConfig::new(false, 18)
            .init::<TestBackend>(&device, &store)
            .unwrap();
        let random = ResNetClassifierConfig::new(false, 18)
            .with_pretrained(false)
            .init::<TestBackend>(&device, &store)
            .unwrap();

        let loaded = to_vec(pretrained.encoder().encode(images(2)));
        let fresh = to_vec(random.encoder().encode(images(2)));
        assert!(max_abs_diff(&loaded, &expected) < 1e-5);
        assert!(max_abs_diff(&fresh, &expected) > 1e-5);

        assert_eq!(
            pretrained.forward(images(2)).dims(),
            random.forward(images(2)).dims()
        );
    }

    #[test]
    fn test_pretrained_efficientnet_weights_are_loaded() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());

        let reference = EfficientNetConfig::new().init::<TestBackend>(&device).unwrap();
        store.save(reference.clone(), "efficientnet-b0").unwrap();
        let expected = to_vec(reference.encode(images(2)));

        let pretrained = CnnClassifierConfig::new(true)
            .init::<TestBackend>(&device, &store)
            .unwrap();
        let random = CnnClassifierConfig::new(true)
            .with_pretrained(false)
            .init::<TestBackend>(&device, &store)
            .unwrap();

        let loaded = to_vec(pretrained.encoder().encode(images(2)));
        let fresh = to_vec(random.encoder().encode(images(2)));
        assert!(max_abs_diff(&loaded, &expected) < 1e-5);
        assert!(max_abs_diff(&fresh, &expected) > 1e-5);
        assert_eq!(pretrained.forward(images(2)).dims(), [2, 1]);
    }

    #[test]
    fn test_bytes_restore_identical_logits() {
        let device = Default::default();
        let model = ClassifierModel::<TestBackend>::new(
            EncoderKind::EfficientNet(0),
            true,
            false,
            &device,
            &random_store(),
        )
        .unwrap();
        let bytes = model.to_bytes().unwrap();

        let other = ClassifierModel::<TestBackend>::new(
            EncoderKind::EfficientNet(0),
            true,
            false,
            &device,
            &random_store(),
        )
        .unwrap();
        let restored = other.load_bytes(bytes, &device).unwrap();

        let expected = to_vec(model.forward(images(2)));
        let actual = to_vec(restored.forward(images(2)));
        assert!(max_abs_diff(&expected, &actual) < 1e-6);
        assert_eq!(restored.encoder_kind(), EncoderKind::EfficientNet(0));
    }

    #[test]
    fn test_load_and_normalize_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("white.png");
        image::RgbImage::from_pixel(10, 6, image::Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();

        let data = load_and_normalize_image(&path, 4).unwrap();
        assert_eq!(data.len(), 3 * 4 * 4);
        let expected = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((data[0] - expected).abs() < 1e-4);
    }
}
