//! EfficientNetバックボーン
//!
//! 複合係数 b0〜b8 の幅・深さスケーリングに従ってMBConvブロックを積み上げます。
//! 分類器からは `extract_features` の出力（ヘッド畳み込み後の特徴マップ）を
//! プーリングして使います。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{sigmoid, silu},
        backend::Backend,
        Tensor,
    },
};

use crate::ml::encoder::{EncoderKind, FeatureEncoder};
use crate::ml::error::ModelError;

/// 複合係数ごとの (幅係数, 深さ係数)
pub const COMPOUND_SCALING: [(f64, f64); 9] = [
    (1.0, 1.0),
    (1.0, 1.1),
    (1.1, 1.2),
    (1.2, 1.4),
    (1.4, 1.8),
    (1.6, 2.2),
    (1.8, 2.6),
    (2.0, 3.1),
    (2.2, 3.6),
];

const STEM_FILTERS: usize = 32;
const HEAD_FILTERS: usize = 1280;
const FILTER_DIVISOR: usize = 8;
const SE_RATIO: f64 = 0.25;
const BN_EPSILON: f64 = 1e-3;
const BN_MOMENTUM: f64 = 0.01;

/// ステージ定義（b0基準）
#[derive(Debug, Clone, Copy)]
struct StageArgs {
    repeats: usize,
    kernel: usize,
    stride: usize,
    expand_ratio: usize,
    input_filters: usize,
    output_filters: usize,
}

const fn stage(
    repeats: usize,
    kernel: usize,
    stride: usize,
    expand_ratio: usize,
    input_filters: usize,
    output_filters: usize,
) -> StageArgs {
    StageArgs {
        repeats,
        kernel,
        stride,
        expand_ratio,
        input_filters,
        output_filters,
    }
}

const BASE_STAGES: [StageArgs; 7] = [
    stage(1, 3, 1, 1, 32, 16),
    stage(2, 3, 2, 6, 16, 24),
    stage(2, 5, 2, 6, 24, 40),
    stage(3, 3, 2, 6, 40, 80),
    stage(3, 5, 1, 6, 80, 112),
    stage(4, 5, 2, 6, 112, 192),
    stage(1, 3, 1, 6, 192, 320),
];

/// 幅係数を掛けたチャネル数を8の倍数に丸める
///
/// 丸めた結果がスケール後の90%を下回る場合は1段上げます。
pub fn round_filters(filters: usize, width: f64) -> usize {
    let scaled = filters as f64 * width;
    let half = (FILTER_DIVISOR / 2) as f64;
    let mut rounded =
        ((scaled + half) as usize / FILTER_DIVISOR * FILTER_DIVISOR).max(FILTER_DIVISOR);
    if (rounded as f64) < 0.9 * scaled {
        rounded += FILTER_DIVISOR;
    }
    rounded
}

/// 深さ係数を掛けた繰り返し数（切り上げ）
pub fn round_repeats(repeats: usize, depth: f64) -> usize {
    (depth * repeats as f64).ceil() as usize
}

fn batch_norm<B: Backend>(channels: usize, device: &B::Device) -> BatchNorm<B> {
    BatchNormConfig::new(channels)
        .with_epsilon(BN_EPSILON)
        .with_momentum(BN_MOMENTUM)
        .init(device)
}

/// 上下左右に `kernel / 2` ずつパディングする
///
/// TensorFlow版の "same" パディング（stride 2 では右下に寄せる）とは値が
/// ずれるので、移植した重みはこの配置に合わせて変換しておくこと。
fn conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    groups: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = kernel / 2;
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_groups(groups)
        .with_bias(false)
        .init(device)
}

/// Squeeze-and-Excitation
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    pool: AdaptiveAvgPool2d,
    reduce: Conv2d<B>,
    expand: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    fn new(channels: usize, squeezed: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, squeezed], [1, 1]).init(device),
            expand: Conv2dConfig::new([squeezed, channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = silu(self.reduce.forward(scale));
        let scale = sigmoid(self.expand.forward(scale));
        x * scale
    }
}

/// Mobile Inverted Bottleneck ブロック
#[derive(Module, Debug)]
pub struct MbConvBlock<B: Backend> {
    expand_conv: Option<Conv2d<B>>,
    bn0: Option<BatchNorm<B>>,
    depthwise_conv: Conv2d<B>,
    bn1: BatchNorm<B>,
    se: SqueezeExcitation<B>,
    project_conv: Conv2d<B>,
    bn2: BatchNorm<B>,
    id_skip: bool,
}

impl<B: Backend> MbConvBlock<B> {
    fn new(
        input_filters: usize,
        output_filters: usize,
        kernel: usize,
        stride: usize,
        expand_ratio: usize,
        device: &B::Device,
    ) -> Self {
        let expanded = input_filters * expand_ratio;
        let (expand_conv, bn0) = if expand_ratio != 1 {
            (
                Some(conv([input_filters, expanded], 1, 1, 1, device)),
                Some(batch_norm(expanded, device)),
            )
        } else {
            (None, None)
        };
        let squeezed = ((input_filters as f64 * SE_RATIO) as usize).max(1);

        Self {
            expand_conv,
            bn0,
            depthwise_conv: conv([expanded, expanded], kernel, stride, expanded, device),
            bn1: batch_norm(expanded, device),
            se: SqueezeExcitation::new(expanded, squeezed, device),
            project_conv: conv([expanded, output_filters], 1, 1, 1, device),
            bn2: batch_norm(output_filters, device),
            id_skip: stride == 1 && input_filters == output_filters,
        }
    }

    pub fn forward(&self, inputs: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = inputs.clone();
        if let (Some(expand_conv), Some(bn0)) = (&self.expand_conv, &self.bn0) {
            x = silu(bn0.forward(expand_conv.forward(x)));
        }
        x = silu(self.bn1.forward(self.depthwise_conv.forward(x)));
        x = self.se.forward(x);
        x = self.bn2.forward(self.project_conv.forward(x));

        if self.id_skip {
            x + inputs
        } else {
            x
        }
    }
}

/// EfficientNet設定
#[derive(Config, Debug)]
pub struct EfficientNetConfig {
    /// 複合係数（0〜8）
    #[config(default = 0)]
    pub compound_coefficient: usize,
    /// 入力チャネル数
    #[config(default = 3)]
    pub in_channels: usize,
}

impl EfficientNetConfig {
    fn scaling(&self) -> Result<(f64, f64), ModelError> {
        COMPOUND_SCALING
            .get(self.compound_coefficient)
            .copied()
            .ok_or_else(|| {
                ModelError::UnknownBackbone(
                    EncoderKind::EfficientNet(self.compound_coefficient).to_string(),
                )
            })
    }

    /// ヘッド畳み込みの出力チャネル数（= 分類器に渡る特徴次元）
    pub fn feature_width(&self) -> Result<usize, ModelError> {
        let (width, _) = self.scaling()?;
        Ok(round_filters(HEAD_FILTERS, width))
    }

    /// ランダム初期化したEfficientNetを作る
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<EfficientNet<B>, ModelError> {
        let (width, depth) = self.scaling()?;
        let stem_filters = round_filters(STEM_FILTERS, width);

        let mut blocks = Vec::new();
        for args in BASE_STAGES {
            let input_filters = round_filters(args.input_filters, width);
            let output_filters = round_filters(args.output_filters, width);
            let repeats = round_repeats(args.repeats, depth);

            blocks.push(MbConvBlock::new(
                input_filters,
                output_filters,
                args.kernel,
                args.stride,
                args.expand_ratio,
                device,
            ));
            for _ in 1..repeats {
                blocks.push(MbConvBlock::new(
                    output_filters,
                    output_filters,
                    args.kernel,
                    1,
                    args.expand_ratio,
                    device,
                ));
            }
        }

        let last_filters = round_filters(BASE_STAGES[BASE_STAGES.len() - 1].output_filters, width);
        let head_filters = round_filters(HEAD_FILTERS, width);

        Ok(EfficientNet {
            conv_stem: conv([self.in_channels, stem_filters], 3, 2, 1, device),
            bn0: batch_norm(stem_filters, device),
            blocks,
            conv_head: conv([last_filters, head_filters], 1, 1, 1, device),
            bn1: batch_norm(head_filters, device),
            avg_pooling: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            compound_coefficient: self.compound_coefficient,
            feature_width: head_filters,
        })
    }
}

/// EfficientNetエンコーダ
#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    conv_stem: Conv2d<B>,
    bn0: BatchNorm<B>,
    blocks: Vec<MbConvBlock<B>>,
    conv_head: Conv2d<B>,
    bn1: BatchNorm<B>,
    avg_pooling: AdaptiveAvgPool2d,
    compound_coefficient: usize,
    feature_width: usize,
}

impl<B: Backend> EfficientNet<B> {
    /// ステム → MBConvブロック群 → ヘッド畳み込み
    ///
    /// # 戻り値
    /// - 特徴マップ [batch_size, feature_width, h, w]
    pub fn extract_features(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = silu(self.bn0.forward(self.conv_stem.forward(images)));
        for block in &self.blocks {
            x = block.forward(x);
        }
        silu(self.bn1.forward(self.conv_head.forward(x)))
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn kind(&self) -> EncoderKind {
        EncoderKind::EfficientNet(self.compound_coefficient)
    }
}

impl<B: Backend> FeatureEncoder<B> for EfficientNet<B> {
    fn feature_width(&self) -> usize {
        self.feature_width
    }

    fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.extract_features(images);
        let x = self.avg_pooling.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_round_filters_matches_scaling_table() {
        // b0/b1 はスケールなし
        assert_eq!(round_filters(32, 1.0), 32);
        assert_eq!(round_filters(1280, 1.0), 1280);
        // b2
        assert_eq!(round_filters(1280, 1.1), 1408);
        assert_eq!(round_filters(32, 1.1), 32);
        assert_eq!(round_filters(24, 1.1), 24);
        // b3
        assert_eq!(round_filters(1280, 1.2), 1536);
        assert_eq!(round_filters(40, 1.2), 48);
        // b4
        assert_eq!(round_filters(1280, 1.4), 1792);
        assert_eq!(round_filters(112, 1.4), 160);
        // b7
        assert_eq!(round_filters(1280, 2.0), 2560);
        assert_eq!(round_filters(16, 2.0), 32);
    }

    #[test]
    fn test_round_repeats_rounds_up() {
        assert_eq!(round_repeats(1, 1.0), 1);
        assert_eq!(round_repeats(2, 1.1), 3);
        assert_eq!(round_repeats(4, 1.4), 6);
        assert_eq!(round_repeats(3, 3.1), 10);
    }

    #[test]
    fn test_feature_width_per_coefficient() {
        let widths: Vec<usize> = (0..=4)
            .map(|b| {
                EfficientNetConfig::new()
                    .with_compound_coefficient(b)
                    .feature_width()
                    .unwrap()
            })
            .collect();
        assert_eq!(widths, vec![1280, 1280, 1408, 1536, 1792]);
    }

    #[test]
    fn test_unknown_coefficient_is_rejected() {
        let device = Default::default();
        let result = EfficientNetConfig::new()
            .with_compound_coefficient(9)
            .init::<TestBackend>(&device);
        assert!(matches!(result, Err(ModelError::UnknownBackbone(name)) if name == "efficientnet-b9"));
    }

    #[test]
    fn test_b0_structure_and_features() {
        let device = Default::default();
        let encoder = EfficientNetConfig::new().init::<TestBackend>(&device).unwrap();

        // 1 + 2 + 2 + 3 + 3 + 4 + 1
        assert_eq!(encoder.num_blocks(), 16);
        assert_eq!(encoder.feature_width(), 1280);
        assert_eq!(encoder.kind(), EncoderKind::EfficientNet(0));

        let images = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        let maps = encoder.extract_features(images.clone());
        assert_eq!(maps.dims(), [2, 1280, 1, 1]);

        let features = encoder.encode(images);
        assert_eq!(features.dims(), [2, 1280]);
    }

    #[test]
    fn test_b1_is_deeper_than_b0() {
        let device = Default::default();
        let encoder = EfficientNetConfig::new()
            .with_compound_coefficient(1)
            .init::<TestBackend>(&device)
            .unwrap();
        // 2 + 3 + 3 + 4 + 4 + 5 + 2
        assert_eq!(encoder.num_blocks(), 23);
    }
}
