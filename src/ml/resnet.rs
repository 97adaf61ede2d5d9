//! ResNetバックボーン
//!
//! 単一の特徴抽出関数は持たず、`conv1` → `bn1` → `relu` → `maxpool` →
//! `layer1`〜`layer4` → `avgpool` の各ステージを順に通します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

use crate::ml::encoder::{EncoderKind, FeatureEncoder};
use crate::ml::error::ModelError;

const BOTTLENECK_EXPANSION: usize = 4;

/// 残差ブロックの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// 3x3 + 3x3（ResNet18/34）
    Basic,
    /// 1x1 + 3x3 + 1x1（ResNet50以上）
    Bottleneck,
}

impl BlockKind {
    pub fn expansion(self) -> usize {
        match self {
            BlockKind::Basic => 1,
            BlockKind::Bottleneck => BOTTLENECK_EXPANSION,
        }
    }
}

/// 層数からブロック種類とステージごとのブロック数を決める
pub fn block_layout(num_layers: usize) -> Option<(BlockKind, [usize; 4])> {
    match num_layers {
        18 => Some((BlockKind::Basic, [2, 2, 2, 2])),
        34 => Some((BlockKind::Basic, [3, 4, 6, 3])),
        50 => Some((BlockKind::Bottleneck, [3, 4, 6, 3])),
        101 => Some((BlockKind::Bottleneck, [3, 4, 23, 3])),
        152 => Some((BlockKind::Bottleneck, [3, 8, 36, 3])),
        _ => None,
    }
}

fn conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = kernel / 2;
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .init(device)
}

/// ショートカット側の1x1射影
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_planes: usize, out_planes: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: conv([in_planes, out_planes], 1, stride, device),
            bn: BatchNormConfig::new(out_planes).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

fn downsample<B: Backend>(
    in_planes: usize,
    out_planes: usize,
    stride: usize,
    device: &B::Device,
) -> Option<Downsample<B>> {
    (stride != 1 || in_planes != out_planes)
        .then(|| Downsample::new(in_planes, out_planes, stride, device))
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_planes: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv1: conv([in_planes, planes], 3, stride, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv([planes, planes], 3, 1, device),
            bn2: BatchNormConfig::new(planes).init(device),
            downsample: downsample(in_planes, planes, stride, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };
        let out = relu(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));
        relu(out + identity)
    }
}

/// ストライドは3x3側に置く
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_planes: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let out_planes = planes * BOTTLENECK_EXPANSION;
        Self {
            conv1: conv([in_planes, planes], 1, 1, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv([planes, planes], 3, stride, device),
            bn2: BatchNormConfig::new(planes).init(device),
            conv3: conv([planes, out_planes], 1, 1, device),
            bn3: BatchNormConfig::new(out_planes).init(device),
            downsample: downsample(in_planes, out_planes, stride, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };
        let out = relu(self.bn1.forward(self.conv1.forward(x)));
        let out = relu(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));
        relu(out + identity)
    }
}

/// 残差ステージ（`layer1`〜`layer4`）
///
/// ブロック種類に応じてどちらか一方だけが埋まります。
#[derive(Module, Debug)]
pub struct ResidualStage<B: Backend> {
    basic: Vec<BasicBlock<B>>,
    bottleneck: Vec<Bottleneck<B>>,
}

impl<B: Backend> ResidualStage<B> {
    fn new(
        kind: BlockKind,
        in_planes: usize,
        planes: usize,
        blocks: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let out_planes = planes * kind.expansion();
        let mut basic = Vec::new();
        let mut bottleneck = Vec::new();

        for index in 0..blocks {
            let (block_in, block_stride) = if index == 0 {
                (in_planes, stride)
            } else {
                (out_planes, 1)
            };
            match kind {
                BlockKind::Basic => basic.push(BasicBlock::new(block_in, planes, block_stride, device)),
                BlockKind::Bottleneck => {
                    bottleneck.push(Bottleneck::new(block_in, planes, block_stride, device))
                }
            }
        }

        Self { basic, bottleneck }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.basic.iter().fold(x, |x, block| block.forward(x));
        self.bottleneck.iter().fold(x, |x, block| block.forward(x))
    }

    pub fn len(&self) -> usize {
        self.basic.len() + self.bottleneck.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ResNet設定
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// 層数（18 / 34 / 50 / 101 / 152）
    pub num_layers: usize,
    /// 入力チャネル数
    #[config(default = 3)]
    pub in_channels: usize,
}

impl ResNetConfig {
    fn layout(&self) -> Result<(BlockKind, [usize; 4]), ModelError> {
        block_layout(self.num_layers).ok_or_else(|| {
            ModelError::UnknownBackbone(EncoderKind::ResNet(self.num_layers).to_string())
        })
    }

    /// `avgpool` 後の特徴次元
    pub fn feature_width(&self) -> Result<usize, ModelError> {
        let (kind, _) = self.layout()?;
        Ok(512 * kind.expansion())
    }

    /// ランダム初期化したResNetを作る
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ResNet<B>, ModelError> {
        let (kind, blocks) = self.layout()?;
        let expansion = kind.expansion();

        let layer1 = ResidualStage::new(kind, 64, 64, blocks[0], 1, device);
        let layer2 = ResidualStage::new(kind, 64 * expansion, 128, blocks[1], 2, device);
        let layer3 = ResidualStage::new(kind, 128 * expansion, 256, blocks[2], 2, device);
        let layer4 = ResidualStage::new(kind, 256 * expansion, 512, blocks[3], 2, device);

        Ok(ResNet {
            conv1: Conv2dConfig::new([self.in_channels, 64], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            num_layers: self.num_layers,
            feature_width: 512 * expansion,
        })
    }
}

/// ResNetエンコーダ
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub relu: Relu,
    pub maxpool: MaxPool2d,
    pub layer1: ResidualStage<B>,
    pub layer2: ResidualStage<B>,
    pub layer3: ResidualStage<B>,
    pub layer4: ResidualStage<B>,
    pub avgpool: AdaptiveAvgPool2d,
    num_layers: usize,
    feature_width: usize,
}

impl<B: Backend> ResNet<B> {
    pub fn kind(&self) -> EncoderKind {
        EncoderKind::ResNet(self.num_layers)
    }

    /// 各ステージのブロック数
    pub fn stage_sizes(&self) -> [usize; 4] {
        [
            self.layer1.len(),
            self.layer2.len(),
            self.layer3.len(),
            self.layer4.len(),
        ]
    }
}

impl<B: Backend> FeatureEncoder<B> for ResNet<B> {
    fn feature_width(&self) -> usize {
        self.feature_width
    }

    fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.bn1.forward(x);
        let x = self.relu.forward(x);
        let x = self.maxpool.forward(x);
        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        let x = self.avgpool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }
}
