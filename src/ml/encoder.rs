//! バックボーンの選択と特徴抽出の共通インターフェース

use std::fmt;
use std::str::FromStr;

use burn::tensor::{backend::Backend, Tensor};

use crate::ml::error::ModelError;

/// EfficientNetの最大係数（b8まで）
pub const MAX_COMPOUND_COEFFICIENT: usize = 8;

/// 対応しているResNetの層数
pub const RESNET_DEPTHS: [usize; 5] = [18, 34, 50, 101, 152];

/// 入力バッチから1サンプル1ベクトルのプーリング済み特徴を作る
///
/// 畳み込み系・残差系の両バックボーンが実装します。特徴の中身は
/// 各ファミリー固有の定義に従うため、別ファミリー間で数値的に
/// 交換可能とは限りません。
pub trait FeatureEncoder<B: Backend> {
    /// プーリング後の特徴次元
    fn feature_width(&self) -> usize;

    /// `[batch, channels, height, width]` -> `[batch, feature_width]`
    fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

/// バックボーンの種類
///
/// 文字列表現は `efficientnet-b{係数}` / `resnet{層数}` で、
/// 事前学習済み重みファイルの名前にもそのまま使います。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    /// 複合係数を指定したEfficientNet
    EfficientNet(usize),
    /// 層数を指定したResNet
    ResNet(usize),
}

impl EncoderKind {
    /// 係数・層数が対応範囲か確認する
    pub fn validate(self) -> Result<Self, ModelError> {
        let supported = match self {
            EncoderKind::EfficientNet(b) => b <= MAX_COMPOUND_COEFFICIENT,
            EncoderKind::ResNet(layers) => RESNET_DEPTHS.contains(&layers),
        };
        if supported {
            Ok(self)
        } else {
            Err(ModelError::UnknownBackbone(self.to_string()))
        }
    }

    /// 重みファイル名
    pub fn weights_name(&self) -> String {
        self.to_string()
    }
}

impl Default for EncoderKind {
    fn default() -> Self {
        EncoderKind::EfficientNet(0)
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderKind::EfficientNet(b) => write!(f, "efficientnet-b{}", b),
            EncoderKind::ResNet(layers) => write!(f, "resnet{}", layers),
        }
    }
}

impl FromStr for EncoderKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let unknown = || ModelError::UnknownBackbone(s.to_string());

        let kind = if let Some(b) = name.strip_prefix("efficientnet-b") {
            EncoderKind::EfficientNet(b.parse().map_err(|_| unknown())?)
        } else if let Some(layers) = name.strip_prefix("resnet") {
            EncoderKind::ResNet(layers.parse().map_err(|_| unknown())?)
        } else {
            return Err(unknown());
        };

        kind.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_encoder_names() {
        assert_eq!("efficientnet-b0".parse::<EncoderKind>().unwrap(), EncoderKind::EfficientNet(0));
        assert_eq!("EfficientNet-B7".parse::<EncoderKind>().unwrap(), EncoderKind::EfficientNet(7));
        assert_eq!("resnet50".parse::<EncoderKind>().unwrap(), EncoderKind::ResNet(50));
    }

    #[test]
    fn test_reject_unknown_encoders() {
        for name in ["efficientnet-b9", "resnet20", "vgg16", "resnet", "efficientnet-bx"] {
            let err = name.parse::<EncoderKind>().unwrap_err();
            assert!(matches!(err, ModelError::UnknownBackbone(_)), "{name}");
        }
    }

    #[test]
    fn test_display_matches_weights_name() {
        assert_eq!(EncoderKind::EfficientNet(3).to_string(), "efficientnet-b3");
        assert_eq!(EncoderKind::ResNet(101).weights_name(), "resnet101");
        assert_eq!(EncoderKind::default(), EncoderKind::EfficientNet(0));
    }
}
