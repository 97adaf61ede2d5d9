pub mod efficientnet;
pub mod encoder;
pub mod error;
pub mod inference;
pub mod ml_model;
pub mod resnet;
pub mod weights;

pub use efficientnet::{EfficientNet, EfficientNetConfig};
pub use encoder::{EncoderKind, FeatureEncoder};
pub use error::ModelError;
pub use inference::InferenceEngine;
pub use ml_model::{
    load_and_normalize_image, num_outputs, ClassifierHead, ClassifierModel, CnnClassifier,
    CnnClassifierConfig, HiddenActivation, ImageClassifier, ResNetClassifier,
    ResNetClassifierConfig, HIDDEN_WIDTH, NUM_CLASSES,
};
pub use resnet::{ResNet, ResNetConfig};
pub use weights::WeightStore;
