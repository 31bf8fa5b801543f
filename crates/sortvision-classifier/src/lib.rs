//! SortVision Classifier
//!
//! Waste-image classification with a fine-tuned MobileNetV3-Small.
//!
//! The pipeline is fixed:
//! - center crop to 480x480
//! - resize to 224x224
//! - ImageNet mean/std normalization
//! - forward pass, softmax, argmax over the label set
//!
//! Inference runs on CPU by default through Candle; the loaded [`Detector`]
//! is immutable and can be shared between threads.

pub mod classifier;
pub mod config;
pub mod detector;
pub mod mobilenet;
pub mod model_loader;
pub mod preprocess;

pub use classifier::{ImageClassifier, Prediction, UNKNOWN_LABEL};
pub use config::{
    DetectorConfig, DeviceSpec, ModelFormatSpec, ModelSourceSpec, ModelSpec, DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use detector::{Detector, LowConfidencePolicy};
pub use mobilenet::MobileNetV3Small;
pub use model_loader::{Checkpoint, DeviceType, ModelConfig, ModelFormat, ModelSource};
pub use preprocess::{PreprocessConfig, Preprocessor, UndersizePolicy};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::{ImageClassifier, Prediction};
    pub use crate::config::DetectorConfig;
    pub use crate::detector::{Detector, LowConfidencePolicy};
    pub use crate::preprocess::{Preprocessor, UndersizePolicy};
}
