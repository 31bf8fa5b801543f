//! Waste detector: preprocessing, MobileNetV3 forward pass and softmax decision

use crate::classifier::{ImageClassifier, Prediction};
use crate::config::DetectorConfig;
use crate::mobilenet::{MobileNetV3Small, HEAD_BIAS, HEAD_IN_FEATURES, HEAD_WEIGHT};
use crate::model_loader::{checkpoint_error, create_device, Checkpoint};
use crate::preprocess::Preprocessor;
use candle_core::{Device, Module, Tensor, D};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use sortvision_core::{Error, LabelSet, Result};
use std::time::Instant;
use tracing::{debug, info};

/// How the confidence threshold affects a prediction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LowConfidencePolicy {
    /// Report the best class regardless of confidence
    #[default]
    Ignore,
    /// Mark predictions below the threshold as uncertain (`unknown`)
    Unknown,
}

impl LowConfidencePolicy {
    /// Whether a prediction with `confidence` is flagged under this policy
    pub fn flags(self, confidence: f32, threshold: f32) -> bool {
        match self {
            Self::Ignore => false,
            Self::Unknown => confidence < threshold,
        }
    }
}

/// Loaded classifier with its fixed preprocessing and decision settings
///
/// Immutable after `load`; share it behind an `Arc` for concurrent use.
pub struct Detector {
    name: String,
    model: MobileNetV3Small,
    device: Device,
    preprocessor: Preprocessor,
    labels: LabelSet,
    confidence_threshold: f32,
    low_confidence: LowConfidencePolicy,
}

impl Detector {
    /// Resolve the checkpoint, build the network and verify it fits the labels
    pub fn load(config: DetectorConfig) -> Result<Self> {
        config.validate()?;

        let model_config = config.to_model_config();
        let device = create_device(model_config.device)?;

        let checkpoint = Checkpoint::load(&model_config, &device)?;
        info!("Loading model from {}", checkpoint.path().display());

        Self::from_checkpoint(checkpoint, device, config)
    }

    /// Build from an already read checkpoint
    pub fn from_checkpoint(checkpoint: Checkpoint, device: Device, config: DetectorConfig) -> Result<Self> {
        config.validate()?;

        let num_classes = config.labels.len();
        // a head trained for another label count must never be truncated or padded
        checkpoint.expect_shape(HEAD_WEIGHT, &[num_classes, HEAD_IN_FEATURES])?;
        checkpoint.expect_shape(HEAD_BIAS, &[num_classes])?;

        let name = checkpoint
            .path()
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("mobilenet_v3_small")
            .to_string();

        let vb = checkpoint.into_var_builder(&device);
        let model = MobileNetV3Small::new(num_classes, vb).map_err(checkpoint_error)?;
        let preprocessor = Preprocessor::new(config.preprocess)?;

        info!(
            "Model '{}' ready: {} classes on {:?}, threshold {} ({:?})",
            name, num_classes, device, config.confidence_threshold, config.low_confidence
        );

        Ok(Self {
            name,
            model,
            device,
            preprocessor,
            labels: config.labels,
            confidence_threshold: config.confidence_threshold,
            low_confidence: config.low_confidence,
        })
    }

    /// Classify one image: preprocess, forward, softmax, argmax
    pub fn detect(&self, image: &DynamicImage) -> Result<Prediction> {
        let start = Instant::now();

        let input = self.preprocessor.to_tensor(image, &self.device)?;
        let probabilities = self.probabilities(&input)?;

        let mut prediction = Prediction::from_probabilities(probabilities, &self.labels)?;
        prediction.uncertain = self
            .low_confidence
            .flags(prediction.confidence, self.confidence_threshold);
        prediction.latency_us = start.elapsed().as_micros() as u64;

        debug!(
            label = %prediction.label,
            confidence = prediction.confidence,
            uncertain = prediction.uncertain,
            latency_us = prediction.latency_us,
            top = ?prediction.top_k(&self.labels, 3),
            "Image classified"
        );

        Ok(prediction)
    }

    /// Softmax class probabilities for a single-item input batch
    pub fn probabilities(&self, input: &Tensor) -> Result<Vec<f32>> {
        let logits = self
            .model
            .forward(input)
            .map_err(|e| Error::inference(format!("Model forward pass failed: {}", e)))?;

        candle_nn::ops::softmax(&logits, D::Minus1)
            .and_then(|p| p.squeeze(0))
            .and_then(|p| p.to_vec1::<f32>())
            .map_err(|e| Error::inference(format!("Failed to compute probabilities: {}", e)))
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn low_confidence(&self) -> LowConfidencePolicy {
        self.low_confidence
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl ImageClassifier for Detector {
    fn classify(&self, image: &DynamicImage) -> Result<Prediction> {
        self.detect(image)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &LabelSet {
        &self.labels
    }
}
