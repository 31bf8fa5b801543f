//! Configuration for the detector and its checkpoint

use crate::detector::LowConfidencePolicy;
use crate::preprocess::PreprocessConfig;
use crate::{DeviceType, ModelConfig, ModelFormat, ModelSource};
use serde::{Deserialize, Serialize};
use sortvision_core::{Error, LabelSet, Result};
use std::path::PathBuf;
use std::str::FromStr;

/// Confidence below which the `unknown` policy flags a prediction
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.60;

/// Detector configuration (YAML `detector:` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Checkpoint location and format
    #[serde(default)]
    pub model: ModelSpec,

    /// Compute device
    #[serde(default)]
    pub device: DeviceSpec,

    /// Output labels, in the order the checkpoint's head was trained with
    #[serde(default)]
    pub labels: LabelSet,

    #[serde(default = "default_threshold")]
    pub confidence_threshold: f32,

    /// Whether `confidence_threshold` affects the outcome
    #[serde(default)]
    pub low_confidence: LowConfidencePolicy,

    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

/// Checkpoint specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(flatten)]
    pub source: ModelSourceSpec,

    /// Checkpoint format; guessed from the extension when absent
    #[serde(default)]
    pub format: Option<ModelFormatSpec>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSourceSpec::Local {
                path: PathBuf::from("best_model_finetune.pth"),
            },
            format: None,
        }
    }
}

/// Model source specification (for config files)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSourceSpec {
    /// Local file path
    Local { path: PathBuf },

    /// Hugging Face Hub
    HuggingFace {
        repo_id: String,
        filename: String,
        revision: Option<String>,
    },
}

/// Device specification (for config files)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    #[default]
    Cpu,
    Cuda { index: Option<usize> },
    Metal { index: Option<usize> },
}

impl DeviceSpec {
    pub fn to_device_type(self) -> DeviceType {
        match self {
            Self::Cpu => DeviceType::Cpu,
            Self::Cuda { index } => DeviceType::Cuda(index.unwrap_or(0)),
            Self::Metal { index } => DeviceType::Metal(index.unwrap_or(0)),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    /// Parses `cpu`, `cuda`, `cuda:1`, `metal`, `metal:0`
    fn from_str(s: &str) -> Result<Self> {
        let (kind, index) = match s.split_once(':') {
            Some((kind, index)) => {
                let index = index
                    .parse::<usize>()
                    .map_err(|_| Error::config(format!("invalid device index in '{}'", s)))?;
                (kind, Some(index))
            }
            None => (s, None),
        };

        match kind.to_ascii_lowercase().as_str() {
            "cpu" if index.is_none() => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda { index }),
            "metal" => Ok(Self::Metal { index }),
            _ => Err(Error::config(format!("unknown device '{}'", s))),
        }
    }
}

/// Model format specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormatSpec {
    SafeTensors,
    PyTorch,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: ModelSpec::default(),
            device: DeviceSpec::Cpu,
            labels: LabelSet::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            low_confidence: LowConfidencePolicy::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("invalid detector config: {}", e)))
    }

    /// Point the detector at a local checkpoint, keeping any explicit format
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.model.source = ModelSourceSpec::Local { path: path.into() };
        self
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        self.preprocess.validate()
    }

    /// Convert to ModelConfig for loading
    pub fn to_model_config(&self) -> ModelConfig {
        let source = match &self.model.source {
            ModelSourceSpec::Local { path } => ModelSource::LocalPath(path.clone()),
            ModelSourceSpec::HuggingFace {
                repo_id,
                filename,
                revision,
            } => ModelSource::HuggingFace {
                repo_id: repo_id.clone(),
                revision: revision.clone(),
                filename: filename.clone(),
            },
        };

        let format = self.model.format.map(|f| match f {
            ModelFormatSpec::SafeTensors => ModelFormat::SafeTensors,
            ModelFormatSpec::PyTorch => ModelFormat::PyTorch,
        });

        ModelConfig {
            source,
            device: self.device.to_device_type(),
            format,
        }
    }
}

fn default_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::UndersizePolicy;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = DetectorConfig::default();
        assert_eq!(config.labels.len(), 6);
        assert_eq!(config.confidence_threshold, 0.60);
        assert_eq!(config.low_confidence, LowConfidencePolicy::Ignore);
        assert_eq!(config.device, DeviceSpec::Cpu);
        assert!(config.validate().is_ok());

        let model = config.to_model_config();
        assert!(matches!(model.source, ModelSource::LocalPath(ref p) if p.ends_with("best_model_finetune.pth")));
        assert_eq!(model.format, None);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
model:
  path: /models/trash.safetensors
  format: safetensors
device:
  cuda:
    index: 1
labels: [cardboard, glass, metal, paper, plastic, trash]
confidence_threshold: 0.75
low_confidence: unknown
preprocess:
  crop_size: 480
  input_size: 224
  undersize: reject
"#;
        let config = DetectorConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.device.to_device_type(), DeviceType::Cuda(1));
        assert_eq!(config.low_confidence, LowConfidencePolicy::Unknown);
        assert_eq!(config.preprocess.undersize, UndersizePolicy::Reject);
        assert_eq!(config.to_model_config().format, Some(ModelFormat::SafeTensors));
    }

    #[test]
    fn test_parse_hf_source() {
        let yaml = r#"
model:
  repo_id: sortvision/mobilenetv3-trash
  filename: model.safetensors
"#;
        let config = DetectorConfig::from_yaml(yaml).unwrap();
        match config.to_model_config().source {
            ModelSource::HuggingFace { repo_id, revision, filename } => {
                assert_eq!(repo_id, "sortvision/mobilenetv3-trash");
                assert_eq!(filename, "model.safetensors");
                assert!(revision.is_none());
            }
            other => panic!("expected Hugging Face source, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(DetectorConfig::from_yaml("labels: [glass, glass]").is_err());
        assert!(DetectorConfig::from_yaml("low_confidence: maybe").is_err());

        let config = DetectorConfig::from_yaml("confidence_threshold: 1.5").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_from_str() {
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cpu);
        assert_eq!("CUDA".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda { index: None });
        assert_eq!("cuda:2".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda { index: Some(2) });
        assert_eq!("metal:0".parse::<DeviceSpec>().unwrap(), DeviceSpec::Metal { index: Some(0) });
        assert!("tpu".parse::<DeviceSpec>().is_err());
        assert!("cuda:x".parse::<DeviceSpec>().is_err());
        assert!("cpu:1".parse::<DeviceSpec>().is_err());
    }

    #[test]
    fn test_with_checkpoint_override() {
        let config = DetectorConfig::default().with_checkpoint("/tmp/other.pth");
        assert!(matches!(
            config.to_model_config().source,
            ModelSource::LocalPath(ref p) if p == std::path::Path::new("/tmp/other.pth")
        ));
    }
}
