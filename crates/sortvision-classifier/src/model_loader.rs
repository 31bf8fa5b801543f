//! Checkpoint loading for Candle-based image classifiers

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use sortvision_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration for loading a checkpoint
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Source of the weights
    pub source: ModelSource,

    /// Device to run inference on
    pub device: DeviceType,

    /// Weights format; inferred from the file extension when `None`
    pub format: Option<ModelFormat>,
}

/// Source location for model weights
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Load from local file system
    LocalPath(PathBuf),

    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
        filename: String,
    },
}

/// Device type for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// CPU inference (always available)
    Cpu,
    /// CUDA GPU inference (if available)
    Cuda(usize), // GPU index
    /// Metal (Apple Silicon)
    Metal(usize),
}

/// Checkpoint file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// SafeTensors format
    SafeTensors,
    /// PyTorch pickled `state_dict` (`torch.save(model.state_dict(), ...)`)
    PyTorch,
}

impl ModelFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("safetensors") => Self::SafeTensors,
            _ => Self::PyTorch,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::LocalPath(PathBuf::from("best_model_finetune.pth")),
            device: DeviceType::Cpu,
            format: None,
        }
    }
}

impl ModelConfig {
    /// Create a new model configuration from local path
    pub fn from_local(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ModelSource::LocalPath(path.into()),
            ..Default::default()
        }
    }

    /// Create a new model configuration from Hugging Face
    pub fn from_hf(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            source: ModelSource::HuggingFace {
                repo_id: repo_id.into(),
                revision: None,
                filename: filename.into(),
            },
            ..Default::default()
        }
    }

    /// Set device
    pub fn with_device(mut self, device: DeviceType) -> Self {
        self.device = device;
        self
    }

    /// Set model format
    pub fn with_format(mut self, format: ModelFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set Hugging Face revision
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        if let ModelSource::HuggingFace { repo_id, filename, .. } = self.source {
            self.source = ModelSource::HuggingFace {
                repo_id,
                revision: Some(revision.into()),
                filename,
            };
        }
        self
    }
}

/// Create Candle device from device type
pub fn create_device(device_type: DeviceType) -> Result<Device> {
    match device_type {
        DeviceType::Cpu => Ok(Device::Cpu),
        DeviceType::Cuda(idx) => Device::new_cuda(idx)
            .map_err(|e| Error::config(format!("Failed to create CUDA device: {}", e))),
        DeviceType::Metal(idx) => Device::new_metal(idx)
            .map_err(|e| Error::config(format!("Failed to create Metal device: {}", e))),
    }
}

/// Resolve model path from source
pub fn resolve_model_path(source: &ModelSource) -> Result<PathBuf> {
    match source {
        ModelSource::LocalPath(path) => {
            if !path.is_file() {
                return Err(Error::CheckpointNotFound(path.clone()));
            }
            Ok(path.clone())
        }
        #[cfg(feature = "hf-hub")]
        ModelSource::HuggingFace {
            repo_id,
            revision,
            filename,
        } => {
            use hf_hub::{api::sync::Api, Repo, RepoType};

            tracing::info!("Downloading checkpoint {} from Hugging Face repo {}", filename, repo_id);

            let api = Api::new()
                .map_err(|e| Error::config(format!("Failed to initialize HF API: {}", e)))?;

            let repo = api.repo(Repo::with_revision(
                repo_id.clone(),
                RepoType::Model,
                revision.clone().unwrap_or_else(|| "main".to_string()),
            ));

            repo.get(filename)
                .map_err(|e| Error::checkpoint(format!("Failed to download checkpoint from HF: {}", e)))
        }
        #[cfg(not(feature = "hf-hub"))]
        ModelSource::HuggingFace { repo_id, .. } => Err(Error::config(format!(
            "Hugging Face source '{}' requires the hf-hub feature",
            repo_id
        ))),
    }
}

/// Named tensors read from a checkpoint file
pub struct Checkpoint {
    tensors: HashMap<String, Tensor>,
    path: PathBuf,
}

impl Checkpoint {
    /// Resolve and read the checkpoint described by `config` onto `device`
    pub fn load(config: &ModelConfig, device: &Device) -> Result<Self> {
        let path = resolve_model_path(&config.source)?;
        let format = config.format.unwrap_or_else(|| ModelFormat::from_path(&path));
        Self::read(&path, format, device)
    }

    /// Read every tensor of a checkpoint file as f32 on `device`
    pub fn read(path: &Path, format: ModelFormat, device: &Device) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::CheckpointNotFound(path.to_path_buf()));
        }

        let raw: HashMap<String, Tensor> = match format {
            ModelFormat::SafeTensors => candle_core::safetensors::load(path, device).map_err(|e| {
                Error::checkpoint(format!("Failed to load SafeTensors {}: {}", path.display(), e))
            })?,
            ModelFormat::PyTorch => candle_core::pickle::read_all(path)
                .map_err(|e| {
                    Error::checkpoint(format!("Failed to load PyTorch weights {}: {}", path.display(), e))
                })?
                .into_iter()
                .collect(),
        };

        let mut tensors = HashMap::with_capacity(raw.len());
        for (name, tensor) in raw {
            // integer bookkeeping such as `num_batches_tracked` is never read
            if !tensor.dtype().is_float() {
                continue;
            }
            let tensor = tensor
                .to_dtype(DType::F32)
                .and_then(|t| t.to_device(device))
                .map_err(|e| Error::checkpoint(format!("Failed to convert tensor {}: {}", name, e)))?;
            tensors.insert(name, tensor);
        }

        if tensors.is_empty() {
            return Err(Error::checkpoint(format!(
                "Checkpoint {} contains no floating point tensors",
                path.display()
            )));
        }

        tracing::debug!("Read {} tensors from {}", tensors.len(), path.display());

        Ok(Self {
            tensors,
            path: path.to_path_buf(),
        })
    }

    /// Shape of a named tensor
    pub fn shape_of(&self, name: &str) -> Option<&[usize]> {
        self.tensors.get(name).map(|t| t.dims())
    }

    /// Fail with `ShapeMismatch` unless `name` exists with exactly `expected` dims
    pub fn expect_shape(&self, name: &str, expected: &[usize]) -> Result<()> {
        match self.shape_of(name) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(Error::ShapeMismatch {
                tensor: name.to_string(),
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            }),
            None => Err(Error::checkpoint(format!(
                "Checkpoint {} has no tensor named {}",
                self.path.display(),
                name
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand the tensors to a VarBuilder for network construction
    pub fn into_var_builder(self, device: &Device) -> VarBuilder<'static> {
        VarBuilder::from_tensors(self.tensors, DType::F32, device)
    }
}

/// Translate a Candle error raised while building a network from a checkpoint
///
/// Shape disagreements become `ShapeMismatch`; everything else is a
/// checkpoint error.
pub fn checkpoint_error(err: candle_core::Error) -> Error {
    match shape_mismatch(&err) {
        Some(mismatch) => mismatch,
        None => Error::checkpoint(err.to_string()),
    }
}

fn shape_mismatch(err: &candle_core::Error) -> Option<Error> {
    match err {
        candle_core::Error::UnexpectedShape { msg, expected, got } => Some(Error::ShapeMismatch {
            tensor: msg
                .strip_prefix("shape mismatch for ")
                .unwrap_or(msg)
                .to_string(),
            expected: expected.dims().to_vec(),
            actual: got.dims().to_vec(),
        }),
        candle_core::Error::WithBacktrace { inner, .. } => shape_mismatch(inner),
        candle_core::Error::Context { inner, .. } => shape_mismatch(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_local() {
        let config = ModelConfig::from_local("/path/to/model.safetensors")
            .with_device(DeviceType::Cpu)
            .with_format(ModelFormat::SafeTensors);

        assert!(matches!(config.source, ModelSource::LocalPath(_)));
        assert_eq!(config.format, Some(ModelFormat::SafeTensors));
    }

    #[test]
    fn test_model_config_hf() {
        let config = ModelConfig::from_hf("sortvision/mobilenetv3-trash", "model.safetensors")
            .with_revision("v1");

        if let ModelSource::HuggingFace { repo_id, revision, filename } = &config.source {
            assert_eq!(repo_id, "sortvision/mobilenetv3-trash");
            assert_eq!(revision.as_deref(), Some("v1"));
            assert_eq!(filename, "model.safetensors");
        } else {
            panic!("Expected HuggingFace source");
        }
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ModelFormat::from_path(Path::new("m.safetensors")), ModelFormat::SafeTensors);
        assert_eq!(ModelFormat::from_path(Path::new("m.SafeTensors")), ModelFormat::SafeTensors);
        assert_eq!(ModelFormat::from_path(Path::new("best_model_finetune.pth")), ModelFormat::PyTorch);
        assert_eq!(ModelFormat::from_path(Path::new("weights")), ModelFormat::PyTorch);
    }

    #[test]
    fn test_missing_local_path() {
        let err = resolve_model_path(&ModelSource::LocalPath(PathBuf::from(
            "/nonexistent/best_model_finetune.pth",
        )))
        .unwrap_err();

        assert!(matches!(err, Error::CheckpointNotFound(_)));
    }

    #[test]
    fn test_unexpected_shape_is_translated() {
        let err = candle_core::Error::UnexpectedShape {
            msg: "shape mismatch for classifier.3.weight".to_string(),
            expected: (6, 1024).into(),
            got: (4, 1024).into(),
        };

        match checkpoint_error(err) {
            Error::ShapeMismatch { tensor, expected, actual } => {
                assert_eq!(tensor, "classifier.3.weight");
                assert_eq!(expected, vec![6, 1024]);
                assert_eq!(actual, vec![4, 1024]);
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_cpu_device() {
        assert!(create_device(DeviceType::Cpu).unwrap().is_cpu());
    }
}
