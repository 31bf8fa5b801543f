//! Error types for SortVision

use std::path::PathBuf;

/// Result type alias using SortVision's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for SortVision operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Checkpoint file does not exist
    #[error("checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    /// Checkpoint tensor does not fit the constructed network
    #[error("checkpoint shape mismatch for {tensor}: expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        tensor: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Checkpoint could not be read or is incomplete
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Image could not be decoded or converted
    #[error("image error: {0}")]
    Image(String),

    /// Image is smaller than the crop window and the policy rejects it
    #[error("image {width}x{height} is smaller than the {crop}x{crop} crop window")]
    ImageTooSmall { width: u32, height: u32, crop: u32 },

    /// Forward pass or tensor conversion errors
    #[error("inference error: {0}")]
    Inference(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a new image error
    pub fn image(msg: impl Into<String>) -> Self {
        Self::Image(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors that must stop the process before it serves traffic
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CheckpointNotFound(_) | Self::ShapeMismatch { .. } | Self::Checkpoint(_) | Self::Config(_)
        )
    }
}
