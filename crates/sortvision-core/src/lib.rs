//! SortVision Core
//!
//! Core types shared across SortVision components.
//!
//! This crate provides:
//! - Error types and result handling
//! - The ordered label set that defines a classifier's output space

pub mod error;
pub mod labels;

pub use error::{Error, Result};
pub use labels::{LabelSet, DEFAULT_LABELS};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::labels::LabelSet;
}
