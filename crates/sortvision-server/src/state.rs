//! Shared application state

use metrics_exporter_prometheus::PrometheusHandle;
use sortvision_classifier::{Detector, ImageClassifier};
use std::sync::Arc;
use tracing::info;

use crate::config::ServerConfig;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<ServerConfig>,

    /// Classifier loaded once at startup, read-only afterwards
    pub classifier: Arc<dyn ImageClassifier>,

    /// Prometheus metrics handle for rendering
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    /// Load the detector described by `config`
    ///
    /// Any error here is fatal: the caller must not start serving.
    pub fn load(config: ServerConfig, metrics_handle: PrometheusHandle) -> anyhow::Result<Self> {
        let detector = Detector::load(config.detector.clone())?;
        info!(
            "Classifier '{}' loaded with labels: {}",
            detector.name(),
            detector.labels().as_slice().join(", ")
        );

        Ok(Self::with_classifier(config, Arc::new(detector), metrics_handle))
    }

    /// Build state around an already constructed classifier
    pub fn with_classifier(
        config: ServerConfig,
        classifier: Arc<dyn ImageClassifier>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            config: Arc::new(config),
            classifier,
            metrics_handle,
        }
    }
}
