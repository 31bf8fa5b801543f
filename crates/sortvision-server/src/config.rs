//! Server configuration

use serde::{Deserialize, Serialize};
use sortvision_classifier::{DetectorConfig, DeviceSpec};
use std::path::Path;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Multipart field carrying the image
    #[serde(default = "default_upload_field")]
    pub upload_field: String,

    /// Response label format; `{label}` is replaced by the predicted class
    #[serde(default = "default_label_template")]
    pub label_template: String,

    /// Classifier configuration
    #[serde(default)]
    pub detector: DetectorConfig,
}

impl ServerConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: &str, cli: &crate::Cli) -> anyhow::Result<Self> {
        // Try to load from file, or use defaults
        let mut config = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        // Apply CLI overrides
        if let Some(checkpoint) = &cli.checkpoint {
            config.detector = config.detector.with_checkpoint(checkpoint);
        }

        if let Some(device) = &cli.device {
            config.detector.device = device.parse::<DeviceSpec>()?;
        }

        if let Some(listen) = &cli.listen {
            config.listen = listen.clone();
        }

        if let Some(port) = cli.port {
            config.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values the detector does not own
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be positive");
        }
        if self.upload_field.is_empty() {
            anyhow::bail!("upload_field must not be empty");
        }
        if !self.label_template.contains("{label}") {
            anyhow::bail!("label_template must contain {{label}}");
        }
        self.detector.validate()?;
        Ok(())
    }

    /// Human-facing label for a predicted class
    pub fn render_label(&self, label: &str) -> String {
        self.label_template.replace("{label}", label)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
            upload_field: default_upload_field(),
            label_template: default_label_template(),
            detector: DetectorConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_upload_field() -> String {
    "file".to_string()
}

fn default_label_template() -> String {
    "Loại rác {label}".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.upload_field, "file");
        assert_eq!(config.render_label("glass"), "Loại rác glass");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
port: 9000
label_template: "Waste type {label}"
detector:
  low_confidence: unknown
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.listen, "0.0.0.0");
        assert_eq!(config.render_label("metal"), "Waste type metal");
        assert_eq!(
            config.detector.low_confidence,
            sortvision_classifier::LowConfidencePolicy::Unknown
        );
    }

    #[test]
    fn test_template_must_reference_label() {
        let config = ServerConfig {
            label_template: "constant".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides_missing_file() {
        let cli = crate::Cli::parse_from([
            "sortvision-server",
            "--config",
            "/nonexistent/sortvision.yaml",
            "--checkpoint",
            "/models/trash.safetensors",
            "--device",
            "cpu",
            "--port",
            "8081",
        ]);

        let config = ServerConfig::load(&cli.config, &cli).unwrap();
        assert_eq!(config.port, 8081);
        assert!(matches!(
            config.detector.model.source,
            sortvision_classifier::ModelSourceSpec::Local { ref path } if path.ends_with("trash.safetensors")
        ));
    }

    #[test]
    fn test_cli_rejects_unknown_device() {
        let cli = crate::Cli::parse_from(["sortvision-server", "--device", "tpu"]);
        assert!(ServerConfig::load("/nonexistent/sortvision.yaml", &cli).is_err());
    }
}
