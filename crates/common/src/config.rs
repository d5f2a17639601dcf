//! Configuration structures for Inflight
//!
//! This module defines all configuration types used by the runtime.
//! Configurations are loaded from YAML files and can be overridden by
//! environment variables.

use crate::error::{InflightError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the Inflight runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Request registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Model download configuration
    #[serde(default)]
    pub download: DownloadConfig,

    /// Known models
    #[serde(default)]
    pub models: Vec<ModelRecord>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding downloaded model assets
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Model to prepare at startup, if any
    pub default_model: Option<String>,
}

/// Request registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum number of concurrently in-flight requests
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

/// Model download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum concurrent file downloads per model
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent: usize,
}

/// A known model and where its assets live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelRecord {
    /// Model identifier
    pub model_id: String,

    /// Base URL the model's assets are fetched from
    pub model_url: String,

    /// Engine library descriptor for this model
    pub model_lib: String,

    /// Estimated accelerator memory requirement in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_vram_bytes: Option<u64>,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,

    /// Enable structured logging
    #[serde(default = "default_structured_logging")]
    pub structured_logging: bool,
}

/// Default value functions
fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_max_in_flight() -> usize {
    64
}

fn default_max_concurrent_downloads() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

fn default_structured_logging() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            default_model: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent_downloads(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
            structured_logging: default_structured_logging(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            registry: RegistryConfig::default(),
            download: DownloadConfig::default(),
            models: Vec::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            InflightError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: RuntimeConfig = serde_yaml::from_str(&content).map_err(|e| {
            InflightError::config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = RuntimeConfig::default();

        if let Ok(dir) = std::env::var("INFLIGHT_MODEL_DIR") {
            config.engine.model_dir = PathBuf::from(dir);
        }

        if let Ok(max) = std::env::var("INFLIGHT_MAX_IN_FLIGHT") {
            config.registry.max_in_flight = max
                .parse()
                .map_err(|_| InflightError::config("Invalid INFLIGHT_MAX_IN_FLIGHT value"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.registry.max_in_flight == 0 {
            return Err(InflightError::config("registry.max_in_flight must be > 0"));
        }

        if self.download.max_concurrent == 0 {
            return Err(InflightError::config("download.max_concurrent must be > 0"));
        }

        let mut seen = std::collections::HashSet::new();
        for record in &self.models {
            if !seen.insert(record.model_id.as_str()) {
                return Err(InflightError::config(format!(
                    "Duplicate model id in config: {}",
                    record.model_id
                )));
            }
        }

        if let Some(default_model) = &self.engine.default_model {
            if self.find_model(default_model).is_none() {
                return Err(InflightError::config(format!(
                    "Default model {} not present in model list",
                    default_model
                )));
            }
        }

        Ok(())
    }

    /// Look up a model record by id
    pub fn find_model(&self, model_id: &str) -> Option<&ModelRecord> {
        self.models.iter().find(|r| r.model_id == model_id)
    }
}
