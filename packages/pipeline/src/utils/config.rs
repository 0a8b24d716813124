// packages/pipeline/src/utils/config.rs
//! Logger configuration
//!
//! Loaded from an optional YAML/TOML/JSON file layered with
//! `ASPECT_LOGGER__*` environment variables.

use crate::utils::errors::{LoggerError, Result};
use crate::writers::WriterKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggerConfig {
    /// Writer entries, one backend each
    #[serde(default)]
    pub writers: Vec<WriterEntry>,

    /// Logging and metrics settings
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Close writers from a panic hook before the process unwinds
    #[serde(default = "default_true", alias = "close_on_panic", alias = "closeonpanic")]
    pub close_on_panic: bool,
}

/// One writer entry: a `type` plus backend-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterEntry {
    /// Backend kind name
    #[serde(rename = "type")]
    pub kind: String,

    /// Remaining fields, in document order
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl WriterEntry {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            settings: serde_json::Map::new(),
        }
    }

    /// Builder-style setting
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Resolve the backend kind
    pub fn writer_kind(&self) -> Result<WriterKind> {
        WriterKind::from_str(&self.kind)
    }

    /// Decode the settings into a backend's typed configuration
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(serde_json::Value::Object(self.settings.clone())).map_err(|e| {
            LoggerError::Configuration(format!("invalid {} writer settings: {}", self.kind, e))
        })
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level", alias = "log_level", alias = "loglevel")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json: bool,

    /// Prometheus listen address; metrics export is off when unset
    #[serde(default, alias = "metrics_address", alias = "metricsaddress")]
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            metrics_address: None,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            writers: Vec::new(),
            observability: ObservabilityConfig::default(),
            close_on_panic: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggerConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: LoggerConfig = builder
            .add_source(
                config::Environment::with_prefix("ASPECT_LOGGER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| LoggerError::Configuration(format!("invalid YAML configuration: {}", e)))
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LoggerError::Configuration(format!("cannot render configuration: {}", e)))
    }

    /// Check every writer entry, returning each problem found.
    ///
    /// Unknown kinds and malformed settings are reported here; the writer
    /// collection independently skips such entries at init.
    pub fn validate(&self) -> Vec<LoggerError> {
        self.writers
            .iter()
            .filter_map(|entry| match entry.writer_kind() {
                Ok(kind) => kind.validate(entry).err(),
                Err(e) => Some(e),
            })
            .collect()
    }
}
