use encoding_rs::Encoding;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::types::CaptureConfig;

/// Errors that can occur when loading capture configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse capture config: {source}")]
    ParseError {
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl CaptureConfig {
    /// Parses and validates a TOML document.
    ///
    /// Missing keys fall back to their defaults, so an empty document
    /// yields `CaptureConfig::default()`.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CaptureConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolves `encoding` to a decoder, accepting any WHATWG label.
    pub fn text_encoding(&self) -> Result<&'static Encoding, ConfigError> {
        Encoding::for_label(self.encoding.trim().as_bytes()).ok_or_else(|| {
            ConfigError::ValidationError {
                message: format!("unknown encoding '{}'", self.encoding),
            }
        })
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - `chunk_size` and `read_timeout_ms` are positive
    /// - `drain_grace_ms` is at least one poll interval
    /// - `encoding` names a known character encoding
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ValidationError {
                message: "chunk_size must be greater than zero".to_string(),
            });
        }

        if self.read_timeout_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "read_timeout_ms must be greater than zero".to_string(),
            });
        }

        if self.drain_grace_ms < self.read_timeout_ms {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "drain_grace_ms ({}) must not be shorter than read_timeout_ms ({})",
                    self.drain_grace_ms, self.read_timeout_ms
                ),
            });
        }

        self.text_encoding()?;
        Ok(())
    }
}
