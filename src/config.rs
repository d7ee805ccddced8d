//! Engine Configuration
//!
//! JSON file, camelCase keys. Every field has a default so an empty object
//! is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::encoder::OutputFormat;
use crate::session::RetrievalMode;
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config requires engine >= {0}, current is {1}")]
    EngineVersionMismatch(String, String),

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_filter() -> String { "scanforge_core=info,warn".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_min_version")]
    pub engine_min_version: String,
    /// Retrieval mode given to newly opened sessions
    #[serde(default)]
    pub fast_retrieval: bool,
    #[serde(default = "default_formats")]
    pub enabled_formats: Vec<OutputFormat>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_min_version() -> String { crate::MIN_ENGINE_VERSION.to_string() }
fn default_formats() -> Vec<OutputFormat> { OutputFormat::ALL.to_vec() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_min_version: default_min_version(),
            fast_retrieval: false,
            enabled_formats: default_formats(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.check_engine_version()?;
        Ok(config)
    }

    pub fn retrieval_mode(&self) -> RetrievalMode {
        if self.fast_retrieval {
            RetrievalMode::Fast
        } else {
            RetrievalMode::Slow
        }
    }

    fn check_engine_version(&self) -> Result<(), ConfigError> {
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|_| ConfigError::InvalidVersion(ENGINE_VERSION.to_string()))?;
        let min_ver = semver::Version::parse(&self.engine_min_version)
            .map_err(|_| ConfigError::InvalidVersion(self.engine_min_version.clone()))?;

        if engine_ver < min_ver {
            return Err(ConfigError::EngineVersionMismatch(
                self.engine_min_version.clone(),
                ENGINE_VERSION.to_string(),
            ));
        }
        Ok(())
    }
}
