//! Daemon configuration file

use std::collections::BTreeMap;
use std::path::Path;

use abr_policy::{PolicyConfig, QualityVariant};
use abr_server::ServerConfig;
use encoder_supervisor::SupervisorConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFailed(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
}

/// Top-level daemon configuration, loaded from a TOML file.
///
/// Every section has usable defaults except `streams`, which maps each
/// stream id to its configured variant ladder.
#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Stream id to variant ladder
    #[serde(default)]
    pub streams: BTreeMap<String, Vec<QualityVariant>>,
}

fn default_bind() -> String {
    "0.0.0.0:8098".to_string()
}

impl DaemonConfig {
    pub fn read_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
