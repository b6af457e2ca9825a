//! Exporter configuration.
//!
//! Settings come from an optional TOML file; every section and field
//! has a default matching a stock `wg-easy` style deployment.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// `interval_secs` is zero.
    #[error("sampling interval must be at least one second")]
    InvalidInterval,
    /// `program` is blank.
    #[error("wireguard program must not be empty")]
    EmptyProgram,
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// WireGuard data sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireguardConfig {
    /// Control tool to run.
    pub program: String,
    /// Arguments producing the machine readable dump.
    pub args: Vec<String>,
    /// JSON file mapping public keys to client names.
    pub identity_file: PathBuf,
}

impl Default for WireguardConfig {
    fn default() -> Self {
        Self {
            program: "wg".to_string(),
            args: vec!["show".to_string(), "all".to_string(), "dump".to_string()],
            identity_file: PathBuf::from("/etc/wireguard/wg0.json"),
        }
    }
}

/// Sampling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSection {
    /// Seconds between sampling cycles.
    pub interval_secs: u64,
    /// Seconds after which an unpublished client is removed (0 to disable).
    pub stale_after_secs: u64,
}

impl Default for SamplerSection {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            stale_after_secs: 0,
        }
    }
}

impl SamplerSection {
    /// Interval between cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Staleness TTL, if enabled.
    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }
}

/// Scrape endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to listen on.
    pub listen: SocketAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: ([0, 0, 0, 0], 9001).into(),
        }
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// WireGuard sources.
    #[serde(default)]
    pub wireguard: WireguardConfig,
    /// Sampling loop.
    #[serde(default)]
    pub sampler: SamplerSection,
    /// Scrape endpoint.
    #[serde(default)]
    pub server: ServerSection,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates TOML configuration.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampler.interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        if self.wireguard.program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        Ok(())
    }
}
