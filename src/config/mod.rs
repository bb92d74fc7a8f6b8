//! # Configuration
//!
//! Warpgate reads a single TOML file with three sections:
//!
//! - [`TeleportConfig`] - default delays, the default home limit and the peer-request timeout
//! - [`StorageConfig`] - where the sled database lives
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ```toml
//! [teleport]
//! teleport_delay = 3
//! max_homes = 3
//! tpa_timeout = 30
//!
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! file = "warpgate.log"
//! ```
//!
//! Per-player permission overrides (`teleport.home.limit.[int]` and friends) take
//! precedence over the `[teleport]` values; see [`crate::teleport::commands`].

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub teleport: TeleportConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleportConfig {
    /// Seconds before a home, warp, back, spawn or accepted peer teleport fires.
    #[serde(default = "default_teleport_delay")]
    pub teleport_delay: i64,
    #[serde(default = "default_max_homes")]
    pub max_homes: usize,
    /// Seconds an unanswered peer request stays open.
    #[serde(default = "default_tpa_timeout")]
    pub tpa_timeout: i64,
}

fn default_teleport_delay() -> i64 {
    3
}

fn default_max_homes() -> usize {
    3
}

fn default_tpa_timeout() -> i64 {
    30
}

impl Default for TeleportConfig {
    fn default() -> Self {
        Self {
            teleport_delay: default_teleport_delay(),
            max_homes: default_max_homes(),
            tpa_timeout: default_tpa_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Optional override for the sled database path; defaults to `<data_dir>/teleport`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Negative delays would fire immediately anyway; a negative timeout is always a typo.
    pub fn validate(&self) -> Result<()> {
        if self.teleport.tpa_timeout < 0 {
            return Err(anyhow!(
                "teleport.tpa_timeout must not be negative (got {})",
                self.teleport.tpa_timeout
            ));
        }
        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir must not be empty"));
        }
        Ok(())
    }

    /// Location of the sled database.
    pub fn db_path(&self) -> PathBuf {
        match &self.storage.db_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.storage.data_dir).join("teleport"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            teleport: TeleportConfig::default(),
            storage: StorageConfig {
                data_dir: "./data".to_string(),
                db_path: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("warpgate.log".to_string()),
            },
        }
    }
}
