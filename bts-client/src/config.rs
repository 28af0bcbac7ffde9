//! Client configuration

use bts_core::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ClientError, Result};

/// Overrides `data_dir` when set
pub const DATA_DIR_ENV: &str = "BTS_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Directory holding the header database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Proof lifecycle settings
    #[serde(default)]
    pub tracker: TrackerConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".bts")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: ClientConfig = toml::from_str(&contents).map_err(|e| {
            ClientError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(config.with_data_dir_override(std::env::var(DATA_DIR_ENV).ok()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            ClientError::Config(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Config from `path` if given, otherwise defaults plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default().with_data_dir_override(std::env::var(DATA_DIR_ENV).ok())),
        }
    }

    pub fn with_data_dir_override(mut self, data_dir: Option<String>) -> Self {
        if let Some(dir) = data_dir.filter(|d| !d.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn header_db_path(&self) -> PathBuf {
        self.data_dir.join("headers")
    }
}
