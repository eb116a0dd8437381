use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Server configuration, read wholesale from a JSON file at startup.
/// Every field has a default so a missing file means "run with defaults".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for the HTTP API
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Shared bearer token. Empty string disables the check.
    pub access_key: String,
    /// Root directory for accounts.json, stored mail and attachments
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("mailstash"))
            .unwrap_or_else(|| PathBuf::from("data"));
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            access_key: String::new(),
            data_dir,
        }
    }
}

impl Config {
    /// Load configuration from `path`. A missing file yields the defaults;
    /// an unreadable or malformed file is a startup error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn auth_enabled(&self) -> bool {
        !self.access_key.is_empty()
    }
}
