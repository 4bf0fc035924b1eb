// 7.0 config.rs: process settings. logging plus the engine block, read from
// config/<env>.yaml. engine defaults live on EngineConfig itself.

use crate::engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    // "hourly", "daily", anything else never rotates
    pub rotation: String,
    pub snapshot_path: Option<String>,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
            log_file: "ledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            snapshot_path: None,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// Loads `config/{env}.yaml`.
    pub fn load_env(env: &str) -> Result<Self, ConfigError> {
        Self::load(format!("config/{}.yaml", env))
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_file.trim().is_empty() {
            return Err(ConfigError::Invalid("log_file must not be empty".into()));
        }
        self.engine.validate().map_err(ConfigError::Invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config yaml: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
