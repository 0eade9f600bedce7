use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;
use turnstile_events::KeyCode;

use crate::config::paths::ProjectPaths;
use crate::config::scheduler_config::{LoggingConfig, SchedulerConfig, ScriptConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("config file not found")]
    NotFound,
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings for the host frame loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Target duration of one host frame
    pub frame_ms: u64,
    /// Key that aborts and restarts every script
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reload_key: Option<KeyCode>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            frame_ms: 16,
            reload_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnstileConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub host: HostConfig,

    /// Per-script overrides keyed by script name
    #[serde(default)]
    pub scripts: BTreeMap<String, ScriptConfig>,
}

impl TurnstileConfig {
    /// Default location of the config file, if a home directory exists
    pub fn config_path() -> Option<PathBuf> {
        ProjectPaths::new("turnstile").map(|paths| paths.config_dir().join("config.toml"))
    }

    pub fn load() -> Result<Self, ConfigLoadError> {
        let path = Self::config_path().ok_or(ConfigLoadError::NotFound)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound);
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path().context("failed to determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}
