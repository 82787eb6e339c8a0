use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::source::DEFAULT_BATCH_LIMIT;
use crate::services::enrichment::PLACEHOLDER_NAME;
use crate::services::error_handling::PulseError;

pub const DEFAULT_CONFIG_FILE: &str = "pulse.json";

pub const ENV_CONFIG_PATH: &str = "PULSE_CONFIG";
pub const ENV_DB_PATH: &str = "PULSE_DB_PATH";
pub const ENV_BATCH_LIMIT: &str = "PULSE_BATCH_LIMIT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Most recent records each live query delivers
    pub batch_limit: usize,

    /// SQLite file backing the document store
    pub database_path: String,

    /// Actor name shown when the profile cannot be resolved
    pub placeholder_name: String,

    /// Queued messages between the subscriptions and the event loop
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            database_path: "pulse.db".to_string(),
            placeholder_name: PLACEHOLDER_NAME.to_string(),
            channel_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, falling back to defaults when it is absent
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reads the file named by `PULSE_CONFIG` (default `pulse.json`), then
    /// applies `PULSE_DB_PATH` and `PULSE_BATCH_LIMIT`.
    pub fn from_env() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = lookup(ENV_CONFIG_PATH).unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(path)?.with_overrides(lookup)
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database_path = path;
        }

        if let Some(limit) = lookup(ENV_BATCH_LIMIT) {
            self.batch_limit = limit.trim().parse().map_err(|_| PulseError::ConfigurationError {
                message: format!("{} must be a positive integer, got {:?}", ENV_BATCH_LIMIT, limit),
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_limit == 0 {
            return Err(PulseError::ConfigurationError {
                message: "batch_limit must be greater than zero".to_string(),
            }
            .into());
        }
        if self.channel_capacity == 0 {
            return Err(PulseError::ConfigurationError {
                message: "channel_capacity must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
