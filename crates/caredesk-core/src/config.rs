//! CareDesk configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CareDeskError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareDeskConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for CareDeskConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl CareDeskConfig {
    /// Load config from the default path (~/.caredesk/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CareDeskError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CareDeskError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CareDeskError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the CareDesk home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".caredesk")
    }
}

/// Scheduler loop and session-generation window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max due tasks fetched per poll tick.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Throttle between tasks within one tick, milliseconds.
    #[serde(default = "default_task_delay_ms")]
    pub task_delay_ms: u64,
    /// Sleep after an empty tick, milliseconds.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    /// Look-ahead horizon for session materialization, days.
    #[serde(default = "default_sliding_range_days")]
    pub sliding_range_days: i64,
}

fn default_batch_limit() -> usize { 10 }
fn default_task_delay_ms() -> u64 { 250 }
fn default_idle_delay_ms() -> u64 { 1000 }
fn default_sliding_range_days() -> i64 { 20 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            task_delay_ms: default_task_delay_ms(),
            idle_delay_ms: default_idle_delay_ms(),
            sliding_range_days: default_sliding_range_days(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. Empty means ~/.caredesk/caredesk.db.
    #[serde(default)]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: String::new() }
    }
}

impl StorageConfig {
    /// Resolve the database path, falling back to the default location.
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            CareDeskConfig::home_dir().join("caredesk.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}
