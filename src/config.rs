//! Manager configuration

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Tunables for one wallet manager
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Seconds between periodic sync passes
    #[serde(default = "default_sync_period_secs")]
    pub sync_period_secs: u64,

    /// Directory persisted state lives under; each network gets its own
    /// subdirectory
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Chain height assumed before the first sync pass reports a real one
    #[serde(default)]
    pub initial_block_height: u64,

    /// Total time budget for retrying a transient submission failure before
    /// the transfer is marked errored
    #[serde(default = "default_submit_retry_secs")]
    pub submit_retry_secs: u64,
}

fn default_sync_period_secs() -> u64 {
    30
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("wallet-state")
}

fn default_submit_retry_secs() -> u64 {
    30
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sync_period_secs: default_sync_period_secs(),
            storage_dir: default_storage_dir(),
            initial_block_height: 0,
            submit_retry_secs: default_submit_retry_secs(),
        }
    }
}

impl ManagerConfig {
    /// Load from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("read {}: {}", path.as_ref().display(), e)))?;
        let config: Self =
            serde_json::from_str(&data).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values a running manager cannot tolerate
    pub fn validate(&self) -> Result<()> {
        if self.sync_period_secs == 0 {
            return Err(Error::Config(
                "sync_period_secs must be positive".to_string(),
            ));
        }
        if self.storage_dir.as_os_str().is_empty() {
            return Err(Error::Config("storage_dir must not be empty".to_string()));
        }
        Ok(())
    }
}
