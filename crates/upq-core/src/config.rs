use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::retry::{RetrySchedule, DEFAULT_RETRY_DELAYS_MS};
use crate::uploader::DEFAULT_CHUNK_SIZE;

fn default_max_concurrent_batches() -> usize {
    3
}

fn default_retry_delays_ms() -> Vec<u64> {
    DEFAULT_RETRY_DELAYS_MS.to_vec()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Global configuration loaded from `~/.config/upq/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpqConfig {
    /// Maximum number of batches uploading at the same time (at least 1).
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Delays between attempts of one upload, in milliseconds.
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,
    /// Upload endpoint handed to every uploader.
    #[serde(default)]
    pub server_endpoint: String,
    /// Message an environment adapter shows when going offline with uploads pending.
    #[serde(default)]
    pub offline_message: Option<String>,
    /// Copy chunk size of the local-directory uploader, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for UpqConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: default_max_concurrent_batches(),
            retry_delays_ms: default_retry_delays_ms(),
            server_endpoint: String::new(),
            offline_message: None,
            chunk_size: default_chunk_size(),
        }
    }
}

impl UpqConfig {
    /// Concurrency bound, clamped to at least one batch.
    pub fn max_concurrent_batches(&self) -> usize {
        self.max_concurrent_batches.max(1)
    }

    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule::from_millis(&self.retry_delays_ms)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("upq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<UpqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = UpqConfig::default();
        let toml = default_cfg.to_toml_string()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: UpqConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
