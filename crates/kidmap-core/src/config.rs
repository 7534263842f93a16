//! Configuration for hosts embedding the core and for the `kidmap` CLI.
//!
//! Stored at `~/.config/kidmap/config.json`. Every field has a default, so a
//! missing file or a partial one both work. `KIDMAP_TRANSIT_URL` and
//! `KIDMAP_TRANSIT_API_KEY` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::RegionConfig;
use crate::transit::{RetryPolicy, UpdaterConfig};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "kidmap";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_TRANSIT_URL: &str = "KIDMAP_TRANSIT_URL";
pub const ENV_TRANSIT_API_KEY: &str = "KIDMAP_TRANSIT_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the transit adapter service.
    pub transit_base_url: Option<String>,
    /// Name of the env var holding the adapter API key.
    pub transit_api_key_env: String,
    /// Header the API key is sent in.
    pub transit_api_key_header: Option<String>,

    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub fetch_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,

    pub check_in_timeout_secs: i64,
    pub sweep_interval_secs: u64,

    /// Where cache files and parental state live. Defaults to the
    /// platform cache directory.
    pub data_dir: Option<PathBuf>,

    pub regions: Vec<RegionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let updater = UpdaterConfig::default();
        Self {
            transit_base_url: None,
            transit_api_key_env: ENV_TRANSIT_API_KEY.to_string(),
            transit_api_key_header: None,
            cache_capacity: 16,
            cache_ttl_secs: updater.cache_ttl.as_secs(),
            fetch_timeout_secs: updater.attempt_timeout.as_secs(),
            retry_attempts: updater.retry.max_attempts,
            retry_base_delay_ms: updater.retry.base_delay.as_millis() as u64,
            retry_max_delay_ms: updater.retry.max_delay.as_millis() as u64,
            batch_size: updater.batch_size,
            batch_pause_ms: updater.batch_pause.as_millis() as u64,
            check_in_timeout_secs: crate::models::parental::DEFAULT_CHECK_IN_TIMEOUT_SECS,
            sweep_interval_secs: 30,
            data_dir: None,
            regions: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the default location, then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn regions_cache_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("regions"))
    }

    pub fn parental_state_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("parental.json"))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides using `lookup` in place of the process environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_TRANSIT_URL).filter(|s| !s.trim().is_empty()) {
            self.transit_base_url = Some(url);
        }
    }

    /// The adapter API key, read from the configured env var.
    pub fn transit_api_key(&self) -> Option<String> {
        self.transit_api_key_from(|name| std::env::var(name).ok())
    }

    pub fn transit_api_key_from<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(&self.transit_api_key_env)
            .or_else(|| lookup(ENV_TRANSIT_API_KEY))
            .filter(|k| !k.is_empty())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            cache_ttl: self.cache_ttl(),
            attempt_timeout: Duration::from_secs(self.fetch_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts.max(1),
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                ..RetryPolicy::default()
            },
            batch_size: self.batch_size,
            batch_pause: Duration::from_millis(self.batch_pause_ms),
        }
    }

    pub fn region(&self, id: &str) -> Option<&RegionConfig> {
        self.regions.iter().find(|r| r.id == id)
    }
}
