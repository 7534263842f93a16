//! Durable storage for cache entries, used to warm-start the region cache
//! after the app restarts.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

/// File name prefix for persisted region entries
const FILE_PREFIX: &str = "region_";

/// A value together with the wall-clock time it was cached and its TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl<T> CachedData<T> {
    pub fn with_ttl(data: T, cached_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            data,
            cached_at,
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                // Round up: 1h 30m+ becomes 2h
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_expired(&self) -> bool {
        match (Utc::now() - self.cached_at).to_std() {
            Ok(age) => age >= self.ttl(),
            Err(_) => false,
        }
    }
}

/// Durable storage behind a [`RegionDataCache`](super::RegionDataCache).
///
/// The cache writes through on `set` and deletes on invalidation, eviction
/// and `clear`. It only reads back during warm start.
pub trait CacheBackend<T>: Send + Sync {
    fn store(&self, key: &str, entry: &CachedData<T>) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn load_all(&self) -> Result<Vec<(String, CachedData<T>)>>;
}

/// Stores each entry as pretty-printed JSON in `{cache_dir}/region_{key}.json`.
pub struct DiskBackend<T> {
    cache_dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DiskBackend<T> {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
        Ok(Self {
            cache_dir,
            _marker: PhantomData,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Keys become file names, so keep them to a safe character set.
    fn is_safe_key(key: &str) -> bool {
        !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    fn cache_path(&self, key: &str) -> Result<PathBuf> {
        if !Self::is_safe_key(key) {
            anyhow::bail!("Refusing to persist cache key {:?}", key);
        }
        Ok(self.cache_dir.join(format!("{}{}.json", FILE_PREFIX, key)))
    }

    fn key_from_path(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let key = name.strip_prefix(FILE_PREFIX)?.strip_suffix(".json")?;
        Self::is_safe_key(key).then(|| key.to_string())
    }
}

impl<T> CacheBackend<T> for DiskBackend<T>
where
    T: Serialize + DeserializeOwned,
{
    fn store(&self, key: &str, entry: &CachedData<T>) -> Result<()> {
        let path = self.cache_path(key)?;
        let contents = serde_json::to_string_pretty(entry)?;
        // Write then rename so a crash never leaves a half-written file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write cache file: {}", key))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move cache file into place: {}", key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.cache_path(key)?;
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove cache file: {}", key))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if Self::key_from_path(&path).is_some() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(String, CachedData<T>)>> {
        let mut loaded = Vec::new();
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            let Some(key) = Self::key_from_path(&path) else {
                continue;
            };
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read cache file: {}", key))?;
            match serde_json::from_str::<CachedData<T>>(&contents) {
                Ok(cached) => loaded.push((key, cached)),
                Err(e) => {
                    // A corrupt file only costs us a refetch
                    debug!(cache = %key, error = %e, "Skipping unreadable cache file");
                }
            }
        }
        Ok(loaded)
    }
}

// ============================================================================
// Tests
// ============================================================================
