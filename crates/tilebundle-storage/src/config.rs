//! Configuration for the bundle cache

use crate::{BundleError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default lock acquisition timeout (100 seconds).
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 100_000;

/// Default lock retry interval.
pub const DEFAULT_LOCK_RETRY_MS: u64 = 50;

/// Configuration for the bundle cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleCacheConfig {
    /// Object key prefix under which level directories are created
    pub cache_root: String,

    /// Directory for lock files (used by the file lock service)
    pub lock_dir: Option<PathBuf>,

    /// How long to wait for a bundle lock, in milliseconds
    pub lock_timeout_ms: u64,

    /// Polling interval while waiting for a bundle lock, in milliseconds
    pub lock_retry_ms: u64,
}

impl Default for BundleCacheConfig {
    fn default() -> Self {
        Self {
            cache_root: "cache".to_string(),
            lock_dir: None,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            lock_retry_ms: DEFAULT_LOCK_RETRY_MS,
        }
    }
}

impl BundleCacheConfig {
    /// Create a new configuration with the specified cache root
    pub fn new(cache_root: impl Into<String>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            BundleError::Config(format!("{}: {e}", path.as_ref().display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the directory used for lock files
    #[must_use]
    pub fn with_lock_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.lock_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the lock acquisition timeout
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the lock retry interval
    #[must_use]
    pub const fn with_lock_retry(mut self, interval: Duration) -> Self {
        self.lock_retry_ms = interval.as_millis() as u64;
        self
    }

    /// Lock acquisition timeout.
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Lock retry interval.
    pub const fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }

    /// Namespace prefix for lock keys of this cache.
    ///
    /// Derived from the cache root so caches sharing a lock directory never
    /// contend for each other's bundles.
    pub fn lock_namespace(&self) -> String {
        let digest = md5::compute(self.cache_root.as_bytes());
        format!("bundlecache-{}", hex::encode(digest.0))
    }

    /// Check the configuration for values the cache cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_root.trim_matches('/').is_empty() {
            return Err(BundleError::Config("cache_root must not be empty".into()));
        }
        if self.lock_retry_ms == 0 {
            return Err(BundleError::Config(
                "lock_retry_ms must be greater than zero".into(),
            ));
        }
        if self.lock_timeout_ms < self.lock_retry_ms {
            return Err(BundleError::Config(format!(
                "lock_timeout_ms ({}) is shorter than lock_retry_ms ({})",
                self.lock_timeout_ms, self.lock_retry_ms
            )));
        }
        Ok(())
    }
}
