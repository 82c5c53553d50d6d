//! Lock files in a shared directory.
//!
//! A lock is held by whoever manages to create `<lock_dir>/<key>` with
//! `create_new`. Waiters retry at a fixed interval until a timeout expires.
//! The file is removed when the guard is dropped. A process that dies while
//! holding a lock leaves the file behind; waiters then time out until it is
//! removed by hand.

use super::{LockGuard, LockService};
use crate::{BundleError, BundleCacheConfig, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Lock service backed by lock files.
#[derive(Debug, Clone)]
pub struct FileLockService {
    lock_dir: PathBuf,
    timeout: Duration,
    retry_interval: Duration,
}

impl FileLockService {
    /// Create a service storing lock files below `lock_dir`.
    pub fn new(lock_dir: impl AsRef<Path>, timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            lock_dir: lock_dir.as_ref().to_path_buf(),
            timeout,
            retry_interval,
        }
    }

    /// Create a service from the cache configuration.
    ///
    /// Fails if the configuration names no lock directory.
    pub fn from_config(config: &BundleCacheConfig) -> Result<Self> {
        let lock_dir = config
            .lock_dir
            .as_ref()
            .ok_or_else(|| BundleError::Config("lock_dir is required for file locks".into()))?;
        Ok(Self::new(
            lock_dir,
            config.lock_timeout(),
            config.lock_retry(),
        ))
    }

    /// Path of the lock file for `key`.
    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.lock_dir.join(key.trim_start_matches('/'))
    }
}

/// Held lock file; removed on drop.
struct LockFile {
    _file: File,
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

#[async_trait]
impl LockService for FileLockService {
    async fn acquire_exclusive(&self, key: &str) -> Result<LockGuard> {
        let path = self.lock_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let start = Instant::now();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    // Holder pid, for humans inspecting stale locks.
                    let pid = format!("{}\n", std::process::id());
                    if let Err(e) = file.write_all(pid.as_bytes()).await {
                        debug!("Failed to record pid in {}: {}", path.display(), e);
                    } else if let Err(e) = file.flush().await {
                        debug!("Failed to record pid in {}: {}", path.display(), e);
                    }
                    debug!("Acquired lock file {}", path.display());
                    return Ok(LockGuard::new(key, LockFile { _file: file, path }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if start.elapsed() >= self.timeout {
                        return Err(BundleError::LockTimeout(format!(
                            "lock file timeout after {:?}: {}",
                            self.timeout,
                            path.display()
                        )));
                    }
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(e) => {
                    return Err(BundleError::Lock(format!(
                        "failed to create lock file {}: {e}",
                        path.display()
                    )));
                }
            }
        }
    }
}
