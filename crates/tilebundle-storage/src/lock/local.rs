//! In-process lock service.

use super::{LockGuard, LockService};
use crate::{BundleError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

type LockTable = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Keyed async mutexes shared by all callers in this process.
///
/// A key's entry lives only while someone holds or waits for it.
#[derive(Debug, Default)]
pub struct LocalLockService {
    locks: LockTable,
    timeout: Option<Duration>,
    acquisitions: AtomicU64,
}

/// Drop the entry for `key` unless another caller still holds or awaits it.
fn evict_idle(locks: &LockTable, key: &str) {
    locks.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Held mutex that removes its idle table entry on release.
struct HeldLock {
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
    key: String,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        // Release first so the table holds the last reference.
        drop(self.guard.take());
        evict_idle(&self.locks, &self.key);
    }
}

impl LocalLockService {
    /// Lock service that waits indefinitely.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock service that gives up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    /// Number of locks handed out so far.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Whether `key` is currently held.
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Number of keys currently held or awaited.
    pub fn tracked_keys(&self) -> usize {
        self.locks.len()
    }
}

#[async_trait]
impl LockService for LocalLockService {
    async fn acquire_exclusive(&self, key: &str) -> Result<LockGuard> {
        let mutex = Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let guard = match self.timeout {
            Some(timeout) => {
                if let Ok(guard) = tokio::time::timeout(timeout, mutex.lock_owned()).await {
                    guard
                } else {
                    evict_idle(&self.locks, key);
                    return Err(BundleError::LockTimeout(format!(
                        "{key} not released within {timeout:?}"
                    )));
                }
            }
            None => mutex.lock_owned().await,
        };

        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        debug!("Acquired lock {}", key);
        Ok(LockGuard::new(
            key,
            HeldLock {
                guard: Some(guard),
                locks: Arc::clone(&self.locks),
                key: key.to_string(),
            },
        ))
    }
}
