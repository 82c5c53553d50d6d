//! Exclusive locks keyed by bundle.
//!
//! Every store and remove holds the lock of its bundle for the whole write
//! session. Locks are released when the [`LockGuard`] is dropped, which
//! covers early returns and errors.
//!
//! The reach of a lock is the reach of its service:
//!
//! - [`LocalLockService`]: one process
//! - [`FileLockService`]: every process that sees the same lock directory
//!
//! Writers on hosts that share a bundle store but not a lock service race on
//! index rewrites; the last session to commit wins.

use crate::Result;
use async_trait::async_trait;
use std::fmt::{self, Debug};

pub mod file;
pub mod local;

pub use file::FileLockService;
pub use local::LocalLockService;

/// Provider of exclusive, key-scoped locks.
#[async_trait]
pub trait LockService: Debug + Send + Sync {
    /// Wait until the lock for `key` is free and take it
    async fn acquire_exclusive(&self, key: &str) -> Result<LockGuard>;
}

/// Held lock; dropping it releases the lock.
pub struct LockGuard {
    key: String,
    _held: Box<dyn Send + Sync>,
}

impl LockGuard {
    /// Wrap a service-specific handle whose drop releases the lock.
    pub fn new(key: impl Into<String>, held: impl Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            _held: Box::new(held),
        }
    }

    /// Key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}
