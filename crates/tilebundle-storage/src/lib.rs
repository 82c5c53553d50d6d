//! Compact Cache v2 tile bundle engine over object storage.
//!
//! This crate stores raster tiles in Esri "Compact Cache v2" bundles that
//! live in an object store rather than on a local disk. The architecture has
//! two layers:
//!
//! - **Bundle** ([`Bundle`]): one bundle object. Owns the header, the fixed
//!   index and the append-only data region, and serializes writers through
//!   a bundle-scoped exclusive lock.
//! - **Bundle cache** ([`BundleCache`]): maps tile coordinates onto bundles,
//!   batches requests that land in one bundle and wipes whole levels.
//!
//! The object store and the lock primitive are collaborators behind the
//! [`ObjectStore`] and [`LockService`] traits. In-memory and local
//! filesystem stores, an in-process lock service and a lock-file service are
//! provided.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tilebundle_storage::{BundleCache, BundleCacheConfig, Tile, TileCoord};
//! use tilebundle_storage::lock::LocalLockService;
//! use tilebundle_storage::object_store::MemoryObjectStore;
//!
//! # async fn example() -> tilebundle_storage::Result<()> {
//! let cache = BundleCache::new(
//!     BundleCacheConfig::new("tiles/osm"),
//!     Arc::new(MemoryObjectStore::new()),
//!     Arc::new(LocalLockService::new()),
//! )?;
//!
//! let mut tile = Tile::with_data(TileCoord::new(5, 5, 2), b"png bytes".to_vec());
//! cache.store(&mut tile).await?;
//!
//! let mut lookup = Tile::new(TileCoord::new(5, 5, 2));
//! assert!(cache.load(&mut lookup).await?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;
use tilebundle_formats::FormatError;

// Bundle engine
pub mod bundle;

// Coordinate routing
pub mod cache;

// Configuration
pub mod config;

// Lock services
pub mod lock;

// Object store backends
pub mod object_store;

// Tile value type
pub mod tile;

pub use bundle::{Bundle, BundleState, VerifyReport};
pub use cache::BundleCache;
pub use config::BundleCacheConfig;
pub use lock::{LockGuard, LockService};
pub use object_store::{ObjectStore, WriteSession};
pub use tile::{Freshness, Tile};
pub use tilebundle_formats::{BundleLocation, IndexEntry, TileCoord};

/// Result type for bundle operations.
pub type Result<T> = std::result::Result<T, BundleError>;

/// Errors that can occur during bundle operations.
///
/// A missing bundle or tile on a read path is not an error; read operations
/// report it as a negative result instead.
#[derive(Debug, Error)]
pub enum BundleError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bundle bytes could not be encoded or decoded.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// The backing object does not exist.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// A tile that should be written carries no payload.
    #[error("Tile {0} has no payload to store")]
    MissingPayload(String),

    /// A tile was handed to a bundle that does not cover its coordinate.
    #[error("Tile {tile} does not belong to bundle {bundle}")]
    Misrouted {
        /// Tile coordinate
        tile: String,
        /// Bundle object key
        bundle: String,
    },

    /// The bundle lock could not be acquired in time.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// The lock service failed.
    #[error("Lock error: {0}")]
    Lock(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Corruption detected.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// Some tiles of a per-tile fallback batch failed.
    ///
    /// Every tile was attempted; the individual failures were logged.
    #[error("{failed} of {attempted} tiles failed")]
    BatchPartialFailure {
        /// Number of failed tiles
        failed: usize,
        /// Number of tiles attempted
        attempted: usize,
    },

    /// The operation cannot be performed on this format.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl BundleError {
    /// Whether this error means the backing object is missing.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound(_))
    }
}

/// Version information for the storage system.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
