//! Object store abstraction.
//!
//! Bundles live in a store that supports existence checks, byte-range reads,
//! atomic creation and write sessions. A write session behaves like a file
//! opened for update: positioned writes, appends at the end and a final
//! commit. Dropping a session without committing abandons it.
//!
//! ## Implementations
//!
//! - [`MemoryObjectStore`]: in-process map; a session works on a private
//!   copy that replaces the object on commit, like a blob upload
//! - [`LocalObjectStore`]: files below a root directory

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::ops::Range;

pub mod local;
pub mod memory;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

/// Object storage operations used by the bundle engine.
#[async_trait]
pub trait ObjectStore: Debug + Send + Sync {
    /// Check if an object exists
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Current size of an object, `None` if it does not exist
    async fn object_size(&self, id: &str) -> Result<Option<u64>>;

    /// Read the bytes in `range`
    ///
    /// Returns `BundleError::ObjectNotFound` if the object doesn't exist and
    /// `BundleError::Corruption` if the range extends past its end.
    async fn read_range(&self, id: &str, range: Range<u64>) -> Result<Bytes>;

    /// Create an object unless it already exists
    ///
    /// Returns `true` if this call created the object.
    async fn put_if_absent(&self, id: &str, bytes: Bytes) -> Result<bool>;

    /// Open an existing object for update
    async fn open_write_session(&self, id: &str) -> Result<Box<dyn WriteSession>>;

    /// Delete every object under `prefix`
    ///
    /// Deleting a prefix that holds nothing succeeds.
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

/// Update handle for one object.
#[async_trait]
pub trait WriteSession: Send {
    /// Current object length, including appended bytes
    fn len(&self) -> u64;

    /// Whether the object is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `len` bytes at `offset`, seeing this session's own writes
    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes>;

    /// Overwrite bytes at `offset`; the range must lie inside the object
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Append at the end; returns the offset of the first appended byte
    async fn append(&mut self, data: &[u8]) -> Result<u64>;

    /// Make all writes durable and visible
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Check that `range` lies inside an object of `len` bytes.
pub(crate) fn check_range(id: &str, range: &Range<u64>, len: u64) -> Result<()> {
    if range.start > range.end || range.end > len {
        return Err(crate::BundleError::Corruption(format!(
            "range {}..{} outside of {id} ({len} bytes)",
            range.start, range.end
        )));
    }
    Ok(())
}
