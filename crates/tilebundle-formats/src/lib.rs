//! Binary layout of Compact Cache v2 tile bundles.
//!
//! A bundle stores up to 16,384 tiles of one zoom level, arranged as a
//! 128 x 128 grid. The file is made of three parts:
//!
//! - **Header**: 64 bytes of little-endian fields (see [`header`])
//! - **Index**: 16,384 packed 8-byte entries, one per grid cell (see [`index`])
//! - **Data region**: append-only length-prefixed tile records (see [`record`])
//!
//! This crate performs no I/O. It describes where things live inside a bundle
//! and how to encode and decode them; the storage crate moves the bytes.
//!
//! # Design Principles
//!
//! - **Symmetric Operations**: every structure can be parsed and built
//! - **Checked Packing**: values that do not fit their bit fields are rejected
//!   instead of silently corrupting neighbouring fields
//! - **Round-Trip Guarantee**: parse(build(data)) == data

#![warn(missing_docs)]
#![allow(clippy::cast_lossless)]

use thiserror::Error;

pub mod header;
pub mod index;
pub mod location;
pub mod record;

pub use header::BundleHeader;
pub use index::{BundleIndex, IndexEntry};
pub use location::{BundleLocation, TileCoord};

/// Bundle grid width in tiles.
pub const GRID_WIDTH: u32 = 128;

/// Bundle grid height in tiles.
pub const GRID_HEIGHT: u32 = 128;

/// Number of grid cells (and index entries) in one bundle.
pub const TILES_PER_BUNDLE: usize = (GRID_WIDTH * GRID_HEIGHT) as usize;

/// Size of one packed index entry in bytes.
pub const INDEX_ENTRY_SIZE: usize = 8;

/// Size of the complete index in bytes (131,072).
pub const INDEX_SIZE: usize = TILES_PER_BUNDLE * INDEX_ENTRY_SIZE;

/// Size of the fixed bundle header in bytes.
pub const HEADER_SIZE: usize = 64;

/// Offset of the first byte of the data region.
pub const DATA_REGION_OFFSET: u64 = (HEADER_SIZE + INDEX_SIZE) as u64;

/// Bundle format version written by this crate.
pub const BUNDLE_VERSION: u32 = 3;

/// Bundle file extension.
pub const BUNDLE_EXT: &str = "bundle";

/// Index file extension of the v1 format (separate `.bundlx` index files).
///
/// The v2 layout keeps the index inside the bundle; the constant is kept so
/// tooling can recognise and skip v1 artifacts sitting next to v2 bundles.
pub const LEGACY_INDEX_EXT: &str = "bundlx";

/// Lock file extension.
pub const LOCK_EXT: &str = "lck";

/// Result type for format operations.
pub type Result<T> = std::result::Result<T, FormatError>;

/// Errors raised while encoding or decoding bundle structures.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Header fields do not describe a v2 bundle.
    #[error("Invalid bundle header: {reason}")]
    InvalidHeader {
        /// Which check failed
        reason: String,
    },

    /// Header carries a version this crate does not understand.
    #[error("Unsupported bundle version: {0}")]
    UnsupportedVersion(u32),

    /// A value does not fit the bit field reserved for it.
    #[error("{field} value {value} exceeds the encodable maximum {max}")]
    EncodingOverflow {
        /// Name of the field being packed
        field: &'static str,
        /// Offending value
        value: u64,
        /// Largest value the field can hold
        max: u64,
    },

    /// Grid-relative position outside the 128 x 128 block.
    #[error("Cell ({rel_x}, {rel_y}) lies outside the bundle grid")]
    CellOutOfGrid {
        /// Column within the block
        rel_x: u32,
        /// Row within the block
        rel_y: u32,
    },

    /// Zero-length payloads cannot be told apart from absent cells.
    #[error("Empty tile payload")]
    EmptyPayload,

    /// Input is shorter than the structure being decoded.
    #[error("Truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Structure being decoded
        what: &'static str,
        /// Required length
        expected: usize,
        /// Available length
        actual: usize,
    },

    /// Low-level binary read/write failure.
    #[error("Binary format error: {0}")]
    Binary(#[from] binrw::Error),
}

/// Symmetric parse/build contract shared by the fixed bundle structures.
pub trait BundleFormat: Sized {
    /// Parse from bytes
    fn parse(data: &[u8]) -> Result<Self>;

    /// Build to bytes
    fn build(&self) -> Result<Vec<u8>>;

    /// Verify round-trip correctness
    fn verify_round_trip(data: &[u8]) -> Result<()> {
        let parsed = Self::parse(data)?;
        let rebuilt = parsed.build()?;
        if data != rebuilt.as_slice() {
            return Err(FormatError::InvalidHeader {
                reason: "round-trip verification failed".to_string(),
            });
        }
        Ok(())
    }
}

/// Bytes of a freshly created bundle: canonical header plus an empty index.
///
/// Every index cell holds the ArcGIS "missing tile" value (offset 4, size 0).
pub fn empty_bundle() -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + INDEX_SIZE);
    buf.extend_from_slice(&BundleHeader::new().to_bytes());
    buf.extend_from_slice(&BundleIndex::empty().to_bytes());
    buf
}
