//! Tile value passed between the caller and the cache.

use bytes::Bytes;
use std::fmt;
use std::time::SystemTime;
use tilebundle_formats::TileCoord;

/// Freshness of a loaded tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The storage keeps no timestamps.
    Unknown,
    /// Last modification time reported by the storage.
    Modified(SystemTime),
}

/// A tile request or result.
///
/// The cache fills in `data` on load and sets `stored` after a successful
/// store. A tile without a coordinate is a placeholder (for example outside
/// the grid) and is always treated as resolved.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Tile {
    /// Position in the tile grid, `None` for placeholders
    pub coord: Option<TileCoord>,
    /// Encoded image bytes
    pub data: Option<Bytes>,
    /// Set once the payload is persisted; such tiles are not written again
    pub stored: bool,
    /// Freshness reported by the last metadata load
    pub timestamp: Option<Freshness>,
}

impl Tile {
    /// Tile to be loaded.
    pub const fn new(coord: TileCoord) -> Self {
        Self {
            coord: Some(coord),
            data: None,
            stored: false,
            timestamp: None,
        }
    }

    /// Tile carrying a payload to be stored.
    pub fn with_data(coord: TileCoord, data: impl Into<Bytes>) -> Self {
        Self {
            coord: Some(coord),
            data: Some(data.into()),
            stored: false,
            timestamp: None,
        }
    }

    /// Placeholder without coordinate.
    pub const fn placeholder() -> Self {
        Self {
            coord: None,
            data: None,
            stored: false,
            timestamp: None,
        }
    }

    /// Whether nothing needs to be read for this tile.
    pub const fn is_resolved(&self) -> bool {
        self.coord.is_none() || self.data.is_some()
    }

    /// Whether the tile still has to be written.
    pub const fn needs_store(&self) -> bool {
        self.coord.is_some() && !self.stored
    }

    /// Payload size in bytes, 0 without payload.
    pub fn size(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    pub(crate) fn describe(&self) -> String {
        self.coord
            .map_or_else(|| "<placeholder>".to_string(), |c| c.to_string())
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("coord", &self.coord)
            .field("data_len", &self.data.as_ref().map(Bytes::len))
            .field("stored", &self.stored)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
