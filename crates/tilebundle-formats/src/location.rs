//! Tile coordinate to bundle mapping.
//!
//! Bundles are named after the top-left tile of the 128 x 128 block they
//! cover and grouped in one directory per zoom level:
//!
//! ```text
//! <cache_root>/L02/R0000C0080.bundle
//!              ^^^ ^^^^^ ^^^^^
//!              |   |     block column (hex)
//!              |   block row (hex)
//!              zoom level (two decimal digits)
//! ```

use crate::{BUNDLE_EXT, GRID_HEIGHT, GRID_WIDTH, LOCK_EXT, index::relative_cell};
use std::fmt;

/// Global tile coordinate within one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Tile column
    pub x: u32,
    /// Tile row
    pub y: u32,
    /// Zoom level
    pub z: u32,
}

impl TileCoord {
    /// Create a coordinate.
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Position of the tile inside its bundle grid.
    pub const fn relative(&self) -> (u32, u32) {
        relative_cell(self.x, self.y)
    }
}

impl From<(u32, u32, u32)> for TileCoord {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self::new(x, y, z)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Identity of the bundle holding a tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleLocation {
    /// Zoom level
    pub level: u32,
    /// Column of the block's first tile
    pub block_col: u32,
    /// Row of the block's first tile
    pub block_row: u32,
    /// `<cache_root>/L<zz>/R<row>C<col>` without extension
    base_path: String,
}

impl BundleLocation {
    /// Resolve the bundle for `coord` under `cache_root`.
    pub fn locate(cache_root: &str, coord: TileCoord) -> Self {
        let block_col = coord.x / GRID_WIDTH * GRID_WIDTH;
        let block_row = coord.y / GRID_HEIGHT * GRID_HEIGHT;
        let base_path = format!(
            "{}/{}",
            level_dir(cache_root, coord.z),
            bundle_basename(block_row, block_col)
        );
        Self {
            level: coord.z,
            block_col,
            block_row,
            base_path,
        }
    }

    /// `R<row>C<col>` name shared by the bundle and its lock.
    pub fn basename(&self) -> String {
        bundle_basename(self.block_row, self.block_col)
    }

    /// Object key of the bundle file.
    pub fn bundle_path(&self) -> String {
        format!("{}.{BUNDLE_EXT}", self.base_path)
    }

    /// Key of the exclusive lock guarding writes to this bundle.
    pub fn lock_key(&self) -> String {
        format!("{}.{LOCK_EXT}", self.base_path)
    }

    /// Block origin as `(col, row)`.
    pub const fn origin(&self) -> (u32, u32) {
        (self.block_col, self.block_row)
    }

    /// Whether `coord` falls inside this bundle.
    pub const fn contains(&self, coord: TileCoord) -> bool {
        coord.z == self.level
            && coord.x >= self.block_col
            && coord.x - self.block_col < GRID_WIDTH
            && coord.y >= self.block_row
            && coord.y - self.block_row < GRID_HEIGHT
    }
}

impl fmt::Display for BundleLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bundle_path())
    }
}

/// `R<rrrr>C<cccc>` with lowercase hex, at least four digits each.
pub fn bundle_basename(block_row: u32, block_col: u32) -> String {
    format!("R{block_row:04x}C{block_col:04x}")
}

/// Directory (object prefix) of a zoom level.
///
/// Object keys are relative, so leading slashes of the root are dropped.
pub fn level_dir(cache_root: &str, level: u32) -> String {
    let root = cache_root.trim_start_matches('/').trim_end_matches('/');
    if root.is_empty() {
        format!("L{level:02}")
    } else {
        format!("{root}/L{level:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_neighbouring_blocks_differ() {
        let a = BundleLocation::locate("cache", TileCoord::new(5, 5, 2));
        let b = BundleLocation::locate("cache", TileCoord::new(130, 5, 2));

        assert_eq!(a.basename(), "R0000C0000");
        assert_eq!(b.basename(), "R0000C0080");
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_block_shares_bundle() {
        let a = BundleLocation::locate("cache", TileCoord::new(5, 5, 2));
        let b = BundleLocation::locate("cache", TileCoord::new(10, 100, 2));
        assert_eq!(a, b);
        assert!(a.contains(TileCoord::new(127, 127, 2)));
        assert!(!a.contains(TileCoord::new(128, 0, 2)));
        assert!(!a.contains(TileCoord::new(5, 5, 3)));
    }

    #[test]
    fn test_paths() {
        let loc = BundleLocation::locate("/tiles/osm/", TileCoord::new(300, 1000, 12));
        assert_eq!(loc.origin(), (256, 896));
        assert_eq!(loc.bundle_path(), "tiles/osm/L12/R0380C0100.bundle");
        assert_eq!(loc.lock_key(), "tiles/osm/L12/R0380C0100.lck");
        assert_eq!(loc.to_string(), loc.bundle_path());
    }

    #[test]
    fn test_wide_levels() {
        assert_eq!(level_dir("", 7), "L07");
        assert_eq!(level_dir("root", 123), "root/L123");
        assert_eq!(bundle_basename(0x1_0000, 0x80), "R10000C0080");
    }

    #[test]
    fn test_relative() {
        assert_eq!(TileCoord::new(130, 5, 2).relative(), (2, 5));
        assert_eq!(TileCoord::from((1, 2, 3)), TileCoord::new(1, 2, 3));
    }
}
