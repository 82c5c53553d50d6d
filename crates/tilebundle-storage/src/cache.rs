//! Coordinate router.
//!
//! [`BundleCache`] maps tiles onto bundles and forwards requests. A batch
//! whose tiles all land in one bundle is handed over in one call, which
//! means one lock acquisition and one write session. Batches that span
//! bundles fall back to one call per tile; every tile is attempted and
//! failures are collected into [`BundleError::BatchPartialFailure`].

use crate::bundle::Bundle;
use crate::config::BundleCacheConfig;
use crate::lock::LockService;
use crate::object_store::ObjectStore;
use crate::tile::{Freshness, Tile};
use crate::{BundleError, Result};
use std::sync::Arc;
use tilebundle_formats::location::level_dir;
use tilebundle_formats::{BundleLocation, TileCoord};
use tracing::{debug, info, warn};

/// How the tiles of a batch are spread over bundles.
enum Routing {
    /// No tile needs work
    Nothing,
    /// Every tile lands in this bundle
    Single(BundleLocation),
    /// Tiles land in more than one bundle
    Spread,
}

/// Tile cache storing Compact Cache v2 bundles in an object store.
#[derive(Debug)]
pub struct BundleCache {
    config: BundleCacheConfig,
    lock_namespace: String,
    store: Arc<dyn ObjectStore>,
    locks: Arc<dyn LockService>,
}

impl BundleCache {
    /// Create a cache over `store`, serializing writers through `locks`.
    pub fn new(
        config: BundleCacheConfig,
        store: Arc<dyn ObjectStore>,
        locks: Arc<dyn LockService>,
    ) -> Result<Self> {
        config.validate()?;
        let lock_namespace = config.lock_namespace();
        debug!(
            "Bundle cache at {} (lock namespace {})",
            config.cache_root, lock_namespace
        );
        Ok(Self {
            config,
            lock_namespace,
            store,
            locks,
        })
    }

    /// Cache configuration.
    pub const fn config(&self) -> &BundleCacheConfig {
        &self.config
    }

    /// Bundle holding `coord`. Pure; performs no I/O.
    pub fn locate(&self, coord: TileCoord) -> BundleLocation {
        BundleLocation::locate(&self.config.cache_root, coord)
    }

    /// Engine handle for the bundle holding `coord`.
    pub fn bundle(&self, coord: TileCoord) -> Bundle {
        self.bundle_at(self.locate(coord))
    }

    fn bundle_at(&self, location: BundleLocation) -> Bundle {
        Bundle::new(location, Arc::clone(&self.store), Arc::clone(&self.locks))
            .with_lock_namespace(&self.lock_namespace)
    }

    fn route(&self, coords: impl IntoIterator<Item = TileCoord>) -> Routing {
        let mut coords = coords.into_iter();
        let Some(first) = coords.next() else {
            return Routing::Nothing;
        };
        let location = self.locate(first);
        if coords.all(|coord| location.contains(coord)) {
            Routing::Single(location)
        } else {
            Routing::Spread
        }
    }

    /// Whether the tile is stored. Placeholders and tiles with a payload
    /// attached count as cached.
    pub async fn is_cached(&self, tile: &Tile) -> Result<bool> {
        if tile.is_resolved() {
            return Ok(true);
        }
        match tile.coord {
            Some(coord) => self.bundle(coord).is_cached(tile).await,
            None => Ok(true),
        }
    }

    /// Store one tile.
    pub async fn store(&self, tile: &mut Tile) -> Result<()> {
        self.store_many(std::slice::from_mut(tile)).await
    }

    /// Store every tile not yet marked stored.
    pub async fn store_many(&self, tiles: &mut [Tile]) -> Result<()> {
        let routing = self.route(
            tiles
                .iter()
                .filter(|t| t.needs_store())
                .filter_map(|t| t.coord),
        );
        match routing {
            Routing::Nothing => Ok(()),
            Routing::Single(location) => self.bundle_at(location).store_many(tiles).await,
            Routing::Spread => {
                let mut attempted = 0;
                let mut failed = 0;
                for tile in tiles.iter_mut().filter(|t| t.needs_store()) {
                    let Some(coord) = tile.coord else {
                        continue;
                    };
                    attempted += 1;
                    if let Err(e) = self.bundle(coord).store(tile).await {
                        warn!("Failed to store tile {}: {}", tile.describe(), e);
                        failed += 1;
                    }
                }
                batch_result(failed, attempted)
            }
        }
    }

    /// Attach the tile's payload. Returns `false` if it is not stored.
    pub async fn load(&self, tile: &mut Tile) -> Result<bool> {
        self.load_many(std::slice::from_mut(tile)).await
    }

    /// Attach payloads to every unresolved tile.
    ///
    /// Returns `true` if no requested tile is missing.
    pub async fn load_many(&self, tiles: &mut [Tile]) -> Result<bool> {
        let routing = self.route(
            tiles
                .iter()
                .filter(|t| !t.is_resolved())
                .filter_map(|t| t.coord),
        );
        match routing {
            Routing::Nothing => Ok(true),
            Routing::Single(location) => self.bundle_at(location).load_many(tiles).await,
            Routing::Spread => {
                let mut missing = false;
                let mut attempted = 0;
                let mut failed = 0;
                for tile in tiles.iter_mut().filter(|t| !t.is_resolved()) {
                    let Some(coord) = tile.coord else {
                        continue;
                    };
                    attempted += 1;
                    match self.bundle(coord).load(tile).await {
                        Ok(found) => missing |= !found,
                        Err(e) => {
                            warn!("Failed to load tile {}: {}", tile.describe(), e);
                            failed += 1;
                        }
                    }
                }
                batch_result(failed, attempted)?;
                Ok(!missing)
            }
        }
    }

    /// Load the tile and report its freshness.
    ///
    /// Bundles keep no per-tile timestamps, so a found tile is marked
    /// [`Freshness::Unknown`].
    pub async fn load_metadata(&self, tile: &mut Tile) -> Result<bool> {
        let found = self.load(tile).await?;
        if found {
            tile.timestamp = Some(Freshness::Unknown);
        }
        Ok(found)
    }

    /// Remove one tile. Placeholders are ignored.
    pub async fn remove(&self, tile: &Tile) -> Result<()> {
        match tile.coord {
            Some(coord) => self.bundle(coord).remove(tile).await,
            None => Ok(()),
        }
    }

    /// Delete every bundle of `level`.
    ///
    /// Only `timestamp == 0` (remove everything) is supported; bundles carry
    /// no per-tile timestamps to compare against.
    pub async fn remove_level_before(&self, level: u32, timestamp: u64) -> Result<()> {
        if timestamp != 0 {
            return Err(BundleError::UnsupportedOperation(format!(
                "removing tiles of level {level} older than {timestamp} needs tile timestamps"
            )));
        }

        let prefix = level_dir(&self.config.cache_root, level);
        match self.store.delete_prefix(&prefix).await {
            Ok(()) => info!("Removed level {} at {}", level, prefix),
            Err(e) if e.is_not_found() => debug!("Level {} at {} already absent", level, prefix),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Always `false`: bundles keep no tile timestamps.
    pub const fn supports_timestamp(&self) -> bool {
        false
    }
}

fn batch_result(failed: usize, attempted: usize) -> Result<()> {
    if failed == 0 {
        Ok(())
    } else {
        Err(BundleError::BatchPartialFailure { failed, attempted })
    }
}
