//! Bundle engine: one Compact Cache v2 bundle in an object store.
//!
//! # Write protocol
//!
//! Writers take the bundle lock, make sure the bundle exists, and open one
//! write session for the whole batch. For each tile the record is appended
//! first and the index entry rewritten afterwards, so an entry only ever
//! points at bytes that were completely written. The header's record-size
//! and file-size fields are updated last, then the session is committed and
//! the lock released.
//!
//! Space is never reclaimed. Overwriting or removing a tile leaves its old
//! record in the data region; [`Bundle::size`] reports the difference
//! between live and physical bytes.
//!
//! # Reads
//!
//! Reads take no lock. They fetch single index entries and payloads with
//! byte-range reads and treat a missing bundle as "tile absent".

use crate::lock::LockService;
use crate::object_store::{ObjectStore, WriteSession};
use crate::tile::Tile;
use crate::{BundleError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tilebundle_formats::header::{FILE_SIZE_OFFSET, MAX_RECORD_SIZE_OFFSET};
use tilebundle_formats::index::{checked_entry_offset, entry_offset};
use tilebundle_formats::record::{RECORD_PREFIX_SIZE, parse_record_prefix, record_prefix};
use tilebundle_formats::{
    BundleFormat, BundleHeader, BundleIndex, BundleLocation, DATA_REGION_OFFSET, HEADER_SIZE,
    INDEX_ENTRY_SIZE, IndexEntry, TileCoord, empty_bundle,
};
use tracing::{debug, info, warn};

/// Whether the backing object is known to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    /// Existence not established; nothing has been written through this handle.
    Uninitialized,
    /// The object exists with a header and a full index.
    Ready,
}

/// Findings of [`Bundle::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Cells holding a tile
    pub live_tiles: usize,
    /// Header plus index plus live records
    pub logical_size: u64,
    /// Size of the backing object
    pub physical_size: u64,
    /// Largest live payload
    pub largest_tile: u32,
    /// Human-readable descriptions of every inconsistency found
    pub problems: Vec<String>,
}

impl VerifyReport {
    /// Bytes held by superseded or removed records.
    pub const fn leaked_bytes(&self) -> u64 {
        self.physical_size.saturating_sub(self.logical_size)
    }

    /// Whether no problems were found.
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Handle on one bundle object.
///
/// Handles are cheap; the cache creates one per request. All persistent
/// state lives in the object store.
pub struct Bundle {
    location: BundleLocation,
    path: String,
    lock_key: String,
    store: Arc<dyn ObjectStore>,
    locks: Arc<dyn LockService>,
    state: Mutex<BundleState>,
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("path", &self.path)
            .field("lock_key", &self.lock_key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Bundle {
    /// Create a handle for the bundle at `location`.
    pub fn new(
        location: BundleLocation,
        store: Arc<dyn ObjectStore>,
        locks: Arc<dyn LockService>,
    ) -> Self {
        Self {
            path: location.bundle_path(),
            lock_key: location.lock_key(),
            location,
            store,
            locks,
            state: Mutex::new(BundleState::Uninitialized),
        }
    }

    /// Prefix the lock key with a cache-specific namespace.
    #[must_use]
    pub fn with_lock_namespace(mut self, namespace: &str) -> Self {
        self.lock_key = format!("{namespace}/{}", self.location.lock_key());
        self
    }

    /// Location this handle points at.
    pub const fn location(&self) -> &BundleLocation {
        &self.location
    }

    /// Object key of the bundle.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Key of the bundle's exclusive lock.
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// Last observed lifecycle state.
    pub fn state(&self) -> BundleState {
        *self.state.lock()
    }

    /// Create the bundle object unless it exists.
    ///
    /// The existence check is made against the store on every call; a handle
    /// never trusts an earlier observation because another instance may have
    /// wiped the level since.
    async fn ensure_initialized(&self) -> Result<()> {
        if !self.store.exists(&self.path).await? {
            let created = self
                .store
                .put_if_absent(&self.path, Bytes::from(empty_bundle()))
                .await?;
            if created {
                info!("Created bundle {}", self.path);
            } else {
                debug!("Bundle {} created concurrently", self.path);
            }
        }
        *self.state.lock() = BundleState::Ready;
        Ok(())
    }

    fn check_routing(&self, coord: TileCoord) -> Result<()> {
        if self.location.contains(coord) {
            Ok(())
        } else {
            Err(BundleError::Misrouted {
                tile: coord.to_string(),
                bundle: self.path.clone(),
            })
        }
    }

    /// Index entry of a grid cell.
    ///
    /// Cells of a bundle that does not exist are absent. Positions outside
    /// the 128 x 128 block are rejected.
    pub async fn tile_offset_size(&self, rel_x: u32, rel_y: u32) -> Result<IndexEntry> {
        let start = checked_entry_offset(rel_x, rel_y)?;
        match self
            .store
            .read_range(&self.path, start..start + INDEX_ENTRY_SIZE as u64)
            .await
        {
            Ok(raw) => Ok(IndexEntry::from_bytes(&raw)?),
            Err(e) if e.is_not_found() => Ok(IndexEntry::ABSENT),
            Err(e) => Err(e),
        }
    }

    /// Whether the tile is stored in this bundle.
    pub async fn is_cached(&self, tile: &Tile) -> Result<bool> {
        let Some(coord) = tile.coord else {
            return Ok(true);
        };
        self.check_routing(coord)?;
        let (rel_x, rel_y) = coord.relative();
        Ok(self.tile_offset_size(rel_x, rel_y).await?.is_present())
    }

    /// Payload of the tile at `coord`, `None` if absent.
    async fn read_payload(&self, coord: TileCoord) -> Result<Option<Bytes>> {
        let (rel_x, rel_y) = coord.relative();
        let entry = self.tile_offset_size(rel_x, rel_y).await?;
        if !entry.is_present() {
            return Ok(None);
        }

        debug!(
            "Reading {} bytes at {} for {} from {}",
            entry.size, entry.offset, coord, self.path
        );
        match self
            .store
            .read_range(&self.path, entry.offset..entry.offset + u64::from(entry.size))
            .await
        {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attach the tile's payload. Returns `false` if it is not stored.
    pub async fn load(&self, tile: &mut Tile) -> Result<bool> {
        self.load_many(std::slice::from_mut(tile)).await
    }

    /// Attach payloads to every unresolved tile.
    ///
    /// Returns `true` if no requested tile is missing. Tiles without a
    /// coordinate or with a payload already attached count as found.
    pub async fn load_many(&self, tiles: &mut [Tile]) -> Result<bool> {
        let mut missing = false;
        for tile in tiles.iter_mut() {
            if tile.is_resolved() {
                continue;
            }
            let Some(coord) = tile.coord else {
                continue;
            };
            self.check_routing(coord)?;
            match self.read_payload(coord).await? {
                Some(data) => tile.data = Some(data),
                None => missing = true,
            }
        }
        Ok(!missing)
    }

    /// Store one tile.
    pub async fn store(&self, tile: &mut Tile) -> Result<()> {
        self.store_many(std::slice::from_mut(tile)).await
    }

    /// Store every tile not yet marked stored, in one locked write session.
    ///
    /// Payloads are validated before anything is written: a tile without
    /// payload, an empty payload or one that does not fit the 24-bit size
    /// field fails the whole batch before the lock is taken.
    ///
    /// If the store fails part way through the batch, the tiles written
    /// before the failure are kept: the header is brought up to date, the
    /// session is committed and those tiles are marked stored before the
    /// error is returned. A store that writes in place has already exposed
    /// their index entries at that point, so every backend ends up in the
    /// same state. If finalizing fails too, the written entries may still
    /// be visible while the tiles stay unmarked.
    pub async fn store_many(&self, tiles: &mut [Tile]) -> Result<()> {
        let mut pending: Vec<(usize, TileCoord, Bytes)> = Vec::new();
        for (i, tile) in tiles.iter().enumerate() {
            if !tile.needs_store() {
                continue;
            }
            let Some(coord) = tile.coord else {
                continue;
            };
            self.check_routing(coord)?;
            let data = tile
                .data
                .clone()
                .ok_or_else(|| BundleError::MissingPayload(coord.to_string()))?;
            record_prefix(data.len())?;
            pending.push((i, coord, data));
        }
        if pending.is_empty() {
            return Ok(());
        }

        let guard = self.locks.acquire_exclusive(&self.lock_key).await?;
        self.ensure_initialized().await?;

        let mut session = self.store.open_write_session(&self.path).await?;
        let mut largest = 0u32;
        let mut written = 0;
        let mut failure = None;
        for (_, coord, data) in &pending {
            match Self::append_tile(&mut session, *coord, data).await {
                Ok(size) => {
                    largest = largest.max(size);
                    written += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            warn!(
                "Store into {} failed after {} of {} tiles: {}",
                self.path,
                written,
                pending.len(),
                err
            );
            match Self::finish_session(session, largest).await {
                Ok(_) => {
                    for (i, _, _) in pending.iter().take(written) {
                        tiles[*i].stored = true;
                    }
                }
                Err(e) => warn!("Failed to finalize {}: {}", self.path, e),
            }
            drop(guard);
            return Err(err);
        }

        let file_size = Self::finish_session(session, largest).await?;
        drop(guard);

        debug!(
            "Stored {} tiles in {} (file size {})",
            pending.len(),
            self.path,
            file_size
        );
        for (i, _, _) in pending {
            tiles[i].stored = true;
        }
        Ok(())
    }

    /// Append one record and point the tile's index entry at it.
    async fn append_tile(
        session: &mut Box<dyn WriteSession>,
        coord: TileCoord,
        data: &[u8],
    ) -> Result<u32> {
        let prefix = record_prefix(data.len())?;
        let size = u32::from_le_bytes(prefix);

        // Validate before touching the object so an overflow writes nothing.
        let entry = IndexEntry::new(session.len() + RECORD_PREFIX_SIZE as u64, size)?;

        session.append(&prefix).await?;
        let offset = session.append(data).await?;
        debug_assert_eq!(offset, entry.offset);

        let (rel_x, rel_y) = coord.relative();
        session
            .write_at(entry_offset(rel_x, rel_y), &entry.to_bytes())
            .await?;
        Ok(size)
    }

    /// Update the header and commit. Returns the final object size.
    async fn finish_session(mut session: Box<dyn WriteSession>, largest: u32) -> Result<u64> {
        Self::update_metadata(&mut session, largest).await?;
        let file_size = session.len();
        session.commit().await?;
        Ok(file_size)
    }

    /// Raise the max-record-size field if needed and record the file size.
    async fn update_metadata(session: &mut Box<dyn WriteSession>, largest: u32) -> Result<()> {
        let raw = session.read_at(MAX_RECORD_SIZE_OFFSET, 4).await?;
        let current = raw
            .get(..4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_le_bytes)
            .ok_or_else(|| BundleError::Corruption("short header read".into()))?;
        if largest > current {
            session
                .write_at(MAX_RECORD_SIZE_OFFSET, &largest.to_le_bytes())
                .await?;
        }

        let file_size = session.len();
        session
            .write_at(FILE_SIZE_OFFSET, &file_size.to_le_bytes())
            .await
    }

    /// Clear the tile's index entry.
    ///
    /// The record stays in the data region.
    pub async fn remove(&self, tile: &Tile) -> Result<()> {
        let Some(coord) = tile.coord else {
            return Ok(());
        };
        self.check_routing(coord)?;

        let guard = self.locks.acquire_exclusive(&self.lock_key).await?;
        self.ensure_initialized().await?;

        let mut session = self.store.open_write_session(&self.path).await?;
        let (rel_x, rel_y) = coord.relative();
        session
            .write_at(entry_offset(rel_x, rel_y), &IndexEntry::ABSENT.to_bytes())
            .await?;
        session.commit().await?;
        drop(guard);

        debug!("Removed {} from {}", coord, self.path);
        Ok(())
    }

    /// Parsed header, `None` if the bundle does not exist.
    pub async fn header(&self) -> Result<Option<BundleHeader>> {
        match self.store.read_range(&self.path, 0..HEADER_SIZE as u64).await {
            Ok(raw) => Ok(Some(BundleHeader::parse(&raw)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Complete index, fetched with one range read. `None` if missing.
    pub async fn index(&self) -> Result<Option<BundleIndex>> {
        match self
            .store
            .read_range(&self.path, HEADER_SIZE as u64..DATA_REGION_OFFSET)
            .await
        {
            Ok(raw) => Ok(Some(BundleIndex::parse(&raw)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `(logical, physical)` size in bytes; `(0, 0)` if the bundle is missing.
    ///
    /// Logical size counts header, index and live records; physical size is
    /// the backing object's size. The difference is leaked space.
    pub async fn size(&self) -> Result<(u64, u64)> {
        let Some(index) = self.index().await? else {
            return Ok((0, 0));
        };
        let physical = self.store.object_size(&self.path).await?.unwrap_or(0);
        Ok((index.logical_size(), physical))
    }

    /// Check header constants and that every live entry points at a
    /// complete record with a matching length prefix.
    ///
    /// Returns `None` if the bundle does not exist.
    pub async fn verify(&self) -> Result<Option<VerifyReport>> {
        let Some(header) = self.header().await? else {
            return Ok(None);
        };
        let Some(index) = self.index().await? else {
            return Ok(None);
        };
        let physical_size = self.store.object_size(&self.path).await?.unwrap_or(0);

        let mut report = VerifyReport {
            live_tiles: index.live_count(),
            logical_size: index.logical_size(),
            physical_size,
            ..VerifyReport::default()
        };

        if let Err(e) = header.validate() {
            report.problems.push(format!("header: {e}"));
        }
        if header.file_size != physical_size {
            report.problems.push(format!(
                "header file size {} differs from object size {physical_size}",
                header.file_size
            ));
        }

        let min_offset = DATA_REGION_OFFSET + RECORD_PREFIX_SIZE as u64;
        for (rel_x, rel_y, entry) in index.live_entries() {
            report.largest_tile = report.largest_tile.max(entry.size);
            let end = entry.offset + u64::from(entry.size);
            if entry.offset < min_offset || end > physical_size {
                report.problems.push(format!(
                    "cell ({rel_x}, {rel_y}): record {}..{end} outside data region",
                    entry.offset
                ));
                continue;
            }
            let prefix_at = entry.offset - RECORD_PREFIX_SIZE as u64;
            let raw = self
                .store
                .read_range(&self.path, prefix_at..entry.offset)
                .await?;
            let prefix = parse_record_prefix(&raw)?;
            if prefix != entry.size {
                report.problems.push(format!(
                    "cell ({rel_x}, {rel_y}): length prefix {prefix} != index size {}",
                    entry.size
                ));
            }
        }

        if report.largest_tile > header.max_record_size {
            report.problems.push(format!(
                "largest tile {} exceeds header max record size {}",
                report.largest_tile, header.max_record_size
            ));
        }

        for problem in &report.problems {
            warn!("{}: {}", self.path, problem);
        }
        Ok(Some(report))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lock::LocalLockService;
    use crate::object_store::MemoryObjectStore;
    use async_trait::async_trait;
    use std::ops::Range;
    use tilebundle_formats::FormatError;
    use tilebundle_formats::index::EMPTY_CELL_VALUE;

    /// Memory store whose sessions fail to append one particular payload.
    #[derive(Debug, Clone)]
    struct FailingStore {
        inner: MemoryObjectStore,
        poison: &'static [u8],
    }

    struct FailingSession {
        inner: Box<dyn WriteSession>,
        poison: &'static [u8],
    }

    #[async_trait]
    impl ObjectStore for FailingStore {
        async fn exists(&self, id: &str) -> Result<bool> {
            self.inner.exists(id).await
        }

        async fn object_size(&self, id: &str) -> Result<Option<u64>> {
            self.inner.object_size(id).await
        }

        async fn read_range(&self, id: &str, range: Range<u64>) -> Result<Bytes> {
            self.inner.read_range(id, range).await
        }

        async fn put_if_absent(&self, id: &str, bytes: Bytes) -> Result<bool> {
            self.inner.put_if_absent(id, bytes).await
        }

        async fn open_write_session(&self, id: &str) -> Result<Box<dyn WriteSession>> {
            Ok(Box::new(FailingSession {
                inner: self.inner.open_write_session(id).await?,
                poison: self.poison,
            }))
        }

        async fn delete_prefix(&self, prefix: &str) -> Result<()> {
            self.inner.delete_prefix(prefix).await
        }
    }

    #[async_trait]
    impl WriteSession for FailingSession {
        fn len(&self) -> u64 {
            self.inner.len()
        }

        async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes> {
            self.inner.read_at(offset, len).await
        }

        async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
            self.inner.write_at(offset, data).await
        }

        async fn append(&mut self, data: &[u8]) -> Result<u64> {
            if data == self.poison {
                return Err(BundleError::Io(std::io::Error::other("append rejected")));
            }
            self.inner.append(data).await
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.inner.commit().await
        }
    }

    fn bundle_for(store: &MemoryObjectStore, coord: TileCoord) -> Bundle {
        Bundle::new(
            BundleLocation::locate("cache", coord),
            Arc::new(store.clone()),
            Arc::new(LocalLockService::new()),
        )
    }

    #[tokio::test]
    async fn test_reads_do_not_create_bundle() {
        let store = MemoryObjectStore::new();
        let coord = TileCoord::new(1, 1, 3);
        let bundle = bundle_for(&store, coord);

        assert!(!bundle.is_cached(&Tile::new(coord)).await.expect("is_cached"));
        assert!(!bundle.load(&mut Tile::new(coord)).await.expect("load"));
        assert_eq!(bundle.size().await.expect("size"), (0, 0));
        assert!(bundle.header().await.expect("header").is_none());
        assert!(bundle.verify().await.expect("verify").is_none());

        assert!(store.keys().is_empty());
        assert_eq!(bundle.state(), BundleState::Uninitialized);
    }

    #[tokio::test]
    async fn test_store_layout() {
        let store = MemoryObjectStore::new();
        let coord = TileCoord::new(130, 5, 2);
        let bundle = bundle_for(&store, coord);

        let mut tile = Tile::with_data(coord, b"hello".to_vec());
        bundle.store(&mut tile).await.expect("store");
        assert!(tile.stored);
        assert_eq!(bundle.state(), BundleState::Ready);

        let raw = store
            .get("cache/L02/R0000C0080.bundle")
            .expect("bundle object");
        let data_start = DATA_REGION_OFFSET as usize;
        assert_eq!(raw.len(), data_start + 4 + 5);
        assert_eq!(&raw[data_start..data_start + 4], &5u32.to_le_bytes());
        assert_eq!(&raw[data_start + 4..], b"hello");

        let at = entry_offset(2, 5) as usize;
        let packed = u64::from_le_bytes(raw[at..at + 8].try_into().expect("8 bytes"));
        assert_eq!(packed, (DATA_REGION_OFFSET + 4) + (5u64 << 40));

        let untouched = entry_offset(0, 0) as usize;
        assert_eq!(&raw[untouched..untouched + 8], &EMPTY_CELL_VALUE.to_le_bytes());

        let header = bundle.header().await.expect("header").expect("exists");
        assert_eq!(header.max_record_size, 5);
        assert_eq!(header.file_size, raw.len() as u64);
    }

    #[tokio::test]
    async fn test_max_record_size_is_monotonic() {
        let store = MemoryObjectStore::new();
        let coord = TileCoord::new(0, 0, 0);
        let bundle = bundle_for(&store, coord);

        bundle
            .store(&mut Tile::with_data(coord, vec![1u8; 100]))
            .await
            .expect("store");
        bundle
            .store(&mut Tile::with_data(coord, vec![2u8; 10]))
            .await
            .expect("store");

        let header = bundle.header().await.expect("header").expect("exists");
        assert_eq!(header.max_record_size, 100);
        assert_eq!(header.file_size, DATA_REGION_OFFSET + 104 + 14);
    }

    #[tokio::test]
    async fn test_remove_writes_zero_sentinel() {
        let store = MemoryObjectStore::new();
        let coord = TileCoord::new(7, 9, 4);
        let bundle = bundle_for(&store, coord);

        bundle
            .store(&mut Tile::with_data(coord, b"x".to_vec()))
            .await
            .expect("store");
        bundle.remove(&Tile::new(coord)).await.expect("remove");

        let raw = store.get(bundle.path()).expect("bundle object");
        let at = entry_offset(7, 9) as usize;
        assert_eq!(&raw[at..at + 8], &[0u8; 8]);
        assert!(!bundle.is_cached(&Tile::new(coord)).await.expect("is_cached"));
    }

    #[tokio::test]
    async fn test_remove_creates_missing_bundle() {
        let store = MemoryObjectStore::new();
        let coord = TileCoord::new(7, 9, 4);
        let bundle = bundle_for(&store, coord);

        bundle.remove(&Tile::new(coord)).await.expect("remove");
        assert_eq!(
            bundle.size().await.expect("size"),
            (DATA_REGION_OFFSET, DATA_REGION_OFFSET)
        );
    }

    #[tokio::test]
    async fn test_invalid_payloads_write_nothing() {
        let store = MemoryObjectStore::new();
        let coord = TileCoord::new(0, 0, 1);
        let bundle = bundle_for(&store, coord);

        let mut empty = Tile::with_data(coord, Vec::new());
        assert!(matches!(
            bundle.store(&mut empty).await,
            Err(BundleError::Format(_))
        ));

        let mut no_payload = Tile::new(coord);
        assert!(matches!(
            bundle.store(&mut no_payload).await,
            Err(BundleError::MissingPayload(_))
        ));

        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_grid_cell_rejected() {
        let store = MemoryObjectStore::new();
        let coord = TileCoord::new(0, 1, 2);
        let bundle = bundle_for(&store, coord);
        bundle
            .store(&mut Tile::with_data(coord, b"abcd".to_vec()))
            .await
            .expect("store");

        assert!(bundle.tile_offset_size(0, 1).await.expect("cell").is_present());
        for (rel_x, rel_y) in [(128, 0), (0, 200)] {
            assert!(matches!(
                bundle.tile_offset_size(rel_x, rel_y).await,
                Err(BundleError::Format(FormatError::CellOutOfGrid { .. }))
            ));
        }
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_written_tiles() {
        let memory = MemoryObjectStore::new();
        let store = FailingStore {
            inner: memory.clone(),
            poison: b"boom",
        };
        let bundle = Bundle::new(
            BundleLocation::locate("cache", TileCoord::new(0, 0, 1)),
            Arc::new(store),
            Arc::new(LocalLockService::new()),
        );

        let mut tiles = vec![
            Tile::with_data(TileCoord::new(0, 0, 1), b"first".to_vec()),
            Tile::with_data(TileCoord::new(1, 0, 1), b"boom".to_vec()),
            Tile::with_data(TileCoord::new(2, 0, 1), b"third".to_vec()),
        ];
        assert!(matches!(
            bundle.store_many(&mut tiles).await,
            Err(BundleError::Io(_))
        ));
        assert_eq!(
            tiles.iter().map(|t| t.stored).collect::<Vec<_>>(),
            vec![true, false, false]
        );

        let mut first = Tile::new(TileCoord::new(0, 0, 1));
        assert!(bundle.load(&mut first).await.expect("load"));
        assert_eq!(first.data.as_deref(), Some(&b"first"[..]));
        assert!(!bundle.is_cached(&tiles[1]).await.expect("is_cached"));
        assert!(!bundle.is_cached(&tiles[2]).await.expect("is_cached"));

        let header = bundle.header().await.expect("header").expect("exists");
        assert_eq!(header.max_record_size, 5);
        let report = bundle.verify().await.expect("verify").expect("exists");
        assert!(report.is_consistent(), "{:?}", report.problems);
        // Length prefix of the rejected payload
        assert_eq!(report.leaked_bytes(), 4);
    }

    #[tokio::test]
    async fn test_misrouted_tile_rejected() {
        let store = MemoryObjectStore::new();
        let bundle = bundle_for(&store, TileCoord::new(0, 0, 1));

        let mut foreign = Tile::with_data(TileCoord::new(200, 0, 1), b"x".to_vec());
        assert!(matches!(
            bundle.store(&mut foreign).await,
            Err(BundleError::Misrouted { .. })
        ));
        assert!(matches!(
            bundle.load(&mut Tile::new(TileCoord::new(0, 0, 2))).await,
            Err(BundleError::Misrouted { .. })
        ));
        assert!(matches!(
            bundle.is_cached(&Tile::new(TileCoord::new(128, 0, 1))).await,
            Err(BundleError::Misrouted { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_reports_consistent_bundle() {
        let store = MemoryObjectStore::new();
        let coord = TileCoord::new(3, 4, 5);
        let bundle = bundle_for(&store, coord);

        let mut tiles = vec![
            Tile::with_data(coord, vec![9u8; 30]),
            Tile::with_data(TileCoord::new(4, 4, 5), vec![8u8; 12]),
        ];
        bundle.store_many(&mut tiles).await.expect("store");
        bundle
            .store(&mut Tile::with_data(coord, vec![7u8; 5]))
            .await
            .expect("overwrite");

        let report = bundle.verify().await.expect("verify").expect("exists");
        assert!(report.is_consistent(), "{:?}", report.problems);
        assert_eq!(report.live_tiles, 2);
        assert_eq!(report.largest_tile, 12);
        assert_eq!(report.leaked_bytes(), 34);
    }

    #[tokio::test]
    async fn test_verify_detects_bad_prefix() {
        let store = MemoryObjectStore::new();
        let coord = TileCoord::new(0, 0, 0);
        let bundle = bundle_for(&store, coord);
        bundle
            .store(&mut Tile::with_data(coord, b"abc".to_vec()))
            .await
            .expect("store");

        let mut session = store
            .open_write_session(bundle.path())
            .await
            .expect("session");
        session
            .write_at(DATA_REGION_OFFSET, &99u32.to_le_bytes())
            .await
            .expect("corrupt");
        session.commit().await.expect("commit");

        let report = bundle.verify().await.expect("verify").expect("exists");
        assert!(!report.is_consistent());
        assert!(report.problems[0].contains("length prefix 99"));
    }
}
