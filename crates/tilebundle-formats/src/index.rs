//! Fixed bundle index.
//!
//! The index holds one little-endian `u64` per grid cell. Each value packs
//! the payload size into the upper 24 bits and the payload offset into the
//! lower 40 bits:
//!
//! ```text
//!  63            40 39                                   0
//! +----------------+--------------------------------------+
//! |  size (24 bit) |            offset (40 bit)           |
//! +----------------+--------------------------------------+
//! ```
//!
//! A size of zero marks an absent cell whatever the offset bits hold. Fresh
//! bundles use offset 4 for absent cells (the ArcGIS convention), removal
//! writes offset 0. Both decode to [`IndexEntry::ABSENT`].

use crate::{
    FormatError, GRID_HEIGHT, GRID_WIDTH, HEADER_SIZE, INDEX_ENTRY_SIZE, INDEX_SIZE, Result,
    TILES_PER_BUNDLE, record::RECORD_PREFIX_SIZE,
};

/// Number of bits holding the payload offset.
pub const OFFSET_BITS: u32 = 40;

/// Largest encodable payload offset (1 TiB - 1).
pub const MAX_OFFSET: u64 = (1 << OFFSET_BITS) - 1;

/// Largest encodable payload size (16 MiB - 1).
pub const MAX_PAYLOAD_SIZE: u32 = (1 << (64 - OFFSET_BITS)) - 1;

/// Raw value written to every cell of a freshly created index.
pub const EMPTY_CELL_VALUE: u64 = 4;

/// Decoded index entry: where a tile payload lives in the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    /// Offset of the payload (not of its length prefix)
    pub offset: u64,
    /// Payload length in bytes, 0 when absent
    pub size: u32,
}

impl IndexEntry {
    /// The removal sentinel (offset 0, size 0).
    pub const ABSENT: Self = Self { offset: 0, size: 0 };

    /// Create a checked entry.
    ///
    /// Fails with [`FormatError::EncodingOverflow`] when either value would
    /// spill into the neighbouring bit field.
    pub fn new(offset: u64, size: u32) -> Result<Self> {
        if offset > MAX_OFFSET {
            return Err(FormatError::EncodingOverflow {
                field: "offset",
                value: offset,
                max: MAX_OFFSET,
            });
        }
        if size > MAX_PAYLOAD_SIZE {
            return Err(FormatError::EncodingOverflow {
                field: "size",
                value: u64::from(size),
                max: u64::from(MAX_PAYLOAD_SIZE),
            });
        }
        Ok(Self { offset, size })
    }

    /// Whether the cell holds a tile.
    pub const fn is_present(&self) -> bool {
        self.size != 0
    }

    /// Pack into the on-disk `u64` value.
    pub const fn pack(&self) -> u64 {
        self.offset + ((self.size as u64) << OFFSET_BITS)
    }

    /// Unpack an on-disk value. Any value with a zero size is absent.
    pub const fn unpack(value: u64) -> Self {
        let size = value >> OFFSET_BITS;
        if size == 0 {
            return Self::ABSENT;
        }
        Self {
            offset: value - (size << OFFSET_BITS),
            size: size as u32,
        }
    }

    /// Little-endian bytes of the packed value.
    pub const fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        self.pack().to_le_bytes()
    }

    /// Decode from the first 8 bytes of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let raw: [u8; INDEX_ENTRY_SIZE] = data
            .get(..INDEX_ENTRY_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(FormatError::Truncated {
                what: "index entry",
                expected: INDEX_ENTRY_SIZE,
                actual: data.len(),
            })?;
        Ok(Self::unpack(u64::from_le_bytes(raw)))
    }

    /// Bytes this entry accounts for in the data region, prefix included.
    pub const fn record_len(&self) -> u64 {
        if self.is_present() {
            self.size as u64 + RECORD_PREFIX_SIZE as u64
        } else {
            0
        }
    }
}

/// Cell number of a grid-relative position (row-major).
pub const fn cell_number(rel_x: u32, rel_y: u32) -> usize {
    (rel_x + GRID_HEIGHT * rel_y) as usize
}

/// Absolute byte offset of the index entry for a grid-relative position.
pub const fn entry_offset(rel_x: u32, rel_y: u32) -> u64 {
    (HEADER_SIZE + cell_number(rel_x, rel_y) * INDEX_ENTRY_SIZE) as u64
}

/// Cell number of a grid-relative position, rejecting cells outside the block.
pub fn checked_cell_number(rel_x: u32, rel_y: u32) -> Result<usize> {
    if rel_x >= GRID_WIDTH || rel_y >= GRID_HEIGHT {
        return Err(FormatError::CellOutOfGrid { rel_x, rel_y });
    }
    Ok(cell_number(rel_x, rel_y))
}

/// Index entry offset of a grid-relative position, rejecting cells outside
/// the block.
pub fn checked_entry_offset(rel_x: u32, rel_y: u32) -> Result<u64> {
    let cell = checked_cell_number(rel_x, rel_y)?;
    Ok((HEADER_SIZE + cell * INDEX_ENTRY_SIZE) as u64)
}

/// Grid-relative position of a global tile column/row.
pub const fn relative_cell(x: u32, y: u32) -> (u32, u32) {
    (x % GRID_WIDTH, y % GRID_HEIGHT)
}

/// Complete decoded index of one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleIndex {
    entries: Vec<IndexEntry>,
}

impl BundleIndex {
    /// Index of a fresh bundle: every cell absent.
    pub fn empty() -> Self {
        Self {
            entries: vec![IndexEntry::ABSENT; TILES_PER_BUNDLE],
        }
    }

    /// Decode the 131,072 index bytes that follow the header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < INDEX_SIZE {
            return Err(FormatError::Truncated {
                what: "bundle index",
                expected: INDEX_SIZE,
                actual: data.len(),
            });
        }
        let entries = data[..INDEX_SIZE]
            .chunks_exact(INDEX_ENTRY_SIZE)
            .map(IndexEntry::from_bytes)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Serialize for a new bundle.
    ///
    /// Absent cells are written with [`EMPTY_CELL_VALUE`] so the result
    /// matches what ArcGIS produces for an empty bundle.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INDEX_SIZE);
        for entry in &self.entries {
            let value = if entry.is_present() {
                entry.pack()
            } else {
                EMPTY_CELL_VALUE
            };
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf
    }

    /// Entry for a grid-relative position.
    pub fn get(&self, rel_x: u32, rel_y: u32) -> Result<IndexEntry> {
        let cell = checked_cell_number(rel_x, rel_y)?;
        Ok(self.entries.get(cell).copied().unwrap_or(IndexEntry::ABSENT))
    }

    /// Replace the entry for a grid-relative position.
    pub fn set(&mut self, rel_x: u32, rel_y: u32, entry: IndexEntry) -> Result<()> {
        let cell = checked_cell_number(rel_x, rel_y)?;
        if let Some(slot) = self.entries.get_mut(cell) {
            *slot = entry;
        }
        Ok(())
    }

    /// Present cells as `(rel_x, rel_y, entry)`, in index order.
    pub fn live_entries(&self) -> impl Iterator<Item = (u32, u32, IndexEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_present())
            .map(|(cell, e)| {
                let cell = cell as u32;
                (cell % GRID_HEIGHT, cell / GRID_HEIGHT, *e)
            })
    }

    /// Number of present cells.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_present()).count()
    }

    /// Bytes referenced by live entries, length prefixes included.
    pub fn live_data_size(&self) -> u64 {
        self.entries.iter().map(IndexEntry::record_len).sum()
    }

    /// Size the bundle would have if it held only live records.
    pub fn logical_size(&self) -> u64 {
        crate::DATA_REGION_OFFSET + self.live_data_size()
    }
}

impl Default for BundleIndex {
    fn default() -> Self {
        Self::empty()
    }
}
