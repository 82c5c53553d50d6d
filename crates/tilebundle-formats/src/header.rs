//! 64-byte bundle header.
//!
//! Layout (little-endian, `<4I3Q6I>`):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 4    | Version (3) |
//! | 0x04   | 4    | Record count (16384) |
//! | 0x08   | 4    | Largest record ever stored |
//! | 0x0C   | 4    | Offset field width in bytes (5) |
//! | 0x10   | 8    | Slack space (0) |
//! | 0x18   | 8    | File size (end of the data region) |
//! | 0x20   | 8    | User header offset (40) |
//! | 0x28   | 4    | User header size (20 + index size) |
//! | 0x2C   | 16   | Legacy fields (3, 16, 16384, 5) |
//! | 0x3C   | 4    | Index size (131072) |
//!
//! Only the record-size and file-size fields change after creation. The
//! legacy fields are kept byte-for-byte so ArcGIS and other Compact Cache
//! readers accept the files.

use crate::{
    BUNDLE_VERSION, BundleFormat, DATA_REGION_OFFSET, FormatError, HEADER_SIZE, INDEX_SIZE,
    Result, TILES_PER_BUNDLE,
};
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// Byte offset of the max-record-size field.
pub const MAX_RECORD_SIZE_OFFSET: u64 = 8;

/// Byte offset of the file-size field.
pub const FILE_SIZE_OFFSET: u64 = 24;

/// Width of the packed offset field, in bytes.
pub const OFFSET_FIELD_WIDTH: u32 = 5;

/// Fixed user-header offset.
pub const USER_HEADER_OFFSET: u64 = 40;

/// Bundle file header.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct BundleHeader {
    /// Format version (3)
    pub version: u32,
    /// Fixed tile capacity
    pub record_count: u32,
    /// Largest payload size ever stored (monotonic)
    pub max_record_size: u32,
    /// Width of the packed offset field in bytes
    pub offset_size: u32,
    /// Unused slack space
    pub slack_space: u64,
    /// Size of the file up to the end of the data region
    pub file_size: u64,
    /// User header offset
    pub user_header_offset: u64,
    /// User header size
    pub user_header_size: u32,
    /// Compatibility constant (3)
    pub legacy_1: u32,
    /// Compatibility constant (16)
    pub legacy_2: u32,
    /// Compatibility constant (record count)
    pub legacy_3: u32,
    /// Compatibility constant (offset width)
    pub legacy_4: u32,
    /// Size of the index in bytes
    pub index_size: u32,
}

impl BundleHeader {
    /// Header of a bundle that holds no tiles yet.
    pub const fn new() -> Self {
        Self {
            version: BUNDLE_VERSION,
            record_count: TILES_PER_BUNDLE as u32,
            max_record_size: 0,
            offset_size: OFFSET_FIELD_WIDTH,
            slack_space: 0,
            file_size: DATA_REGION_OFFSET,
            user_header_offset: USER_HEADER_OFFSET,
            user_header_size: 20 + INDEX_SIZE as u32,
            legacy_1: 3,
            legacy_2: 16,
            legacy_3: TILES_PER_BUNDLE as u32,
            legacy_4: OFFSET_FIELD_WIDTH,
            index_size: INDEX_SIZE as u32,
        }
    }

    /// Serialize to the fixed 64-byte representation.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0x00..0x04].copy_from_slice(&self.version.to_le_bytes());
        buf[0x04..0x08].copy_from_slice(&self.record_count.to_le_bytes());
        buf[0x08..0x0C].copy_from_slice(&self.max_record_size.to_le_bytes());
        buf[0x0C..0x10].copy_from_slice(&self.offset_size.to_le_bytes());
        buf[0x10..0x18].copy_from_slice(&self.slack_space.to_le_bytes());
        buf[0x18..0x20].copy_from_slice(&self.file_size.to_le_bytes());
        buf[0x20..0x28].copy_from_slice(&self.user_header_offset.to_le_bytes());
        buf[0x28..0x2C].copy_from_slice(&self.user_header_size.to_le_bytes());
        buf[0x2C..0x30].copy_from_slice(&self.legacy_1.to_le_bytes());
        buf[0x30..0x34].copy_from_slice(&self.legacy_2.to_le_bytes());
        buf[0x34..0x38].copy_from_slice(&self.legacy_3.to_le_bytes());
        buf[0x38..0x3C].copy_from_slice(&self.legacy_4.to_le_bytes());
        buf[0x3C..0x40].copy_from_slice(&self.index_size.to_le_bytes());
        buf
    }

    /// Check that the header describes a v2 bundle with the fixed grid.
    pub fn validate(&self) -> Result<()> {
        if self.version != BUNDLE_VERSION {
            return Err(FormatError::UnsupportedVersion(self.version));
        }
        if self.record_count as usize != TILES_PER_BUNDLE {
            return Err(FormatError::InvalidHeader {
                reason: format!(
                    "record count {} does not match grid capacity {TILES_PER_BUNDLE}",
                    self.record_count
                ),
            });
        }
        if self.file_size < DATA_REGION_OFFSET {
            return Err(FormatError::InvalidHeader {
                reason: format!(
                    "file size {} is smaller than header plus index",
                    self.file_size
                ),
            });
        }
        Ok(())
    }
}

impl Default for BundleHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleFormat for BundleHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                what: "bundle header",
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);
        Ok(Self::read(&mut cursor)?)
    }

    fn build(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(HEADER_SIZE));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_header_layout() {
        let bytes = BundleHeader::new().to_bytes();

        assert_eq!(&bytes[0x00..0x04], &3u32.to_le_bytes());
        assert_eq!(&bytes[0x04..0x08], &16_384u32.to_le_bytes());
        assert_eq!(&bytes[0x08..0x0C], &0u32.to_le_bytes());
        assert_eq!(&bytes[0x0C..0x10], &5u32.to_le_bytes());
        assert_eq!(&bytes[0x18..0x20], &131_136u64.to_le_bytes());
        assert_eq!(&bytes[0x20..0x28], &40u64.to_le_bytes());
        assert_eq!(&bytes[0x28..0x2C], &131_092u32.to_le_bytes());
        assert_eq!(&bytes[0x3C..0x40], &131_072u32.to_le_bytes());
    }

    #[test]
    fn test_binrw_matches_manual_layout() {
        let mut header = BundleHeader::new();
        header.max_record_size = 4711;
        header.file_size = DATA_REGION_OFFSET + 4 + 4711;

        let built = header.build().expect("build");
        assert_eq!(built.as_slice(), header.to_bytes().as_slice());

        let parsed = BundleHeader::parse(&built).expect("parse");
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_mutable_field_offsets() {
        let mut header = BundleHeader::new();
        header.max_record_size = 0xAABB_CCDD;
        header.file_size = 0x0102_0304_0506_0708;
        let bytes = header.to_bytes();

        let at = MAX_RECORD_SIZE_OFFSET as usize;
        assert_eq!(&bytes[at..at + 4], &0xAABB_CCDDu32.to_le_bytes());
        let at = FILE_SIZE_OFFSET as usize;
        assert_eq!(&bytes[at..at + 8], &0x0102_0304_0506_0708u64.to_le_bytes());
    }

    #[test]
    fn test_round_trip() {
        let bytes = BundleHeader::new().to_bytes();
        BundleHeader::verify_round_trip(&bytes).expect("round trip");
    }

    #[test]
    fn test_validate() {
        assert!(BundleHeader::new().validate().is_ok());

        let mut header = BundleHeader::new();
        header.version = 2;
        assert!(matches!(
            header.validate(),
            Err(FormatError::UnsupportedVersion(2))
        ));

        let mut header = BundleHeader::new();
        header.record_count = 100;
        assert!(matches!(
            header.validate(),
            Err(FormatError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_too_short_data_rejected() {
        let short = [0u8; 40];
        assert!(matches!(
            BundleHeader::parse(&short),
            Err(FormatError::Truncated { actual: 40, .. })
        ));
    }
}
