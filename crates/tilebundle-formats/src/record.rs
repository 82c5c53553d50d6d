//! Data region records.
//!
//! Each record is a little-endian `u32` payload length followed by the
//! payload. Index entries point at the payload, so the prefix of a live
//! record always sits at `entry.offset - 4`.

use crate::{FormatError, Result, index::MAX_PAYLOAD_SIZE};

/// Size of the length prefix in bytes.
pub const RECORD_PREFIX_SIZE: usize = 4;

/// Length prefix for a payload of `len` bytes.
///
/// Rejects empty payloads and payloads larger than the index can address.
pub fn record_prefix(len: usize) -> Result<[u8; RECORD_PREFIX_SIZE]> {
    if len == 0 {
        return Err(FormatError::EmptyPayload);
    }
    let len = u32::try_from(len)
        .ok()
        .filter(|l| *l <= MAX_PAYLOAD_SIZE)
        .ok_or(FormatError::EncodingOverflow {
            field: "size",
            value: len as u64,
            max: u64::from(MAX_PAYLOAD_SIZE),
        })?;
    Ok(len.to_le_bytes())
}

/// Decode a length prefix.
pub fn parse_record_prefix(data: &[u8]) -> Result<u32> {
    let raw: [u8; RECORD_PREFIX_SIZE] = data
        .get(..RECORD_PREFIX_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or(FormatError::Truncated {
            what: "record prefix",
            expected: RECORD_PREFIX_SIZE,
            actual: data.len(),
        })?;
    Ok(u32::from_le_bytes(raw))
}

/// Encode a complete record (prefix plus payload).
pub fn encode_record(payload: &[u8]) -> Result<Vec<u8>> {
    let prefix = record_prefix(payload.len())?;
    let mut buf = Vec::with_capacity(RECORD_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&prefix);
    buf.extend_from_slice(payload);
    Ok(buf)
}
