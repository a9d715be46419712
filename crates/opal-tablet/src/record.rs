//! On-arena record format.
//!
//! Each record occupies one allocated block. The payload starts with a
//! fixed 16-byte header, followed immediately by the key bytes and the
//! value bytes:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       4   next (raw handle of the next record in the bucket chain,
//!               0 = end of chain)
//!   4       8   key_hash
//!  12       2   key_len
//!  14       2   val_len
//!  16       -   key bytes, then value bytes
//! ```
//!
//! All fields are little-endian. The `next` field sits at payload offset 0
//! so chain relinking touches exactly one word.

use opal_common::types::KeyHash;

/// Size of the fixed record header.
pub(crate) const RECORD_HEADER_SIZE: usize = 16;

/// Payload offset of the `next` field.
pub(crate) const NEXT_FIELD_OFFSET: u32 = 0;

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    /// Raw handle of the next record in the chain, 0 at the end.
    pub next: u32,
    /// Hash of the record's key.
    pub key_hash: KeyHash,
    /// Key length in bytes.
    pub key_len: u16,
    /// Value length in bytes.
    pub val_len: u16,
}

impl RecordHeader {
    /// Packs the header into its wire representation.
    pub(crate) fn encode(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut bytes = [0u8; RECORD_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.next.to_le_bytes());
        bytes[4..12].copy_from_slice(&self.key_hash.as_u64().to_le_bytes());
        bytes[12..14].copy_from_slice(&self.key_len.to_le_bytes());
        bytes[14..16].copy_from_slice(&self.val_len.to_le_bytes());
        bytes
    }

    /// Unpacks a header from its wire representation.
    pub(crate) fn decode(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= RECORD_HEADER_SIZE);
        Self {
            next: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            key_hash: KeyHash::from_u64(u64::from_le_bytes(bytes[4..12].try_into().unwrap())),
            key_len: u16::from_le_bytes(bytes[12..14].try_into().unwrap()),
            val_len: u16::from_le_bytes(bytes[14..16].try_into().unwrap()),
        }
    }

    /// Total payload size of a record with this header.
    #[inline]
    pub(crate) fn payload_size(&self) -> u32 {
        (RECORD_HEADER_SIZE + self.key_len as usize + self.val_len as usize) as u32
    }

    /// Payload offset of the key bytes.
    #[inline]
    pub(crate) fn key_offset(&self) -> u32 {
        RECORD_HEADER_SIZE as u32
    }

    /// Payload offset of the value bytes.
    #[inline]
    pub(crate) fn value_offset(&self) -> u32 {
        RECORD_HEADER_SIZE as u32 + u32::from(self.key_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let header = RecordHeader {
            next: 0x0012_3450,
            key_hash: KeyHash::of(b"roundtrip"),
            key_len: 9,
            val_len: 1024,
        };
        assert_eq!(RecordHeader::decode(&header.encode()), header);
    }

    #[test]
    fn test_layout_offsets() {
        let header = RecordHeader {
            next: 0,
            key_hash: KeyHash::of(b"k"),
            key_len: 5,
            val_len: 7,
        };
        assert_eq!(header.key_offset(), 16);
        assert_eq!(header.value_offset(), 21);
        assert_eq!(header.payload_size(), 28);
    }

    #[test]
    fn test_encoding_is_little_endian() {
        let header = RecordHeader {
            next: 1,
            key_hash: KeyHash::from_u64(2),
            key_len: 3,
            val_len: 4,
        };
        let bytes = header.encode();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[12], 3);
        assert_eq!(bytes[14], 4);
    }
}
