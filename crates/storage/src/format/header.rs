//! File header (spec §4.1, §6.1).
//!
//! ```text
//! [0..64)  Header { magic="EUFF", version:u32, file_size:u64,
//!                   tag_dict_offset:u64, tag_dict_size:u64,
//!                   entity_index_offset:u64, entity_index_size:u64,
//!                   entity_count:u64, last_modified:i64 }
//! ```
//!
//! A legacy variant uses a different magic and a 64-byte id field in its
//! entity index; readers detect the magic and dispatch, writers always
//! produce the current format.

use entity_core::error::{EntityError, Result};
use entity_core::limits::MAX_FILE_OFFSET;
use std::convert::TryInto;

/// Current format magic, little-endian bytes of `"EUFF"`.
pub const MAGIC_CURRENT: [u8; 4] = *b"EUFF";

/// Legacy format magic. Readers still dispatch on this; writers never
/// produce it.
pub const MAGIC_LEGACY: [u8; 4] = *b"EUF1";

/// Id width used by the legacy format's entity index entries.
pub const LEGACY_ID_LEN: usize = 64;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size in bytes of a serialized [`FileHeader`].
pub const HEADER_SIZE: usize = 64;

/// Which on-disk layout a file uses, determined by its magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVariant {
    /// Current unified layout, 96-byte entity ids.
    Current,
    /// Legacy layout, 64-byte entity ids.
    Legacy,
}

impl FormatVariant {
    /// The entity id width used by this variant's index entries.
    pub fn id_len(self) -> usize {
        match self {
            FormatVariant::Current => entity_core::limits::MAX_ENTITY_ID_LEN,
            FormatVariant::Legacy => LEGACY_ID_LEN,
        }
    }
}

/// The 64-byte fixed file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format variant, determined by `magic` at read time.
    pub variant: FormatVariant,
    /// Format version.
    pub version: u32,
    /// Total file size in bytes, as of the last checkpoint.
    pub file_size: u64,
    /// Byte offset of the tag dictionary section.
    pub tag_dict_offset: u64,
    /// Byte size of the tag dictionary section.
    pub tag_dict_size: u64,
    /// Byte offset of the entity index section.
    pub entity_index_offset: u64,
    /// Byte size of the entity index section.
    pub entity_index_size: u64,
    /// Number of live entities tracked by the index.
    pub entity_count: u64,
    /// Nanosecond timestamp of the last write.
    pub last_modified: i64,
}

impl FileHeader {
    /// An empty header for a freshly-created file: every section is
    /// located immediately after the header, with zero size.
    pub fn new_empty(now_nanos: i64) -> Self {
        FileHeader {
            variant: FormatVariant::Current,
            version: FORMAT_VERSION,
            file_size: HEADER_SIZE as u64,
            tag_dict_offset: HEADER_SIZE as u64,
            tag_dict_size: 0,
            entity_index_offset: HEADER_SIZE as u64,
            entity_index_size: 0,
            entity_count: 0,
            last_modified: now_nanos,
        }
    }

    /// Serialize to the 64-byte on-disk representation. Always writes the
    /// current magic; writers never emit the legacy format.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC_CURRENT);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.file_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.tag_dict_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.tag_dict_size.to_le_bytes());
        buf[32..40].copy_from_slice(&self.entity_index_offset.to_le_bytes());
        buf[40..48].copy_from_slice(&self.entity_index_size.to_le_bytes());
        buf[48..56].copy_from_slice(&self.entity_count.to_le_bytes());
        buf[56..64].copy_from_slice(&self.last_modified.to_le_bytes());
        buf
    }

    /// Parse a 64-byte header, dispatching on magic (§4.1 compatibility
    /// note).
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(EntityError::corruption(format!(
                "header too short: {} bytes",
                buf.len()
            )));
        }
        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        let variant = if magic == MAGIC_CURRENT {
            FormatVariant::Current
        } else if magic == MAGIC_LEGACY {
            FormatVariant::Legacy
        } else {
            return Err(EntityError::corruption(format!(
                "unrecognized file magic: {magic:?}"
            )));
        };

        let header = FileHeader {
            variant,
            version: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            file_size: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            tag_dict_offset: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            tag_dict_size: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            entity_index_offset: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            entity_index_size: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            entity_count: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
            last_modified: i64::from_le_bytes(buf[56..64].try_into().unwrap()),
        };
        header.validate_offsets()?;
        Ok(header)
    }

    /// Validate that every offset is nonzero and within `[1,
    /// min(file_size, 10GiB)]`, per the checkpoint validator (§4.13) and
    /// corruption scanner (§4.14).
    pub fn validate_offsets(&self) -> Result<()> {
        let ceiling = self.file_size.min(MAX_FILE_OFFSET);
        for (name, offset) in [
            ("tag_dict_offset", self.tag_dict_offset),
            ("entity_index_offset", self.entity_index_offset),
        ] {
            if offset == 0 || offset > ceiling {
                return Err(EntityError::corruption(format!(
                    "invalid header offset {name}={offset} (file_size={}, ceiling={ceiling})",
                    self.file_size
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let h = FileHeader::new_empty(42);
        let bytes = h.to_bytes();
        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn rejects_unknown_magic() {
        let mut bytes = FileHeader::new_empty(0).to_bytes();
        bytes[0] = b'X';
        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_zero_offset() {
        let mut h = FileHeader::new_empty(0);
        h.tag_dict_offset = 0;
        assert!(h.validate_offsets().is_err());
    }

    #[test]
    fn detects_legacy_magic() {
        let mut bytes = FileHeader::new_empty(0).to_bytes();
        bytes[0..4].copy_from_slice(&MAGIC_LEGACY);
        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.variant, FormatVariant::Legacy);
        assert_eq!(parsed.variant.id_len(), LEGACY_ID_LEN);
    }
}
