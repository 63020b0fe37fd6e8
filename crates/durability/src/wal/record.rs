//! WAL entry framing (§4.3, §6.2).
//!
//! `[len:u32][op:u8][ts:i64][id_len:u16][id][chk_len:u16][chk][entity_len:u32][entity_blob]`.
//! `chk` is the SHA-256 digest of `entity_blob`, empty for `Delete`. `len`
//! covers every field after itself, so a reader can validate framing
//! before touching the payload.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use entity_core::error::{EntityError, Result};
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// The kind of mutation a WAL entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOp {
    /// Entity creation.
    Create = 0,
    /// Entity update (content and/or tags).
    Update = 1,
    /// Entity deletion (tombstone).
    Delete = 2,
    /// Checkpoint marker; carries no entity payload.
    Checkpoint = 3,
}

impl WalOp {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(WalOp::Create),
            1 => Some(WalOp::Update),
            2 => Some(WalOp::Delete),
            3 => Some(WalOp::Checkpoint),
            _ => None,
        }
    }
}

/// A single framed WAL entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// The mutation kind.
    pub op: WalOp,
    /// Nanosecond timestamp of the mutation.
    pub ts_nanos: i64,
    /// The affected entity's id.
    pub id: String,
    /// SHA-256 digest of `entity_blob`; empty for `Delete`/`Checkpoint`.
    pub checksum: Vec<u8>,
    /// The encoded entity block, empty for `Delete`/`Checkpoint`.
    pub entity_blob: Vec<u8>,
}

impl WalRecord {
    /// Build a `Create`/`Update` entry, computing the SHA-256 checksum
    /// over `entity_blob`.
    pub fn mutation(op: WalOp, id: impl Into<String>, ts_nanos: i64, entity_blob: Vec<u8>) -> Self {
        let checksum = Sha256::digest(&entity_blob).to_vec();
        WalRecord {
            op,
            ts_nanos,
            id: id.into(),
            checksum,
            entity_blob,
        }
    }

    /// Build a `Delete` entry. Carries no content, so no checksum.
    pub fn delete(id: impl Into<String>, ts_nanos: i64) -> Self {
        WalRecord {
            op: WalOp::Delete,
            ts_nanos,
            id: id.into(),
            checksum: Vec::new(),
            entity_blob: Vec::new(),
        }
    }

    /// Build a `Checkpoint` marker entry.
    pub fn checkpoint(ts_nanos: i64) -> Self {
        WalRecord {
            op: WalOp::Checkpoint,
            ts_nanos,
            id: String::new(),
            checksum: Vec::new(),
            entity_blob: Vec::new(),
        }
    }

    /// `true` if the stored checksum matches a fresh digest of
    /// `entity_blob`; always `true` when there is no payload to check.
    pub fn verify_checksum(&self) -> bool {
        if self.entity_blob.is_empty() {
            return self.checksum.is_empty();
        }
        Sha256::digest(&self.entity_blob).as_slice() == self.checksum.as_slice()
    }

    /// Serialize the full `[len:u32][...]` frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(1 + 8 + 2 + self.id.len() + 2 + self.checksum.len() + 4 + self.entity_blob.len());
        payload.push(self.op as u8);
        payload.write_i64::<LittleEndian>(self.ts_nanos).unwrap();
        payload.write_u16::<LittleEndian>(self.id.len() as u16).unwrap();
        payload.extend_from_slice(self.id.as_bytes());
        payload.write_u16::<LittleEndian>(self.checksum.len() as u16).unwrap();
        payload.extend_from_slice(&self.checksum);
        payload.write_u32::<LittleEndian>(self.entity_blob.len() as u32).unwrap();
        payload.extend_from_slice(&self.entity_blob);

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
        frame.extend_from_slice(&payload);
        frame
    }

    /// Parse one frame from the start of `bytes`, returning the record
    /// and the number of bytes consumed. Returns `Ok(None)` if `bytes`
    /// does not yet contain a complete frame (the caller should treat
    /// this as "stop reading here", not as corruption).
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<(Self, usize)>> {
        if bytes.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if len == 0 {
            return Err(EntityError::corruption("WAL frame length is zero"));
        }
        if bytes.len() < 4 + len {
            return Ok(None);
        }

        let mut cur = Cursor::new(&bytes[4..4 + len]);
        let op_byte = cur
            .read_u8()
            .map_err(|e| EntityError::corruption(format!("WAL entry op: {e}")))?;
        let op = WalOp::from_u8(op_byte)
            .ok_or_else(|| EntityError::corruption(format!("unknown WAL op byte {op_byte}")))?;
        let ts_nanos = cur
            .read_i64::<LittleEndian>()
            .map_err(|e| EntityError::corruption(format!("WAL entry ts: {e}")))?;

        let id_len = cur
            .read_u16::<LittleEndian>()
            .map_err(|e| EntityError::corruption(format!("WAL entry id_len: {e}")))? as usize;
        let mut id_buf = vec![0u8; id_len];
        std::io::Read::read_exact(&mut cur, &mut id_buf)
            .map_err(|e| EntityError::corruption(format!("WAL entry id: {e}")))?;
        let id = String::from_utf8(id_buf)
            .map_err(|e| EntityError::corruption(format!("WAL entry id utf8: {e}")))?;

        let chk_len = cur
            .read_u16::<LittleEndian>()
            .map_err(|e| EntityError::corruption(format!("WAL entry chk_len: {e}")))? as usize;
        let mut checksum = vec![0u8; chk_len];
        std::io::Read::read_exact(&mut cur, &mut checksum)
            .map_err(|e| EntityError::corruption(format!("WAL entry checksum: {e}")))?;

        let entity_len = cur
            .read_u32::<LittleEndian>()
            .map_err(|e| EntityError::corruption(format!("WAL entry entity_len: {e}")))? as usize;
        let mut entity_blob = vec![0u8; entity_len];
        std::io::Read::read_exact(&mut cur, &mut entity_blob)
            .map_err(|e| EntityError::corruption(format!("WAL entry entity_blob: {e}")))?;

        Ok(Some((
            WalRecord {
                op,
                ts_nanos,
                id,
                checksum,
                entity_blob,
            },
            4 + len,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_mutation_record() {
        let record = WalRecord::mutation(WalOp::Create, "e1", 1000, b"blob".to_vec());
        let bytes = record.to_bytes();
        let (decoded, consumed) = WalRecord::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
        assert!(decoded.verify_checksum());
    }

    #[test]
    fn delete_carries_no_checksum() {
        let record = WalRecord::delete("e1", 2000);
        let bytes = record.to_bytes();
        let (decoded, _) = WalRecord::from_bytes(&bytes).unwrap().unwrap();
        assert!(decoded.checksum.is_empty());
        assert!(decoded.verify_checksum());
    }

    #[test]
    fn incomplete_frame_returns_none_not_error() {
        let record = WalRecord::mutation(WalOp::Update, "e1", 1000, b"blob".to_vec());
        let bytes = record.to_bytes();
        let truncated = &bytes[..bytes.len() - 2];
        assert!(WalRecord::from_bytes(truncated).unwrap().is_none());
    }

    #[test]
    fn tampered_checksum_fails_verification() {
        let mut record = WalRecord::mutation(WalOp::Create, "e1", 1000, b"blob".to_vec());
        record.checksum[0] ^= 0xFF;
        assert!(!record.verify_checksum());
    }
}
