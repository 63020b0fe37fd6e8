//! Entity index section: a dense array of [`IndexEntry`], sorted by id for
//! binary search (§4.1, §6.1).

use entity_core::error::{EntityError, Result};
use entity_core::types::IndexEntry;
use entity_core::limits::MAX_ENTITY_ID_LEN;

const ENTRY_SIZE: usize = MAX_ENTITY_ID_LEN + 8 + 4 + 4; // id + offset + size + flags

/// Serialize entries. Callers are responsible for keeping the slice
/// sorted by id; this function does not sort defensively so a corrupted
/// sort order is detectable by the corruption scanner rather than hidden.
pub fn encode_index_section(entries: &[IndexEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * ENTRY_SIZE);
    for e in entries {
        buf.extend_from_slice(&e.id);
        buf.extend_from_slice(&e.offset.to_le_bytes());
        buf.extend_from_slice(&e.size.to_le_bytes());
        buf.extend_from_slice(&e.flags.to_le_bytes());
    }
    buf
}

/// Parse entries written by [`encode_index_section`]. `id_len` allows the
/// legacy 64-byte id variant to be read into the same [`IndexEntry`] shape
/// (padded with zero bytes).
pub fn decode_index_section(data: &[u8], id_len: usize) -> Result<Vec<IndexEntry>> {
    let entry_size = id_len + 8 + 4 + 4;
    if entry_size == 0 || data.len() % entry_size != 0 {
        return Err(EntityError::corruption(format!(
            "entity index section size {} not a multiple of entry size {entry_size}",
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(data.len() / entry_size);
    for chunk in data.chunks_exact(entry_size) {
        let mut id = [0u8; MAX_ENTITY_ID_LEN];
        id[..id_len].copy_from_slice(&chunk[..id_len]);
        let offset = u64::from_le_bytes(chunk[id_len..id_len + 8].try_into().unwrap());
        let size = u32::from_le_bytes(chunk[id_len + 8..id_len + 12].try_into().unwrap());
        let flags = u32::from_le_bytes(chunk[id_len + 12..id_len + 16].try_into().unwrap());
        out.push(IndexEntry {
            id,
            offset,
            size,
            flags,
        });
    }
    Ok(out)
}
