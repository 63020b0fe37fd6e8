//! Tag dictionary (C6): string-interned tag ↔ id mapping (§4, §6.1).
//!
//! Ids are append-only and monotonically increasing from 1. The dictionary
//! is owned by the file; its in-memory instance is shared read-mostly with
//! copy-on-write semantics under the write lock (callers clone an `Arc`
//! snapshot rather than locking for reads).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use entity_core::error::{EntityError, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::io::Cursor;
use std::sync::Arc;

/// Thread-safe, append-only string ↔ u32 interner.
#[derive(Debug, Default)]
pub struct TagDictionary {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    by_id: Vec<String>,       // index 0 unused, ids start at 1
    by_string: FxHashMap<String, u32>,
}

impl TagDictionary {
    /// An empty dictionary.
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.by_id.push(String::new()); // id 0 reserved/unused
        TagDictionary {
            inner: RwLock::new(inner),
        }
    }

    /// Intern `tag`, assigning a new id if it has not been seen before.
    pub fn intern(&self, tag: &str) -> u32 {
        if let Some(&id) = self.inner.read().by_string.get(tag) {
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.by_string.get(tag) {
            return id;
        }
        let id = inner.by_id.len() as u32;
        inner.by_id.push(tag.to_string());
        inner.by_string.insert(tag.to_string(), id);
        id
    }

    /// Resolve an id back to its string, if known.
    pub fn resolve(&self, id: u32) -> Option<String> {
        let inner = self.inner.read();
        inner.by_id.get(id as usize).filter(|s| !s.is_empty() || id == 0).cloned()
    }

    /// Number of interned strings (excluding the unused id 0 slot).
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len().saturating_sub(1)
    }

    /// `true` if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize as `{ count:u32, entries: { id:u32, len:u16, bytes } }`
    /// (§6.1).
    pub fn to_bytes(&self) -> Vec<u8> {
        let inner = self.inner.read();
        let mut buf = Vec::new();
        let count = (inner.by_id.len() - 1) as u32;
        buf.write_u32::<LittleEndian>(count).unwrap();
        for (id, s) in inner.by_id.iter().enumerate().skip(1) {
            buf.write_u32::<LittleEndian>(id as u32).unwrap();
            buf.write_u16::<LittleEndian>(s.len() as u16).unwrap();
            buf.extend_from_slice(s.as_bytes());
        }
        buf
    }

    /// Parse a dictionary previously produced by [`Self::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let count = cur
            .read_u32::<LittleEndian>()
            .map_err(|e| EntityError::corruption(format!("tag dict header: {e}")))?;
        let mut inner = Inner::default();
        inner.by_id.push(String::new());
        for _ in 0..count {
            let id = cur
                .read_u32::<LittleEndian>()
                .map_err(|e| EntityError::corruption(format!("tag dict entry id: {e}")))?;
            let len = cur
                .read_u16::<LittleEndian>()
                .map_err(|e| EntityError::corruption(format!("tag dict entry len: {e}")))? as usize;
            let pos = cur.position() as usize;
            if pos + len > data.len() {
                return Err(EntityError::corruption("tag dict entry truncated"));
            }
            let s = String::from_utf8(data[pos..pos + len].to_vec())
                .map_err(|e| EntityError::corruption(format!("tag dict utf8: {e}")))?;
            cur.set_position((pos + len) as u64);
            while inner.by_id.len() <= id as usize {
                inner.by_id.push(String::new());
            }
            inner.by_id[id as usize] = s.clone();
            inner.by_string.insert(s, id);
        }
        Ok(TagDictionary {
            inner: RwLock::new(inner),
        })
    }

    /// Wrap in an `Arc` for cheap read-mostly sharing.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_and_resolves() {
        let dict = TagDictionary::new();
        let id = dict.intern("type:user");
        assert_eq!(dict.resolve(id).as_deref(), Some("type:user"));
    }

    #[test]
    fn reinterning_same_tag_returns_same_id() {
        let dict = TagDictionary::new();
        let a = dict.intern("status:active");
        let b = dict.intern("status:active");
        assert_eq!(a, b);
    }

    #[test]
    fn ids_increase_monotonically() {
        let dict = TagDictionary::new();
        let a = dict.intern("a");
        let b = dict.intern("b");
        assert!(b > a);
    }

    #[test]
    fn round_trips_through_bytes() {
        let dict = TagDictionary::new();
        dict.intern("type:user");
        dict.intern("status:active");
        let bytes = dict.to_bytes();
        let restored = TagDictionary::from_bytes(&bytes).unwrap();
        assert_eq!(restored.len(), dict.len());
        assert_eq!(restored.resolve(1), dict.resolve(1));
        assert_eq!(restored.resolve(2), dict.resolve(2));
    }
}
