//! Tag index (C7): sharded `logical tag -> entity ids` inverted index
//! with a checksummed sidecar file (§4.6, §6.3).
//!
//! Sharded by a hash of the tag string (32 shards by default) so
//! concurrent writers touching unrelated tags don't contend on a single
//! lock. The sidecar format is `TIDX | version:u16 | entry_count:u64 |
//! sha256:32B | entries... | ENDT`; writes go to a temp file and are
//! renamed into place so a crash mid-write never leaves a half-written
//! sidecar behind, and loads that fail the checksum are discarded in
//! favor of a rebuild from the entity file.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use entity_core::error::{EntityError, Result};
use entity_core::limits::DEFAULT_TAG_INDEX_SHARDS;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};
use std::io::{Cursor, Write};
use std::path::Path;

const MAGIC_START: &[u8; 4] = b"TIDX";
const MAGIC_END: &[u8; 4] = b"ENDT";
const SIDECAR_VERSION: u16 = 1;

struct Shard {
    map: RwLock<FxHashMap<String, FxHashSet<String>>>,
}

/// Sharded inverted tag index.
pub struct TagIndex {
    shards: Vec<Shard>,
}

fn shard_for(shards: usize, tag: &str) -> usize {
    let mut hasher = rustc_hash::FxHasher::default();
    tag.hash(&mut hasher);
    (hasher.finish() as usize) % shards
}

impl TagIndex {
    /// A new index with the default shard count.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_TAG_INDEX_SHARDS)
    }

    /// A new index with a custom shard count.
    pub fn with_shards(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Shard {
                map: RwLock::new(FxHashMap::default()),
            })
            .collect();
        TagIndex { shards }
    }

    fn shard(&self, tag: &str) -> &Shard {
        &self.shards[shard_for(self.shards.len(), tag)]
    }

    /// Record that `entity_id` carries `logical_tag`.
    pub fn add(&self, logical_tag: &str, entity_id: &str) {
        self.shard(logical_tag)
            .map
            .write()
            .entry(logical_tag.to_string())
            .or_default()
            .insert(entity_id.to_string());
    }

    /// Remove the association between `entity_id` and `logical_tag`.
    pub fn remove(&self, logical_tag: &str, entity_id: &str) {
        let shard = self.shard(logical_tag);
        let mut map = shard.map.write();
        if let Some(set) = map.get_mut(logical_tag) {
            set.remove(entity_id);
            if set.is_empty() {
                map.remove(logical_tag);
            }
        }
    }

    /// Entity ids carrying `logical_tag`, in sorted order for stable
    /// pagination.
    pub fn list_by_tag(&self, logical_tag: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shard(logical_tag)
            .map
            .read()
            .get(logical_tag)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        ids.sort();
        ids
    }

    /// Entity ids carrying every tag in `tags` (AND semantics).
    pub fn list_by_tags_all(&self, tags: &[String]) -> Vec<String> {
        let mut iter = tags.iter();
        let Some(first) = iter.next() else {
            return Vec::new();
        };
        let mut result: FxHashSet<String> = self.list_by_tag(first).into_iter().collect();
        for tag in iter {
            if result.is_empty() {
                break;
            }
            let next: FxHashSet<String> = self.list_by_tag(tag).into_iter().collect();
            result.retain(|id| next.contains(id));
        }
        let mut ids: Vec<String> = result.into_iter().collect();
        ids.sort();
        ids
    }

    /// Entity ids carrying at least one tag in `tags` (OR semantics).
    pub fn list_by_tags_any(&self, tags: &[String]) -> Vec<String> {
        let mut result = FxHashSet::default();
        for tag in tags {
            result.extend(self.list_by_tag(tag));
        }
        let mut ids: Vec<String> = result.into_iter().collect();
        ids.sort();
        ids
    }

    /// Total number of distinct tags indexed, across all shards.
    pub fn tag_count(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    /// Every entity id that carries at least one indexed tag, across all
    /// shards. Used by the corruption scanner's index-consistency check
    /// (§4.14) rather than any query path.
    pub fn all_entity_ids(&self) -> FxHashSet<String> {
        let mut out = FxHashSet::default();
        for shard in &self.shards {
            for ids in shard.map.read().values() {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    fn all_entries(&self) -> Vec<(String, Vec<String>)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let map = shard.map.read();
            for (tag, ids) in map.iter() {
                let mut ids: Vec<String> = ids.iter().cloned().collect();
                ids.sort();
                out.push((tag.clone(), ids));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn encode_entries(entries: &[(String, Vec<String>)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (tag, ids) in entries {
            buf.write_u32::<LittleEndian>(tag.len() as u32).unwrap();
            buf.extend_from_slice(tag.as_bytes());
            buf.write_u32::<LittleEndian>(ids.len() as u32).unwrap();
            for id in ids {
                buf.write_u16::<LittleEndian>(id.len() as u16).unwrap();
                buf.extend_from_slice(id.as_bytes());
            }
        }
        buf
    }

    /// Atomically write the checksummed sidecar: write to `path` with a
    /// `.tmp` suffix, then rename into place.
    pub fn save_sidecar(&self, path: &Path) -> Result<()> {
        let entries = self.all_entries();
        let body = Self::encode_entries(&entries);
        let checksum = Sha256::digest(&body);

        let mut out = Vec::with_capacity(4 + 2 + 8 + 32 + body.len() + 4);
        out.extend_from_slice(MAGIC_START);
        out.write_u16::<LittleEndian>(SIDECAR_VERSION)?;
        out.write_u64::<LittleEndian>(entries.len() as u64)?;
        out.extend_from_slice(&checksum);
        out.extend_from_slice(&body);
        out.extend_from_slice(MAGIC_END);

        let tmp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&out)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load a sidecar previously written by [`Self::save_sidecar`].
    /// Returns `Ok(None)` if the checksum or framing doesn't match, so
    /// the caller can fall back to rebuilding the index from the entity
    /// file instead of trusting corrupted data.
    pub fn load_sidecar(path: &Path) -> Result<Option<Self>> {
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.len() < 4 + 2 + 8 + 32 + 4
            || &data[..4] != MAGIC_START
            || &data[data.len() - 4..] != MAGIC_END
        {
            return Ok(None);
        }
        let mut cur = Cursor::new(&data[4..]);
        let _version = cur.read_u16::<LittleEndian>()?;
        let entry_count = cur.read_u64::<LittleEndian>()?;
        let mut checksum = [0u8; 32];
        std::io::Read::read_exact(&mut cur, &mut checksum)?;

        let body_start = 4 + 2 + 8 + 32;
        let body_end = data.len() - 4;
        let body = &data[body_start..body_end];
        if Sha256::digest(body).as_slice() != checksum {
            return Ok(None);
        }

        let index = TagIndex::new();
        let mut body_cur = Cursor::new(body);
        for _ in 0..entry_count {
            let tag_len = body_cur.read_u32::<LittleEndian>()? as usize;
            let mut tag_buf = vec![0u8; tag_len];
            std::io::Read::read_exact(&mut body_cur, &mut tag_buf)?;
            let tag = String::from_utf8(tag_buf)
                .map_err(|e| EntityError::corruption(format!("tag index sidecar utf8: {e}")))?;
            let id_count = body_cur.read_u32::<LittleEndian>()?;
            for _ in 0..id_count {
                let id_len = body_cur.read_u16::<LittleEndian>()? as usize;
                let mut id_buf = vec![0u8; id_len];
                std::io::Read::read_exact(&mut body_cur, &mut id_buf)?;
                let id = String::from_utf8(id_buf)
                    .map_err(|e| EntityError::corruption(format!("tag index sidecar utf8: {e}")))?;
                index.add(&tag, &id);
            }
        }
        Ok(Some(index))
    }
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_entities_by_tag() {
        let idx = TagIndex::new();
        idx.add("type:user", "e1");
        idx.add("type:user", "e2");
        let mut got = idx.list_by_tag("type:user");
        got.sort();
        assert_eq!(got, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[test]
    fn and_semantics_intersect() {
        let idx = TagIndex::new();
        idx.add("type:user", "e1");
        idx.add("type:user", "e2");
        idx.add("status:active", "e1");
        let got = idx.list_by_tags_all(&["type:user".into(), "status:active".into()]);
        assert_eq!(got, vec!["e1".to_string()]);
    }

    #[test]
    fn or_semantics_union() {
        let idx = TagIndex::new();
        idx.add("a", "e1");
        idx.add("b", "e2");
        let mut got = idx.list_by_tags_any(&["a".into(), "b".into()]);
        got.sort();
        assert_eq!(got, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[test]
    fn remove_drops_empty_tag_entries() {
        let idx = TagIndex::new();
        idx.add("a", "e1");
        idx.remove("a", "e1");
        assert_eq!(idx.tag_count(), 0);
    }

    #[test]
    fn sidecar_round_trips() {
        let idx = TagIndex::new();
        idx.add("type:user", "e1");
        idx.add("status:active", "e1");
        idx.add("status:active", "e2");

        let dir = tempdir().unwrap();
        let path = dir.path().join("tags.tidx");
        idx.save_sidecar(&path).unwrap();

        let restored = TagIndex::load_sidecar(&path).unwrap().unwrap();
        assert_eq!(restored.list_by_tag("type:user"), vec!["e1".to_string()]);
        assert_eq!(
            restored.list_by_tag("status:active"),
            vec!["e1".to_string(), "e2".to_string()]
        );
    }

    #[test]
    fn corrupted_sidecar_is_rejected() {
        let idx = TagIndex::new();
        idx.add("a", "e1");
        let dir = tempdir().unwrap();
        let path = dir.path().join("tags.tidx");
        idx.save_sidecar(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 10;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(TagIndex::load_sidecar(&path).unwrap().is_none());
    }
}
