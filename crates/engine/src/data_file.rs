//! The on-disk entity file (§4.1, §4.13): header, tag dictionary,
//! entity index, and the append-only entity block region, all in one
//! file.
//!
//! New entity blocks are always appended at the current end of file.
//! At checkpoint time the tag dictionary and entity index are rewritten
//! immediately after the (now current) end of entity data and the
//! header is updated to point at the new locations; the previous
//! checkpoint's tag-dict/index bytes are never overwritten; they just
//! become dead space further back in the file. That is what makes
//! [`entity_durability::CheckpointCoordinator`]'s snapshot/restore
//! protocol correct with no separate backup step: restoring the old
//! header makes readers resolve the old, still-intact tag-dict/index/data
//! region again.

use entity_core::error::Result;
use entity_core::types::{Entity, IndexEntry};
use entity_storage::format::{decode_entity, encode_entity};
use entity_storage::{FileHeader, TagDictionary};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::reader_pool::ReaderPool;

/// Owns the writer handle, tag dictionary, and in-memory index for one
/// entity data file.
pub struct DataFile {
    path: PathBuf,
    writer: Mutex<File>,
    dict: Arc<TagDictionary>,
    codec: Arc<dyn entity_core::traits::StorageCodec>,
    index: RwLock<FxHashMap<String, IndexEntry>>,
}

impl DataFile {
    /// Open an existing data file at `path`, or create a fresh empty one
    /// if it doesn't exist yet. Returns the file together with the
    /// header describing its current layout.
    pub fn open(
        path: impl Into<PathBuf>,
        codec: Arc<dyn entity_core::traits::StorageCodec>,
        now_nanos: i64,
    ) -> Result<(Self, FileHeader)> {
        let path = path.into();
        let exists = path.exists();

        let mut writer = OpenOptions::new().create(true).read(true).write(true).open(&path)?;

        let (header, dict, index) = if exists && writer.metadata()?.len() >= entity_storage::format::HEADER_SIZE as u64 {
            Self::load(&mut writer)?
        } else {
            let header = FileHeader::new_empty(now_nanos);
            writer.set_len(0)?;
            writer.write_all(&header.to_bytes())?;
            writer.sync_all()?;
            (header, TagDictionary::new(), FxHashMap::default())
        };

        Ok((
            DataFile {
                path,
                writer: Mutex::new(writer),
                dict: dict.shared(),
                codec,
                index: RwLock::new(index),
            },
            header,
        ))
    }

    fn load(file: &mut File) -> Result<(FileHeader, TagDictionary, FxHashMap<String, IndexEntry>)> {
        let mut header_buf = [0u8; entity_storage::format::HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header_buf)?;
        let header = FileHeader::from_bytes(&header_buf)?;

        let mut dict_buf = vec![0u8; header.tag_dict_size as usize];
        file.seek(SeekFrom::Start(header.tag_dict_offset))?;
        file.read_exact(&mut dict_buf)?;
        let dict = TagDictionary::from_bytes(&dict_buf)?;

        let mut index_buf = vec![0u8; header.entity_index_size as usize];
        file.seek(SeekFrom::Start(header.entity_index_offset))?;
        file.read_exact(&mut index_buf)?;
        let id_len = header.variant.id_len();
        let entries = entity_storage::format::decode_index_section(&index_buf, id_len)?;

        let mut index = FxHashMap::default();
        for entry in entries {
            if !entry.is_tombstone() {
                index.insert(IndexEntry::unpack_id(&entry.id), entry);
            }
        }
        Ok((header, dict, index))
    }

    /// Open a reader pool sharing this file's underlying path.
    pub fn open_reader_pool(&self, min: usize, max: usize, timeout: std::time::Duration) -> Result<ReaderPool> {
        ReaderPool::open(&self.path, min, max, timeout)
    }

    /// Shared handle to the interned tag dictionary.
    pub fn dictionary(&self) -> Arc<TagDictionary> {
        Arc::clone(&self.dict)
    }

    /// Look up an entity's index entry.
    pub fn lookup(&self, id: &str) -> Option<IndexEntry> {
        self.index.read().get(id).copied()
    }

    /// Every live (non-tombstoned) entity id currently indexed.
    pub fn ids(&self) -> Vec<String> {
        self.index.read().keys().cloned().collect()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> u64 {
        self.index.read().len() as u64
    }

    /// Append `entity`'s encoded block at the current end of file and
    /// record its index entry. Returns the entry that was recorded.
    pub fn append_entity(&self, entity: &Entity) -> Result<IndexEntry> {
        let block = encode_entity(entity, &self.dict, self.codec.as_ref());
        let mut writer = self.writer.lock();
        let offset = writer.seek(SeekFrom::End(0))?;
        writer.write_all(&block)?;
        writer.sync_all()?;

        let entry = IndexEntry {
            id: IndexEntry::pack_id(&entity.id)?,
            offset,
            size: block.len() as u32,
            flags: 0,
        };
        self.index.write().insert(entity.id.clone(), entry);
        Ok(entry)
    }

    /// Remove an entity from the live index (tombstoning); the block
    /// bytes stay on disk until the next checkpoint reclaims the file.
    pub fn remove(&self, id: &str) -> Option<IndexEntry> {
        self.index.write().remove(id)
    }

    /// Decode the entity block referenced by `entry`.
    pub fn decode_block(&self, id: &str, entry: &IndexEntry) -> Result<Entity> {
        let mut writer = self.writer.lock();
        let mut buf = vec![0u8; entry.size as usize];
        writer.seek(SeekFrom::Start(entry.offset))?;
        writer.read_exact(&mut buf)?;
        decode_entity(id, &buf, &self.dict, self.codec.as_ref())
    }

    /// Read an entity block via a pooled reader handle rather than the
    /// shared writer lock, for use on the read path.
    pub fn decode_block_via(&self, id: &str, entry: &IndexEntry, reader: &mut crate::reader_pool::ReaderHandle<'_>) -> Result<Entity> {
        let mut buf = vec![0u8; entry.size as usize];
        let file = reader.file();
        file.seek(SeekFrom::Start(entry.offset))?;
        file.read_exact(&mut buf)?;
        decode_entity(id, &buf, &self.dict, self.codec.as_ref())
    }

    /// Rewrite the tag dictionary and entity index immediately after the
    /// current end of entity data, then rewrite the header to point at
    /// the new sections. This is the `commit` closure handed to
    /// [`entity_durability::CheckpointCoordinator::checkpoint`].
    pub fn checkpoint_commit(&self, now_nanos: i64) -> Result<FileHeader> {
        let mut writer = self.writer.lock();
        writer.sync_all()?;
        let data_end = writer.seek(SeekFrom::End(0))?;

        let dict_bytes = self.dict.to_bytes();
        let entries: Vec<IndexEntry> = self.index.read().values().copied().collect();
        let index_bytes = entity_storage::format::encode_index_section(&entries);

        let tag_dict_offset = data_end;
        writer.seek(SeekFrom::Start(tag_dict_offset))?;
        writer.write_all(&dict_bytes)?;

        let entity_index_offset = tag_dict_offset + dict_bytes.len() as u64;
        writer.seek(SeekFrom::Start(entity_index_offset))?;
        writer.write_all(&index_bytes)?;
        writer.sync_all()?;

        let file_size = entity_index_offset + index_bytes.len() as u64;
        let header = FileHeader {
            variant: entity_storage::FormatVariant::Current,
            version: entity_storage::format::FORMAT_VERSION,
            file_size,
            tag_dict_offset,
            tag_dict_size: dict_bytes.len() as u64,
            entity_index_offset,
            entity_index_size: index_bytes.len() as u64,
            entity_count: entries.len() as u64,
            last_modified: now_nanos,
        };
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&header.to_bytes())?;
        writer.sync_all()?;
        Ok(header)
    }

    /// Re-persist a header on disk during checkpoint recovery, without
    /// touching the already-intact tag-dict/index/data it points at.
    pub fn checkpoint_restore(&self, header: &FileHeader) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&header.to_bytes())?;
        writer.sync_all()?;
        Ok(())
    }

    /// Current on-disk file size.
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.writer.lock().metadata()?.len())
    }

    /// The file's path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_storage::codec::IdentityCodec;
    use tempfile::tempdir;

    fn codec() -> Arc<dyn entity_core::traits::StorageCodec> {
        Arc::new(IdentityCodec)
    }

    #[test]
    fn fresh_file_starts_empty() {
        let dir = tempdir().unwrap();
        let (data_file, header) = DataFile::open(dir.path().join("entity.dat"), codec(), 0).unwrap();
        assert_eq!(header.entity_count, 0);
        assert_eq!(data_file.entity_count(), 0);
    }

    #[test]
    fn append_then_lookup_round_trips() {
        let dir = tempdir().unwrap();
        let (data_file, _) = DataFile::open(dir.path().join("entity.dat"), codec(), 0).unwrap();
        let entity = Entity::new("e1", vec!["type:user".into()], b"hi".to_vec(), 100).unwrap();
        data_file.append_entity(&entity).unwrap();

        let entry = data_file.lookup("e1").unwrap();
        let decoded = data_file.decode_block("e1", &entry).unwrap();
        assert_eq!(decoded.id, "e1");
        assert_eq!(decoded.content, b"hi");
    }

    #[test]
    fn checkpoint_then_reopen_preserves_entities() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entity.dat");
        {
            let (data_file, _) = DataFile::open(&path, codec(), 0).unwrap();
            let entity = Entity::new("e1", vec!["type:user".into()], b"hi".to_vec(), 100).unwrap();
            data_file.append_entity(&entity).unwrap();
            data_file.checkpoint_commit(200).unwrap();
        }
        let (reopened, header) = DataFile::open(&path, codec(), 0).unwrap();
        assert_eq!(header.entity_count, 1);
        let entry = reopened.lookup("e1").unwrap();
        let decoded = reopened.decode_block("e1", &entry).unwrap();
        assert_eq!(decoded.content, b"hi");
    }

    #[test]
    fn checkpoint_restore_rewrites_only_the_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entity.dat");
        let (data_file, original_header) = DataFile::open(&path, codec(), 0).unwrap();
        let entity = Entity::new("e1", vec![], b"hi".to_vec(), 100).unwrap();
        data_file.append_entity(&entity).unwrap();
        data_file.checkpoint_commit(200).unwrap();

        data_file.checkpoint_restore(&original_header).unwrap();
        let (_, reread) = DataFile::open(&path, codec(), 0).unwrap();
        assert_eq!(reread.entity_count, original_header.entity_count);
    }
}
