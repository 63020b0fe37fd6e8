//! Sharded lock manager (C12, §4.11).
//!
//! `N_entity` shards cover per-entity locks, `N_tag` shards cover
//! per-tag locks (both powers of two, 256/128 by default). A global
//! file RW lock protects structural changes (e.g. checkpoint rewriting
//! the header), and two dedicated mutexes serialize the write path
//! against checkpoint-in-progress. Multi-key acquisition always locks
//! shards in ascending index order so two callers wanting overlapping
//! key sets can never deadlock against each other.

use entity_core::limits::{DEFAULT_ENTITY_LOCK_SHARDS, DEFAULT_TAG_LOCK_SHARDS};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::hash::{Hash, Hasher};

fn shard_index(shards: usize, key: &str) -> usize {
    let mut hasher = rustc_hash::FxHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shards
}

/// Sharded RW locks plus the file-level and write/checkpoint mutexes
/// (§4.11).
pub struct LockManager {
    entity_shards: Vec<RwLock<()>>,
    tag_shards: Vec<RwLock<()>>,
    file_lock: RwLock<()>,
    write_mutex: Mutex<()>,
    checkpoint_mutex: Mutex<()>,
}

impl LockManager {
    /// A lock manager with the default shard counts.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_ENTITY_LOCK_SHARDS, DEFAULT_TAG_LOCK_SHARDS)
    }

    /// A lock manager with explicit shard counts. Both must be powers
    /// of two for the hash-modulo distribution to be uniform.
    pub fn with_shards(entity_shards: usize, tag_shards: usize) -> Self {
        debug_assert!(entity_shards.is_power_of_two());
        debug_assert!(tag_shards.is_power_of_two());
        LockManager {
            entity_shards: (0..entity_shards).map(|_| RwLock::new(())).collect(),
            tag_shards: (0..tag_shards).map(|_| RwLock::new(())).collect(),
            file_lock: RwLock::new(()),
            write_mutex: Mutex::new(()),
            checkpoint_mutex: Mutex::new(()),
        }
    }

    /// Exclusively lock a single entity id.
    pub fn lock_entity(&self, id: &str) -> RwLockWriteGuard<'_, ()> {
        self.entity_shards[shard_index(self.entity_shards.len(), id)].write()
    }

    /// Exclusively lock a single tag.
    pub fn lock_tag(&self, tag: &str) -> RwLockWriteGuard<'_, ()> {
        self.tag_shards[shard_index(self.tag_shards.len(), tag)].write()
    }

    /// Exclusively lock every shard touched by `ids`, in ascending shard
    /// index order (with duplicate shards collapsed) so concurrent
    /// multi-key operations can never deadlock against each other.
    pub fn lock_entities<'a>(&'a self, ids: &[impl AsRef<str>]) -> Vec<RwLockWriteGuard<'a, ()>> {
        let mut indices: Vec<usize> = ids
            .iter()
            .map(|id| shard_index(self.entity_shards.len(), id.as_ref()))
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|i| self.entity_shards[i].write()).collect()
    }

    /// Shared-lock the global file lock: the common case for reads and
    /// non-structural writes.
    pub fn read_file(&self) -> RwLockReadGuard<'_, ()> {
        self.file_lock.read()
    }

    /// Exclusively lock the global file lock: structural changes
    /// (checkpoint rewriting the header/indexes).
    pub fn write_file(&self) -> RwLockWriteGuard<'_, ()> {
        self.file_lock.write()
    }

    /// Serialize entry into the write path.
    pub fn acquire_write(&self) -> MutexGuard<'_, ()> {
        self.write_mutex.lock()
    }

    /// Serialize entry into a checkpoint, preventing it from running
    /// concurrently with a write.
    pub fn acquire_checkpoint(&self) -> MutexGuard<'_, ()> {
        self.checkpoint_mutex.lock()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_maps_to_same_shard() {
        let mgr = LockManager::with_shards(4, 4);
        let _g1 = mgr.lock_entity("same-id");
        drop(_g1);
        let _g2 = mgr.lock_entity("same-id");
    }

    #[test]
    fn multi_key_lock_dedups_shared_shards() {
        let mgr = LockManager::with_shards(4, 4);
        let guards = mgr.lock_entities(&["a", "b", "c"]);
        assert!(!guards.is_empty());
        assert!(guards.len() <= 3);
    }

    #[test]
    fn write_and_checkpoint_mutexes_are_independent() {
        let mgr = LockManager::with_shards(4, 4);
        let _write_guard = mgr.acquire_write();
        let _checkpoint_guard = mgr.acquire_checkpoint();
    }
}
