//! Repository facade (C16, §4.15): the single entry point composing
//! every other component behind `create/update/delete/get/list`,
//! tag and temporal queries, and the maintenance operations
//! (`checkpoint`, `stats`, `verify_index_health`, `repair_index`).
//!
//! Rather than a stack of decorator types (a caching wrapper around a
//! dataset-partitioning wrapper around a bloom/skip-list-accelerated
//! base repository), this is one struct whose behavior is gated by
//! `EngineConfig` — bloom and skip-list acceleration, dataset
//! partitioning, and cache TTL are all just fields that change what a
//! method does, not separate types in a call chain. Components compose
//! via their own locks in a leaf-first order (`LockManager` docs), so
//! there is no outer monitor lock serializing the whole facade.

use crate::background::{BackgroundSupervisor, PeriodicTask};
use crate::corruption::{CorruptionDetector, ScanInputs, ScanReport};
use crate::data_file::DataFile;
use crate::reader_pool::ReaderPool;
use dashmap::DashMap;
use entity_core::config::EngineConfig;
use entity_core::error::{EntityError, Result};
use entity_core::traits::{DirectRepository, StorageCodec};
use entity_core::types::{Entity, TAG_DATASET_PREFIX};
use entity_concurrency::{LockManager, WriteOp, WriteQueue};
use entity_durability::rotation::rotate_with_callbacks;
use entity_durability::{replay, CheckpointCoordinator, HeaderState, WalOp, WalRecord, WalWriter};
use entity_storage::{
    decode_entity, encode_entity, BloomFilter, CompressingCodec, EntityCache, IdentityCodec, SkipList, TagDiff,
    TagIndex, TemporalIndex,
};
use parking_lot::Mutex as ParkingMutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// A point-in-time summary of repository state, for monitoring.
#[derive(Debug, Clone)]
pub struct Stats {
    pub entity_count: u64,
    pub tag_count: usize,
    pub cache_entries: usize,
    pub cache_memory_bytes: u64,
    pub wal_size_bytes: u64,
    pub file_size_bytes: u64,
    pub checkpoint_state: HeaderState,
}

/// Holds every component and the plumbing that wires them together.
/// Wrapped in `Arc` so the background supervisor and the write queue's
/// handler closure can both reach it without the facade itself being
/// `Clone`.
struct RepoInner {
    config: EngineConfig,
    codec: Arc<dyn StorageCodec>,
    data_file: DataFile,
    reader_pool: ReaderPool,
    wal: ParkingMutex<WalWriter>,
    tag_index: TagIndex,
    dataset_indexes: DashMap<String, Arc<TagIndex>>,
    temporal_index: TemporalIndex,
    cache: EntityCache<Entity>,
    cache_put_at: DashMap<String, Instant>,
    bloom: ParkingMutex<BloomFilter>,
    skiplist: SkipList<i64>,
    locks: LockManager,
    checkpoint: CheckpointCoordinator,
    write_count: AtomicU64,
    tag_index_sidecar_path: PathBuf,
}

/// The entity store's public entry point.
pub struct Repository {
    inner: Arc<RepoInner>,
    queue: WriteQueue,
    background: ParkingMutex<Option<BackgroundSupervisor>>,
    detector: Arc<CorruptionDetector>,
}

impl Repository {
    /// Open (or create) a repository at `config.data_path`, replaying
    /// the WAL over whatever checkpoint state is on disk, then start
    /// the background task set.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate().map_err(|e| EntityError::validation(e.to_string()))?;
        std::fs::create_dir_all(&config.data_path)?;

        let now = entity_core::now_nanos();
        let codec: Arc<dyn StorageCodec> = if config.compression_threshold == 0 {
            Arc::new(IdentityCodec)
        } else {
            Arc::new(CompressingCodec::new(config.compression_threshold))
        };

        let data_path = config.data_path.join("entity.dat");
        let (data_file, header) = DataFile::open(&data_path, Arc::clone(&codec), now)?;
        let reader_pool = data_file.open_reader_pool(
            config.reader_pool_min,
            config.reader_pool_max,
            config.reader_acquire_timeout,
        )?;

        let wal_path = config.data_path.join("entity.wal");
        let wal = WalWriter::open(&wal_path, &config)?;

        let tag_index_sidecar_path = config.data_path.join("tags.tidx");
        let tag_index = TagIndex::load_sidecar(&tag_index_sidecar_path)?.unwrap_or_default();

        let temporal_index = TemporalIndex::new();
        let cache = EntityCache::with_caps(config.entity_cache_size, config.entity_cache_memory_limit);
        let expected_items = data_file.entity_count().max(1) as usize;
        let bloom = BloomFilter::new(expected_items, config.bloom_fpp);
        let skiplist = SkipList::new();
        let dataset_indexes: DashMap<String, Arc<TagIndex>> = DashMap::new();

        let inner = Arc::new(RepoInner {
            config: config.clone(),
            codec,
            data_file,
            reader_pool,
            wal: ParkingMutex::new(wal),
            tag_index,
            dataset_indexes,
            temporal_index,
            cache,
            cache_put_at: DashMap::new(),
            bloom: ParkingMutex::new(bloom),
            skiplist,
            locks: LockManager::new(),
            checkpoint: CheckpointCoordinator::new(header),
            write_count: AtomicU64::new(0),
            tag_index_sidecar_path,
        });

        inner.seed_secondary_indexes();
        inner.replay_wal(&wal_path)?;

        let inner_for_queue = Arc::clone(&inner);
        let queue = WriteQueue::start(256, move |op| inner_for_queue.apply(op));

        let detector = Arc::new(CorruptionDetector::new());
        let repository = Repository {
            inner,
            queue,
            background: ParkingMutex::new(None),
            detector,
        };
        repository.start_background_tasks();
        Ok(repository)
    }

    fn start_background_tasks(&self) {
        let scan_interval = Duration::from_secs(
            self.inner.config.corruption_scan_interval_min.max(1) * 60,
        );
        let checkpoint_interval = Duration::from_secs(60);
        let rotation_check_interval = Duration::from_secs(30);
        let pressure_sample_interval = Duration::from_secs(5);

        let checkpoint_inner = Arc::clone(&self.inner);
        let scan_inner = Arc::clone(&self.inner);
        let scan_detector = Arc::clone(&self.detector);
        let rotation_inner = Arc::clone(&self.inner);
        let pressure_inner = Arc::clone(&self.inner);

        let tasks = vec![
            PeriodicTask {
                name: "checkpoint",
                interval: checkpoint_interval,
                work: Box::new(move || {
                    if let Err(e) = checkpoint_inner.run_checkpoint() {
                        warn!(error = %e, "periodic checkpoint failed");
                    }
                }),
            },
            PeriodicTask {
                name: "corruption-scan",
                interval: scan_interval,
                work: Box::new(move || {
                    let report = scan_detector.scan(&scan_inner.scan_inputs());
                    if scan_inner.config.auto_repair && !report.issues.is_empty() {
                        if let Err(e) = scan_inner.rebuild_secondary_indexes() {
                            warn!(error = %e, "auto-repair failed to rebuild indexes");
                        }
                    }
                }),
            },
            PeriodicTask {
                name: "wal-rotation",
                interval: rotation_check_interval,
                work: Box::new(move || {
                    if rotation_inner.wal.lock().needs_rotation() {
                        if let Err(e) = rotation_inner.rotate_wal() {
                            warn!(error = %e, "WAL rotation failed");
                        }
                    }
                }),
            },
            PeriodicTask {
                name: "cache-pressure",
                interval: pressure_sample_interval,
                work: Box::new(move || {
                    let limit = pressure_inner.config.entity_cache_memory_limit.max(1);
                    let pressure = pressure_inner.cache.memory_bytes() as f64 / limit as f64;
                    pressure_inner.cache.apply_pressure(pressure.min(1.0));
                }),
            },
        ];

        *self.background.lock() = Some(BackgroundSupervisor::start(tasks));
    }

    /// Create a new entity. Fails with `AlreadyExists` if the id is
    /// already taken.
    pub fn create(&self, entity: Entity) -> Result<()> {
        self.queue.submit(WriteOp::Create(entity))
    }

    /// Replace an existing entity's tags and content, recording a new
    /// temporal snapshot. Fails with `NotFound` if the id doesn't exist.
    pub fn update(&self, entity: Entity) -> Result<()> {
        self.queue.submit(WriteOp::Update(entity))
    }

    /// Remove an entity and its index entries.
    pub fn delete(&self, id: impl Into<String>) -> Result<()> {
        self.queue.submit(WriteOp::Delete(id.into()))
    }

    /// Attach a tag to an existing entity, recording a new temporal
    /// snapshot. A no-op if the entity already carries the tag.
    pub fn add_tag(&self, id: impl Into<String>, tag: impl Into<String>) -> Result<()> {
        self.queue.submit(WriteOp::AddTag {
            id: id.into(),
            tag: tag.into(),
        })
    }

    /// Detach a tag from an existing entity. A no-op if the entity
    /// doesn't carry it.
    pub fn remove_tag(&self, id: impl Into<String>, tag: impl Into<String>) -> Result<()> {
        self.queue.submit(WriteOp::RemoveTag {
            id: id.into(),
            tag: tag.into(),
        })
    }

    /// Fetch the current state of an entity.
    pub fn get(&self, id: &str) -> Result<Entity> {
        self.inner.get(id)
    }

    /// Every known entity id, sorted for stable pagination.
    pub fn list(&self) -> Vec<String> {
        let mut ids = self.inner.data_file.ids();
        ids.sort();
        ids
    }

    /// Entity ids carrying `tag`.
    pub fn list_by_tag(&self, tag: &str) -> Vec<String> {
        self.inner.resolve_tag_index_for_set(std::slice::from_ref(&tag.to_string())).list_by_tag(tag)
    }

    /// Entity ids matching `tags`: AND semantics if `match_all`, OR
    /// semantics otherwise. When dataset isolation is enabled and
    /// exactly one of `tags` is a `dataset:<name>` selector, the other
    /// tags are resolved against that dataset's own partitioned index.
    pub fn list_by_tags(&self, tags: &[String], match_all: bool) -> Vec<String> {
        let index = self.inner.resolve_tag_index_for_set(tags);
        if match_all {
            index.list_by_tags_all(tags)
        } else {
            index.list_by_tags_any(tags)
        }
    }

    /// An entity's tags as of `at_nanos`, with its current content.
    /// `NotFound` if the entity never existed; `NotFoundAtTime` if it
    /// exists but has no recorded state at or before `at_nanos`.
    pub fn get_as_of(&self, id: &str, at_nanos: i64) -> Result<Entity> {
        let current = self.inner.get(id)?;
        let tags = self
            .inner
            .temporal_index
            .get_as_of(id, at_nanos)
            .ok_or_else(|| EntityError::not_found_at_time(id, at_nanos))?;
        Ok(Entity { tags, ..current })
    }

    /// Every `(timestamp, tags)` snapshot recorded for an entity,
    /// newest first, capped at `limit` if nonzero.
    pub fn get_history(&self, id: &str, limit: usize) -> Vec<(i64, Vec<String>)> {
        let mut history = self.inner.temporal_index.get_history(id);
        history.reverse();
        if limit > 0 {
            history.truncate(limit);
        }
        history
    }

    /// Every entity id touched within `[t1, t2]`.
    pub fn find_in_range(&self, t1: i64, t2: i64) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.temporal_index.find_in_range(t1, t2).into_iter().collect();
        ids.sort();
        ids
    }

    /// Tags added and removed between two points in an entity's
    /// history.
    pub fn diff(&self, id: &str, t1: i64, t2: i64) -> TagDiff {
        self.inner.temporal_index.diff(id, t1, t2)
    }

    /// Force an immediate checkpoint, independent of the op-count
    /// threshold.
    pub fn checkpoint(&self) -> Result<()> {
        self.inner.run_checkpoint()
    }

    /// A snapshot of repository-wide counters.
    pub fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            entity_count: self.inner.data_file.entity_count(),
            tag_count: self.inner.tag_index.tag_count(),
            cache_entries: self.inner.cache.len(),
            cache_memory_bytes: self.inner.cache.memory_bytes(),
            wal_size_bytes: self.inner.wal.lock().size(),
            file_size_bytes: self.inner.data_file.file_size()?,
            checkpoint_state: self.inner.checkpoint.state(),
        })
    }

    /// Run every corruption check without repairing anything.
    pub fn verify_index_health(&self) -> ScanReport {
        self.detector.scan(&self.inner.scan_inputs())
    }

    /// Rebuild the tag index, dataset partitions, bloom filter, and
    /// skip list from the live entity data, then re-persist the tag
    /// index sidecar. The temporal index can only be seeded with each
    /// entity's current tags as of now; history recorded before this
    /// repair is not recoverable from the data file alone.
    pub fn repair_index(&self) -> Result<()> {
        self.inner.rebuild_secondary_indexes()
    }

    /// Stop background tasks and block until the write queue drains.
    pub fn shutdown(&self, timeout: Duration) {
        if let Some(background) = self.background.lock().take() {
            background.stop(timeout);
        }
    }
}

impl DirectRepository for Repository {
    fn create(&self, entity: Entity) -> Result<()> {
        Repository::create(self, entity)
    }

    fn get(&self, id: &str) -> Result<Entity> {
        Repository::get(self, id)
    }

    fn list_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        Ok(Repository::list_by_tag(self, tag))
    }

    fn add_tag(&self, id: &str, tag: &str) -> Result<()> {
        Repository::add_tag(self, id, tag)
    }
}

impl RepoInner {
    fn get(&self, id: &str) -> Result<Entity> {
        let _entity_guard = self.locks.lock_entity(id);
        let _file_guard = self.locks.read_file();

        if !self.bloom.lock().contains(id.as_bytes()) {
            return Err(EntityError::not_found(id));
        }
        if let Some(cached) = self.cache.get(id) {
            if self.cache_is_fresh(id) {
                return Ok(cached);
            }
            self.cache.invalidate(id);
        }

        let entry = self.data_file.lookup(id).ok_or_else(|| EntityError::not_found(id))?;
        let mut reader = self.reader_pool.acquire()?;
        let entity = self.data_file.decode_block_via(id, &entry, &mut reader)?;
        self.cache.put(id, entity.clone(), entity.content.len() as u64);
        self.cache_put_at.insert(id.to_string(), Instant::now());
        Ok(entity)
    }

    fn cache_is_fresh(&self, id: &str) -> bool {
        if self.config.cache_ttl.is_zero() {
            return true;
        }
        match self.cache_put_at.get(id) {
            Some(put_at) => put_at.elapsed() < self.config.cache_ttl,
            None => true,
        }
    }

    /// The tag index to query against for a tag set: the owning
    /// dataset's partitioned index if dataset isolation is on and one
    /// of `tags` selects a dataset, otherwise the global index.
    fn resolve_tag_index_for_set<'a>(&'a self, tags: &[String]) -> TagIndexRef<'a> {
        if self.config.dataset_isolation {
            if let Some(dataset_tag) = tags.iter().find(|t| t.starts_with(TAG_DATASET_PREFIX)) {
                let name = &dataset_tag[TAG_DATASET_PREFIX.len()..];
                if let Some(entry) = self.dataset_indexes.get(name) {
                    return TagIndexRef::Owned(Arc::clone(entry.value()));
                }
            }
        }
        TagIndexRef::Borrowed(&self.tag_index)
    }

    fn apply(&self, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::Create(entity) => self.apply_create(entity),
            WriteOp::Update(entity) => self.apply_update(entity),
            WriteOp::Delete(id) => self.apply_delete(id),
            WriteOp::AddTag { id, tag } => self.apply_add_tag(id, tag),
            WriteOp::RemoveTag { id, tag } => self.apply_remove_tag(id, tag),
            WriteOp::Checkpoint => self.run_checkpoint(),
            WriteOp::Flush => Ok(()),
        }
    }

    fn apply_create(&self, entity: &Entity) -> Result<()> {
        {
            let _write_guard = self.locks.acquire_write();
            let _entity_guard = self.locks.lock_entity(&entity.id);
            if self.data_file.lookup(&entity.id).is_some() {
                return Err(EntityError::already_exists(&entity.id));
            }
            self.append_wal(WalOp::Create, entity)?;
            self.data_file.append_entity(entity)?;
            self.reindex_tags(&[], &entity.tags, &entity.id);
            self.record_version(entity);
        }
        self.maybe_checkpoint()
    }

    fn apply_update(&self, entity: &Entity) -> Result<()> {
        {
            let _write_guard = self.locks.acquire_write();
            let _entity_guard = self.locks.lock_entity(&entity.id);
            let old = self.require_current(&entity.id)?;
            self.append_wal(WalOp::Update, entity)?;
            self.data_file.append_entity(entity)?;
            self.reindex_tags(&old.tags, &entity.tags, &entity.id);
            self.record_version(entity);
        }
        self.maybe_checkpoint()
    }

    fn apply_delete(&self, id: &str) -> Result<()> {
        {
            let _write_guard = self.locks.acquire_write();
            let _entity_guard = self.locks.lock_entity(id);
            let old = self.require_current(id)?;
            let now = entity_core::now_nanos();
            self.wal.lock().append(&WalRecord::delete(id, now))?;
            self.data_file.remove(id);
            self.reindex_tags(&old.tags, &[], id);
            self.skiplist.delete(&old.updated_at, id);
            self.cache.invalidate(id);
            self.cache_put_at.remove(id);
            self.checkpoint.advance_wal_sequence();
        }
        self.maybe_checkpoint()
    }

    fn apply_add_tag(&self, id: &str, tag: &str) -> Result<()> {
        {
            let _write_guard = self.locks.acquire_write();
            let _entity_guard = self.locks.lock_entity(id);
            let old = self.require_current(id)?;
            if old.logical_tags().contains(&tag) {
                return Ok(());
            }
            let mut updated = old.clone();
            updated.tags.push(tag.to_string());
            updated.updated_at = entity_core::now_nanos();
            self.append_wal(WalOp::Update, &updated)?;
            self.data_file.append_entity(&updated)?;
            self.reindex_tags(&old.tags, &updated.tags, id);
            self.record_version(&updated);
        }
        self.maybe_checkpoint()
    }

    fn apply_remove_tag(&self, id: &str, tag: &str) -> Result<()> {
        {
            let _write_guard = self.locks.acquire_write();
            let _entity_guard = self.locks.lock_entity(id);
            let old = self.require_current(id)?;
            if !old.logical_tags().contains(&tag) {
                return Ok(());
            }
            let mut updated = old.clone();
            updated.tags.retain(|t| entity_core::types::split_temporal_prefix(t).1 != tag);
            updated.updated_at = entity_core::now_nanos();
            self.append_wal(WalOp::Update, &updated)?;
            self.data_file.append_entity(&updated)?;
            self.reindex_tags(&old.tags, &updated.tags, id);
            self.record_version(&updated);
        }
        self.maybe_checkpoint()
    }

    fn require_current(&self, id: &str) -> Result<Entity> {
        let entry = self.data_file.lookup(id).ok_or_else(|| EntityError::not_found(id))?;
        self.data_file.decode_block(id, &entry)
    }

    fn append_wal(&self, op: WalOp, entity: &Entity) -> Result<()> {
        let block = encode_entity(entity, &self.data_file.dictionary(), self.codec.as_ref());
        self.wal.lock().append(&WalRecord::mutation(op, &entity.id, entity.updated_at, block))?;
        self.checkpoint.advance_wal_sequence();
        Ok(())
    }

    fn record_version(&self, entity: &Entity) {
        self.temporal_index.record(&entity.id, entity.updated_at, entity.tags.clone());
        self.cache.put(&entity.id, entity.clone(), entity.content.len() as u64);
        self.cache_put_at.insert(entity.id.clone(), Instant::now());
        self.bloom.lock().insert(entity.id.as_bytes());
        self.skiplist.insert(entity.updated_at, entity.id.clone());
    }

    /// Update every logical-tag membership that changed between the old
    /// and new tag sets: the global tag index, plus the owning
    /// dataset's partitioned index when dataset isolation is on.
    fn reindex_tags(&self, old_tags: &[String], new_tags: &[String], id: &str) {
        let old_logical: Vec<&str> = old_tags.iter().map(|t| entity_core::types::split_temporal_prefix(t).1).collect();
        let new_logical: Vec<&str> = new_tags.iter().map(|t| entity_core::types::split_temporal_prefix(t).1).collect();

        let old_dataset_index = if self.config.dataset_isolation {
            self.dataset_index_for(&old_logical)
        } else {
            None
        };
        for tag in &old_logical {
            if !new_logical.contains(tag) {
                self.tag_index.remove(tag, id);
                if let Some(idx) = &old_dataset_index {
                    idx.remove(tag, id);
                }
            }
        }
        for tag in &new_logical {
            if !old_logical.contains(tag) {
                self.tag_index.add(tag, id);
            }
        }

        if self.config.dataset_isolation {
            if let Some(dataset_index) = self.dataset_index_for(&new_logical) {
                for tag in &new_logical {
                    dataset_index.add(tag, id);
                }
            }
        }
    }

    fn dataset_index_for(&self, logical_tags: &[&str]) -> Option<Arc<TagIndex>> {
        let name = logical_tags
            .iter()
            .find_map(|t| t.strip_prefix(TAG_DATASET_PREFIX))?;
        Some(Arc::clone(
            self.dataset_indexes.entry(name.to_string()).or_insert_with(|| Arc::new(TagIndex::new())).value(),
        ))
    }

    fn maybe_checkpoint(&self) -> Result<()> {
        let count = self.write_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.config.checkpoint_ops {
            self.run_checkpoint()?;
        }
        Ok(())
    }

    fn run_checkpoint(&self) -> Result<()> {
        let _checkpoint_guard = self.locks.acquire_checkpoint();
        let _file_guard = self.locks.write_file();

        let entity_count = self.data_file.entity_count();
        let now = entity_core::now_nanos();
        self.checkpoint.checkpoint(
            entity_count,
            |_snapshot| self.data_file.checkpoint_commit(now),
            |old_header| self.data_file.checkpoint_restore(old_header),
        )?;
        self.wal.lock().truncate()?;
        self.write_count.store(0, Ordering::SeqCst);
        self.tag_index.save_sidecar(&self.tag_index_sidecar_path)?;
        info!(entity_count, "checkpoint complete");
        Ok(())
    }

    fn rotate_wal(&self) -> Result<()> {
        let now = entity_core::now_nanos();
        rotate_with_callbacks(
            || self.run_checkpoint(),
            || self.wal.lock().rotate(now),
            |backup| {
                info!(backup = %backup.display(), "rotated WAL");
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Replay any WAL entries left over from a crash between the last
    /// checkpoint and shutdown, applying each directly (bypassing the
    /// write queue, which doesn't exist yet during `open`).
    fn replay_wal(&self, wal_path: &std::path::Path) -> Result<()> {
        let data = match std::fs::read(wal_path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let report = replay(&data, |record| {
            if let Err(e) = self.apply_replayed(record) {
                warn!(error = %e, id = %record.id, "failed to apply replayed WAL record");
            }
        })?;
        if report.corrupted > 0 {
            warn!(corrupted = report.corrupted, "WAL replay skipped corrupted frames");
        }
        Ok(())
    }

    fn apply_replayed(&self, record: &WalRecord) -> Result<()> {
        match record.op {
            WalOp::Create | WalOp::Update => {
                let entity = decode_entity(
                    &record.id,
                    &record.entity_blob,
                    &self.data_file.dictionary(),
                    self.codec.as_ref(),
                )?;
                let old_tags = match self.data_file.lookup(&entity.id) {
                    Some(entry) => self.data_file.decode_block(&entity.id, &entry).ok().map(|e| e.tags),
                    None => None,
                };
                self.data_file.append_entity(&entity)?;
                self.reindex_tags(old_tags.as_deref().unwrap_or(&[]), &entity.tags, &entity.id);
                self.record_version(&entity);
                Ok(())
            }
            WalOp::Delete => {
                if let Some(entry) = self.data_file.lookup(&record.id) {
                    if let Ok(old) = self.data_file.decode_block(&record.id, &entry) {
                        self.reindex_tags(&old.tags, &[], &record.id);
                    }
                    self.data_file.remove(&record.id);
                }
                Ok(())
            }
            WalOp::Checkpoint => Ok(()),
        }
    }

    /// Seed the bloom filter, skip list, and (if the sidecar didn't
    /// load) the tag index from whatever the data file already holds,
    /// so a fresh process doesn't start with false "not found" answers.
    fn seed_secondary_indexes(&self) {
        if self.tag_index.tag_count() > 0 {
            for id in self.data_file.ids() {
                self.bloom.lock().insert(id.as_bytes());
            }
            return;
        }
        if let Err(e) = self.rebuild_secondary_indexes() {
            warn!(error = %e, "failed to rebuild secondary indexes on open");
        }
    }

    fn rebuild_secondary_indexes(&self) -> Result<()> {
        let now = entity_core::now_nanos();
        for id in self.data_file.ids() {
            let Some(entry) = self.data_file.lookup(&id) else {
                continue;
            };
            let entity = self.data_file.decode_block(&id, &entry)?;
            self.bloom.lock().insert(id.as_bytes());
            self.skiplist.insert(entity.updated_at, id.clone());
            for tag in entity.logical_tags() {
                self.tag_index.add(tag, &id);
            }
            if self.config.dataset_isolation {
                let logical: Vec<&str> = entity.logical_tags();
                if let Some(dataset_index) = self.dataset_index_for(&logical) {
                    for tag in &logical {
                        dataset_index.add(tag, &id);
                    }
                }
            }
            self.temporal_index.record(&id, entity.updated_at.max(now), entity.tags.clone());
        }
        self.tag_index.save_sidecar(&self.tag_index_sidecar_path)?;
        Ok(())
    }

    fn scan_inputs(&self) -> ScanInputs<'_> {
        ScanInputs {
            header: self.checkpoint.header(),
            data_file: &self.data_file,
            tag_index: &self.tag_index,
            wal_size_bytes: self.wal.lock().size(),
            max_wal_bytes: self.config.max_wal_bytes,
            wal_corrupted_frames: 0,
            cache_len: self.cache.len(),
            data_path: self.data_file.path(),
        }
    }
}

enum TagIndexRef<'a> {
    Borrowed(&'a TagIndex),
    Owned(Arc<TagIndex>),
}

impl TagIndexRef<'_> {
    fn list_by_tag(&self, tag: &str) -> Vec<String> {
        match self {
            TagIndexRef::Borrowed(idx) => idx.list_by_tag(tag),
            TagIndexRef::Owned(idx) => idx.list_by_tag(tag),
        }
    }

    fn list_by_tags_all(&self, tags: &[String]) -> Vec<String> {
        match self {
            TagIndexRef::Borrowed(idx) => idx.list_by_tags_all(tags),
            TagIndexRef::Owned(idx) => idx.list_by_tags_all(tags),
        }
    }

    fn list_by_tags_any(&self, tags: &[String]) -> Vec<String> {
        match self {
            TagIndexRef::Borrowed(idx) => idx.list_by_tags_any(tags),
            TagIndexRef::Owned(idx) => idx.list_by_tags_any(tags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig::for_testing(dir)
    }

    fn entity(id: &str, tags: &[&str], content: &[u8]) -> Entity {
        Entity::new(id, tags.iter().map(|t| t.to_string()).collect(), content.to_vec(), entity_core::now_nanos()).unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user", "status:active"], b"alice")).unwrap();

        let got = repo.get("e1").unwrap();
        assert_eq!(got.content, b"alice");
        assert_eq!(got.logical_tags(), vec!["type:user", "status:active"]);
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user"], b"alice")).unwrap();
        let err = repo.create(entity("e1", &["type:user"], b"bob")).unwrap_err();
        assert!(matches!(err, EntityError::AlreadyExists { .. }));
    }

    #[test]
    fn get_missing_entity_is_not_found() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        let err = repo.get("ghost").unwrap_err();
        assert!(matches!(err, EntityError::NotFound { .. }));
    }

    #[test]
    fn list_by_tag_finds_tagged_entities() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user"], b"a")).unwrap();
        repo.create(entity("e2", &["type:user"], b"b")).unwrap();
        repo.create(entity("e3", &["type:order"], b"c")).unwrap();

        let mut users = repo.list_by_tag("type:user");
        users.sort();
        assert_eq!(users, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[test]
    fn update_replaces_tags_and_records_history() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["status:draft"], b"v1")).unwrap();

        let mut updated = repo.get("e1").unwrap();
        updated.tags = vec!["status:published".to_string()];
        updated.content = b"v2".to_vec();
        repo.update(updated).unwrap();

        let current = repo.get("e1").unwrap();
        assert_eq!(current.logical_tags(), vec!["status:published"]);
        assert!(repo.list_by_tag("status:draft").is_empty());
        assert_eq!(repo.list_by_tag("status:published"), vec!["e1".to_string()]);

        let history = repo.get_history("e1", 0);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn get_as_of_returns_historical_tags() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["status:draft"], b"v1")).unwrap();
        let created = repo.get("e1").unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let mut updated = created.clone();
        updated.tags = vec!["status:published".to_string()];
        repo.update(updated).unwrap();

        let as_of_creation = repo.get_as_of("e1", created.updated_at).unwrap();
        assert_eq!(as_of_creation.logical_tags(), vec!["status:draft"]);

        let before_creation = repo.get_as_of("e1", created.created_at - 1);
        assert!(matches!(before_creation, Err(EntityError::NotFoundAtTime { .. })));
    }

    #[test]
    fn delete_removes_entity_and_tag_entries() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user"], b"a")).unwrap();
        repo.delete("e1").unwrap();

        assert!(matches!(repo.get("e1"), Err(EntityError::NotFound { .. })));
        assert!(repo.list_by_tag("type:user").is_empty());
    }

    #[test]
    fn add_tag_then_remove_tag_round_trip() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user"], b"a")).unwrap();

        repo.add_tag("e1", "status:active").unwrap();
        assert_eq!(repo.list_by_tag("status:active"), vec!["e1".to_string()]);

        repo.remove_tag("e1", "status:active").unwrap();
        assert!(repo.list_by_tag("status:active").is_empty());
        assert_eq!(repo.list_by_tag("type:user"), vec!["e1".to_string()]);
    }

    #[test]
    fn add_tag_is_idempotent() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user"], b"a")).unwrap();
        repo.add_tag("e1", "type:user").unwrap();
        assert_eq!(repo.get("e1").unwrap().tags.len(), 1);
    }

    #[test]
    fn list_by_tags_supports_and_or_semantics() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user", "status:active"], b"a")).unwrap();
        repo.create(entity("e2", &["type:user"], b"b")).unwrap();

        let tags = vec!["type:user".to_string(), "status:active".to_string()];
        assert_eq!(repo.list_by_tags(&tags, true), vec!["e1".to_string()]);

        let mut any = repo.list_by_tags(&tags, false);
        any.sort();
        assert_eq!(any, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[test]
    fn dataset_isolation_partitions_tag_queries() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path()).with_dataset_isolation(true)).unwrap();
        repo.create(entity("e1", &["dataset:a", "role:admin"], b"a")).unwrap();
        repo.create(entity("e2", &["dataset:b", "role:admin"], b"b")).unwrap();

        let tags = vec!["dataset:a".to_string(), "role:admin".to_string()];
        assert_eq!(repo.list_by_tags(&tags, true), vec!["e1".to_string()]);
    }

    #[test]
    fn checkpoint_then_reopen_preserves_state() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user"], b"alice")).unwrap();
        repo.checkpoint().unwrap();
        repo.shutdown(Duration::from_secs(1));
        drop(repo);

        let reopened = Repository::open(config(dir.path())).unwrap();
        let got = reopened.get("e1").unwrap();
        assert_eq!(got.content, b"alice");
        assert_eq!(reopened.list_by_tag("type:user"), vec!["e1".to_string()]);
    }

    #[test]
    fn wal_replay_recovers_uncheckpointed_writes() {
        let dir = tempdir().unwrap();
        {
            let repo = Repository::open(config(dir.path())).unwrap();
            repo.create(entity("e1", &["status:draft"], b"v1")).unwrap();
            repo.shutdown(Duration::from_secs(1));
            // No checkpoint: the create only lives in the WAL.
        }

        let reopened = Repository::open(config(dir.path())).unwrap();
        let got = reopened.get("e1").unwrap();
        assert_eq!(got.content, b"v1");
        assert_eq!(reopened.list_by_tag("status:draft"), vec!["e1".to_string()]);
    }

    #[test]
    fn wal_replay_cleans_up_stale_tags_on_updates() {
        let dir = tempdir().unwrap();
        {
            let repo = Repository::open(config(dir.path())).unwrap();
            repo.create(entity("e1", &["status:draft"], b"v1")).unwrap();
            repo.checkpoint().unwrap();

            let mut updated = repo.get("e1").unwrap();
            updated.tags = vec!["status:published".to_string()];
            repo.update(updated).unwrap();
            repo.shutdown(Duration::from_secs(1));
            // The update is only in the WAL; replay must drop the stale
            // "status:draft" tag-index entry, not just add the new one.
        }

        let reopened = Repository::open(config(dir.path())).unwrap();
        assert!(reopened.list_by_tag("status:draft").is_empty());
        assert_eq!(reopened.list_by_tag("status:published"), vec!["e1".to_string()]);
    }

    #[test]
    fn repair_index_rebuilds_from_data_file() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user"], b"a")).unwrap();
        repo.repair_index().unwrap();
        assert_eq!(repo.list_by_tag("type:user"), vec!["e1".to_string()]);
    }

    #[test]
    fn verify_index_health_reports_no_issues_on_a_clean_repo() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user"], b"a")).unwrap();
        let report = repo.verify_index_health();
        assert!(report.issues.is_empty());
    }

    #[test]
    fn stats_reflect_live_counters() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(config(dir.path())).unwrap();
        repo.create(entity("e1", &["type:user"], b"a")).unwrap();
        repo.create(entity("e2", &["type:user"], b"b")).unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.tag_count, 1);
    }
}

