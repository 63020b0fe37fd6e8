//! Temporal index (C8): per-entity tag timelines and time-bucketed
//! lookup (§4.7).
//!
//! Every tag write is recorded against the entity's sorted timestamp
//! timeline (`ts -> tags present as of that point`) and against an
//! hourly bucket (`bucket_id -> entity ids touched in that hour`), so
//! as-of queries can binary search a single entity's timeline while
//! range queries can skip buckets outside the requested window.

use entity_core::limits::DEFAULT_TEMPORAL_BUCKET_NANOS;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};

const AS_OF_CACHE_CAPACITY: usize = 4096;

struct Inner {
    timelines: FxHashMap<String, BTreeMap<i64, Vec<String>>>,
    buckets: FxHashMap<i64, FxHashSet<String>>,
    bucket_width: i64,
}

/// Bounded cache of as-of lookups, keyed by `(entity_id, timestamp)`.
/// Eviction is plain FIFO: as-of results are cheap to recompute and the
/// workload is dominated by repeated reads of recent timestamps, so
/// strict recency tracking isn't worth its bookkeeping cost here.
struct AsOfCache {
    capacity: usize,
    order: VecDeque<(String, i64)>,
    entries: FxHashMap<(String, i64), Vec<String>>,
}

impl AsOfCache {
    fn new(capacity: usize) -> Self {
        AsOfCache {
            capacity,
            order: VecDeque::new(),
            entries: FxHashMap::default(),
        }
    }

    fn get(&self, key: &(String, i64)) -> Option<Vec<String>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: (String, i64), value: Vec<String>) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
            if self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
    }

    fn invalidate_entity(&mut self, entity_id: &str) {
        self.entries.retain(|(id, _), _| id != entity_id);
        self.order.retain(|(id, _)| id != entity_id);
    }
}

/// Tracks which tags an entity carried at each point in time (§4.7).
pub struct TemporalIndex {
    inner: RwLock<Inner>,
    cache: RwLock<AsOfCache>,
}

impl TemporalIndex {
    /// An empty index with the default hourly bucket width.
    pub fn new() -> Self {
        Self::with_bucket_width(DEFAULT_TEMPORAL_BUCKET_NANOS)
    }

    /// An empty index with a custom bucket width, in nanoseconds.
    pub fn with_bucket_width(bucket_width_nanos: i64) -> Self {
        TemporalIndex {
            inner: RwLock::new(Inner {
                timelines: FxHashMap::default(),
                buckets: FxHashMap::default(),
                bucket_width: bucket_width_nanos,
            }),
            cache: RwLock::new(AsOfCache::new(AS_OF_CACHE_CAPACITY)),
        }
    }

    /// Record that, as of `ts_nanos`, `entity_id` carries `tags`.
    /// Invalidates any cached as-of result for the entity, since a new
    /// write can change the answer for as-of queries at or after this
    /// point.
    pub fn record(&self, entity_id: &str, ts_nanos: i64, tags: Vec<String>) {
        let mut inner = self.inner.write();
        let bucket_width = inner.bucket_width;
        inner
            .timelines
            .entry(entity_id.to_string())
            .or_default()
            .insert(ts_nanos, tags);
        let bucket_id = ts_nanos.div_euclid(bucket_width);
        inner
            .buckets
            .entry(bucket_id)
            .or_default()
            .insert(entity_id.to_string());
        drop(inner);
        self.cache.write().invalidate_entity(entity_id);
    }

    /// The tags `entity_id` carried as of `ts_nanos`: the most recent
    /// recorded snapshot at or before that timestamp, or `None` if the
    /// entity has no history at or before it.
    pub fn get_as_of(&self, entity_id: &str, ts_nanos: i64) -> Option<Vec<String>> {
        let key = (entity_id.to_string(), ts_nanos);
        if let Some(hit) = self.cache.read().get(&key) {
            return Some(hit);
        }
        let inner = self.inner.read();
        let timeline = inner.timelines.get(entity_id)?;
        let snapshot = timeline.range(..=ts_nanos).next_back().map(|(_, tags)| tags.clone());
        drop(inner);
        if let Some(tags) = &snapshot {
            self.cache.write().put(key, tags.clone());
        }
        snapshot
    }

    /// Every entity id touched in `[from_nanos, to_nanos]`, derived from
    /// the bucket index so whole hours outside the window are skipped.
    pub fn find_in_range(&self, from_nanos: i64, to_nanos: i64) -> FxHashSet<String> {
        let inner = self.inner.read();
        let bucket_width = inner.bucket_width;
        let lo = from_nanos.div_euclid(bucket_width);
        let hi = to_nanos.div_euclid(bucket_width);
        let mut out = FxHashSet::default();
        for bucket_id in lo..=hi {
            if let Some(ids) = inner.buckets.get(&bucket_id) {
                for id in ids {
                    if let Some(timeline) = inner.timelines.get(id) {
                        if timeline.range(from_nanos..=to_nanos).next().is_some() {
                            out.insert(id.clone());
                        }
                    }
                }
            }
        }
        out
    }

    /// The full ordered `(timestamp, tags)` history recorded for an
    /// entity.
    pub fn get_history(&self, entity_id: &str) -> Vec<(i64, Vec<String>)> {
        let inner = self.inner.read();
        inner
            .timelines
            .get(entity_id)
            .map(|t| t.iter().map(|(ts, tags)| (*ts, tags.clone())).collect())
            .unwrap_or_default()
    }

    /// Tags added and removed between two snapshots of an entity's
    /// history.
    pub fn diff(&self, entity_id: &str, from_nanos: i64, to_nanos: i64) -> TagDiff {
        let before = self.get_as_of(entity_id, from_nanos).unwrap_or_default();
        let after = self.get_as_of(entity_id, to_nanos).unwrap_or_default();
        let before_set: FxHashSet<&String> = before.iter().collect();
        let after_set: FxHashSet<&String> = after.iter().collect();
        TagDiff {
            added: after.iter().filter(|t| !before_set.contains(t)).cloned().collect(),
            removed: before.iter().filter(|t| !after_set.contains(t)).cloned().collect(),
        }
    }
}

impl Default for TemporalIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Tags added and removed between two points in an entity's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Tags present after but not before.
    pub added: Vec<String>,
    /// Tags present before but not after.
    pub removed: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_of_returns_most_recent_snapshot_at_or_before() {
        let idx = TemporalIndex::new();
        idx.record("e1", 100, vec!["type:a".into()]);
        idx.record("e1", 200, vec!["type:b".into()]);
        assert_eq!(idx.get_as_of("e1", 150), Some(vec!["type:a".to_string()]));
        assert_eq!(idx.get_as_of("e1", 200), Some(vec!["type:b".to_string()]));
        assert_eq!(idx.get_as_of("e1", 50), None);
    }

    #[test]
    fn find_in_range_uses_bucket_skip() {
        let idx = TemporalIndex::with_bucket_width(1000);
        idx.record("e1", 500, vec!["a".into()]);
        idx.record("e2", 50_000, vec!["b".into()]);
        let found = idx.find_in_range(0, 1000);
        assert!(found.contains("e1"));
        assert!(!found.contains("e2"));
    }

    #[test]
    fn history_is_ordered_by_timestamp() {
        let idx = TemporalIndex::new();
        idx.record("e1", 200, vec!["b".into()]);
        idx.record("e1", 100, vec!["a".into()]);
        let history = idx.get_history("e1");
        assert_eq!(history[0].0, 100);
        assert_eq!(history[1].0, 200);
    }

    #[test]
    fn diff_reports_added_and_removed_tags() {
        let idx = TemporalIndex::new();
        idx.record("e1", 100, vec!["a".into(), "b".into()]);
        idx.record("e1", 200, vec!["b".into(), "c".into()]);
        let diff = idx.diff("e1", 100, 200);
        assert_eq!(diff.added, vec!["c".to_string()]);
        assert_eq!(diff.removed, vec!["a".to_string()]);
    }

    #[test]
    fn new_write_invalidates_cached_as_of() {
        let idx = TemporalIndex::new();
        idx.record("e1", 100, vec!["a".into()]);
        assert_eq!(idx.get_as_of("e1", 150), Some(vec!["a".to_string()]));
        idx.record("e1", 120, vec!["a".into(), "b".into()]);
        assert_eq!(idx.get_as_of("e1", 150), Some(vec!["a".to_string(), "b".to_string()]));
    }
}
