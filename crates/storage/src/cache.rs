//! Entity cache (C11): bounded in-memory LRU with a byte-size cap and
//! load-shedding under memory pressure (§4.10).
//!
//! Two independent caps bound the cache: an entry count and an
//! estimated memory footprint (the caller supplies each entry's size,
//! e.g. `entity.content.len()`). Entries accessed often enough
//! (`access_count > 100`) get one second chance when they reach the
//! front of the eviction queue instead of being evicted immediately,
//! approximating a clock/second-chance policy without a full clock
//! hand. [`EntityCache::apply_pressure`] is driven by a background
//! sampler reporting system memory pressure in `[0.0, 1.0]`.

use entity_core::limits::{
    DEFAULT_ENTITY_CACHE_MEMORY_LIMIT, DEFAULT_ENTITY_CACHE_SIZE, ENTITY_CACHE_MIN_ENTRIES,
    ENTITY_CACHE_MIN_MEMORY,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

const SECOND_CHANCE_THRESHOLD: u64 = 100;

struct Entry<V> {
    value: V,
    size_bytes: u64,
    access_count: u64,
    second_chance: bool,
}

struct Inner<V> {
    entries: FxHashMap<String, Entry<V>>,
    order: VecDeque<String>,
    max_entries: usize,
    max_memory: u64,
}

/// A bounded LRU cache of entities (or any cloneable value), with
/// pressure-driven shrinking.
pub struct EntityCache<V: Clone> {
    inner: RwLock<Inner<V>>,
    current_memory: AtomicU64,
    on_evict: Option<Box<dyn Fn(&str, &V) + Send + Sync>>,
}

impl<V: Clone> EntityCache<V> {
    /// A cache with the default caps (§6.4).
    pub fn new() -> Self {
        Self::with_caps(DEFAULT_ENTITY_CACHE_SIZE, DEFAULT_ENTITY_CACHE_MEMORY_LIMIT)
    }

    /// A cache with explicit entry and memory caps.
    pub fn with_caps(max_entries: usize, max_memory: u64) -> Self {
        EntityCache {
            inner: RwLock::new(Inner {
                entries: FxHashMap::default(),
                order: VecDeque::new(),
                max_entries,
                max_memory,
            }),
            current_memory: AtomicU64::new(0),
            on_evict: None,
        }
    }

    /// Attach a callback invoked with `(id, value)` whenever an entry is
    /// evicted (used to emit metrics or logging).
    pub fn with_eviction_callback(mut self, cb: impl Fn(&str, &V) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Box::new(cb));
        self
    }

    /// Fetch a value, bumping its recency and access count.
    pub fn get(&self, id: &str) -> Option<V> {
        let mut inner = self.inner.write();
        let value = {
            let entry = inner.entries.get_mut(id)?;
            entry.access_count += 1;
            if entry.access_count > SECOND_CHANCE_THRESHOLD {
                entry.second_chance = true;
            }
            entry.value.clone()
        };
        inner.order.retain(|k| k != id);
        inner.order.push_back(id.to_string());
        Some(value)
    }

    /// Insert or replace a value, evicting the least-recently-used
    /// entries if the caps are exceeded.
    pub fn put(&self, id: &str, value: V, size_bytes: u64) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.entries.remove(id) {
            self.current_memory.fetch_sub(old.size_bytes, Ordering::Relaxed);
            inner.order.retain(|k| k != id);
        }
        inner.entries.insert(
            id.to_string(),
            Entry {
                value,
                size_bytes,
                access_count: 0,
                second_chance: false,
            },
        );
        inner.order.push_back(id.to_string());
        self.current_memory.fetch_add(size_bytes, Ordering::Relaxed);
        self.evict_to_caps(&mut inner);
    }

    /// Remove an entry, if present.
    pub fn invalidate(&self, id: &str) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.remove(id) {
            self.current_memory.fetch_sub(entry.size_bytes, Ordering::Relaxed);
            inner.order.retain(|k| k != id);
        }
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated memory footprint of cached entries.
    pub fn memory_bytes(&self) -> u64 {
        self.current_memory.load(Ordering::Relaxed)
    }

    fn evict_one(&self, inner: &mut Inner<V>) -> bool {
        while let Some(candidate) = inner.order.pop_front() {
            let Some(entry) = inner.entries.get_mut(&candidate) else {
                continue;
            };
            if entry.second_chance {
                entry.second_chance = false;
                inner.order.push_back(candidate);
                continue;
            }
            let removed = inner.entries.remove(&candidate).unwrap();
            self.current_memory.fetch_sub(removed.size_bytes, Ordering::Relaxed);
            if let Some(cb) = &self.on_evict {
                cb(&candidate, &removed.value);
            }
            return true;
        }
        false
    }

    fn evict_to_caps(&self, inner: &mut Inner<V>) {
        while inner.entries.len() > inner.max_entries
            || self.current_memory.load(Ordering::Relaxed) > inner.max_memory
        {
            if !self.evict_one(inner) {
                break;
            }
        }
    }

    /// Respond to a background memory-pressure sample in `[0.0, 1.0]`:
    /// evict up to `0.4 * pressure * len()` entries, and if pressure
    /// exceeds 0.9 permanently shrink the caps by 30% (never below the
    /// configured floors) so the cache stops re-growing into the same
    /// pressure immediately afterward.
    pub fn apply_pressure(&self, pressure: f64) {
        let pressure = pressure.clamp(0.0, 1.0);
        let mut inner = self.inner.write();
        let to_evict = (0.4 * pressure * inner.entries.len() as f64).ceil() as usize;
        for _ in 0..to_evict {
            if !self.evict_one(&mut inner) {
                break;
            }
        }
        if pressure > 0.9 {
            inner.max_entries = ((inner.max_entries as f64 * 0.7) as usize).max(ENTITY_CACHE_MIN_ENTRIES);
            inner.max_memory = ((inner.max_memory as f64 * 0.7) as u64).max(ENTITY_CACHE_MIN_MEMORY);
            self.evict_to_caps(&mut inner);
        }
    }
}

impl<V: Clone> Default for EntityCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn put_then_get_round_trips() {
        let cache: EntityCache<String> = EntityCache::with_caps(10, 1024);
        cache.put("e1", "hello".to_string(), 5);
        assert_eq!(cache.get("e1"), Some("hello".to_string()));
    }

    #[test]
    fn evicts_lru_when_entry_cap_exceeded() {
        let cache: EntityCache<u32> = EntityCache::with_caps(2, u64::MAX);
        cache.put("a", 1, 1);
        cache.put("b", 2, 1);
        cache.put("c", 3, 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn frequently_accessed_entry_survives_one_eviction_pass() {
        let cache: EntityCache<u32> = EntityCache::with_caps(2, u64::MAX);
        cache.put("hot", 1, 1);
        for _ in 0..=SECOND_CHANCE_THRESHOLD {
            cache.get("hot");
        }
        cache.put("b", 2, 1);
        cache.put("c", 3, 1);
        assert!(cache.get("hot").is_some());
    }

    #[test]
    fn memory_cap_triggers_eviction() {
        let cache: EntityCache<u32> = EntityCache::with_caps(100, 10);
        cache.put("a", 1, 6);
        cache.put("b", 2, 6);
        assert!(cache.memory_bytes() <= 10);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn eviction_callback_is_invoked() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let cache: EntityCache<u32> =
            EntityCache::with_caps(1, u64::MAX).with_eviction_callback(move |_, _| {
                count2.fetch_add(1, Ordering::Relaxed);
            });
        cache.put("a", 1, 1);
        cache.put("b", 2, 1);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn pressure_shrinks_caps_above_threshold() {
        let cache: EntityCache<u32> = EntityCache::with_caps(10_000, DEFAULT_ENTITY_CACHE_MEMORY_LIMIT);
        for i in 0..500 {
            cache.put(&format!("e{i}"), i, 1);
        }
        cache.apply_pressure(0.95);
        assert!(cache.inner.read().max_entries < 10_000);
    }
}
