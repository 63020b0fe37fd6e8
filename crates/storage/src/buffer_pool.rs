//! Buffer pool (C2): tiered reusable byte buffers that reduce allocator
//! pressure on the hot write/read paths (§4.2).
//!
//! Three tiers — Hot (≤34 KiB), Warm (34 KiB-1 MiB), Cold (>1 MiB) — each
//! sized on a Fibonacci progression to bound fragmentation. Hot/Warm use a
//! per-size slot array; Cold buffers are shared with reference counting
//! and grow by 2x when undersized.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

const HOT_CEILING: usize = 34 * 1024;
const WARM_CEILING: usize = 1024 * 1024;
const SLOTS_PER_SIZE: usize = 8;

/// Fibonacci-ish size classes used for Hot/Warm tiers, capped at the warm
/// ceiling.
fn size_classes() -> Vec<usize> {
    let mut sizes = vec![256usize, 512];
    while *sizes.last().unwrap() < WARM_CEILING {
        let next = sizes[sizes.len() - 1] + sizes[sizes.len() - 2];
        sizes.push(next);
    }
    sizes
}

struct SizeClassPool {
    size: usize,
    slots: Mutex<Vec<Vec<u8>>>,
}

/// A pooled byte buffer. On drop it is NOT automatically returned (the
/// caller must call [`BufferPool::put`]) to keep ownership explicit on the
/// hot path, matching the reader/writer handle-scoping contract elsewhere
/// in this engine.
pub type PooledBuffer = Vec<u8>;

/// Tiered buffer pool (§4.2).
pub struct BufferPool {
    classes: Vec<SizeClassPool>,
    cold: Mutex<Vec<Vec<u8>>>,
    hot_hits: AtomicU64,
    warm_hits: AtomicU64,
    cold_hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferPool {
    /// Construct an empty pool; slots are populated lazily on first use.
    pub fn new() -> Self {
        let classes = size_classes()
            .into_iter()
            .map(|size| SizeClassPool {
                size,
                slots: Mutex::new(Vec::new()),
            })
            .collect();
        BufferPool {
            classes,
            cold: Mutex::new(Vec::new()),
            hot_hits: AtomicU64::new(0),
            warm_hits: AtomicU64::new(0),
            cold_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Acquire a buffer with capacity at least `size`.
    pub fn get(&self, size: usize) -> PooledBuffer {
        if size > WARM_CEILING {
            if let Some(buf) = self.cold.lock().pop() {
                self.cold_hits.fetch_add(1, Ordering::Relaxed);
                if buf.capacity() >= size {
                    return buf;
                }
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Vec::with_capacity((size * 2).max(WARM_CEILING));
        }

        for class in &self.classes {
            if class.size >= size {
                if let Some(buf) = class.slots.lock().pop() {
                    if size <= HOT_CEILING {
                        self.hot_hits.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.warm_hits.fetch_add(1, Ordering::Relaxed);
                    }
                    return buf;
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Vec::with_capacity(class.size);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(size)
    }

    /// Return a buffer to the pool. Contents are zeroed to avoid leaking
    /// a previous caller's data to the next one.
    pub fn put(&self, mut buf: PooledBuffer) {
        buf.clear();
        buf.resize(buf.capacity(), 0);
        buf.clear();

        let cap = buf.capacity();
        if cap > WARM_CEILING {
            let mut cold = self.cold.lock();
            if cold.len() < SLOTS_PER_SIZE {
                cold.push(buf);
            }
            return;
        }
        for class in &self.classes {
            if class.size >= cap {
                let mut slots = class.slots.lock();
                if slots.len() < SLOTS_PER_SIZE {
                    slots.push(buf);
                }
                return;
            }
        }
    }

    /// Snapshot of tier hit/miss counters, used by a background sampler
    /// to decide whether the hot tier dominates usage.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            hot_hits: self.hot_hits.load(Ordering::Relaxed),
            warm_hits: self.warm_hits.load(Ordering::Relaxed),
            cold_hits: self.cold_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Hit/miss counters for the three tiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    /// Hits served from the Hot tier.
    pub hot_hits: u64,
    /// Hits served from the Warm tier.
    pub warm_hits: u64,
    /// Hits served from the Cold tier.
    pub cold_hits: u64,
    /// Requests that allocated fresh because no slot was free.
    pub misses: u64,
}

impl BufferPoolStats {
    /// `true` once the hot tier accounts for most served requests, the
    /// signal a background sampler uses to favor hot-tier fast paths.
    pub fn hot_dominates(&self) -> bool {
        let total = self.hot_hits + self.warm_hits + self.cold_hits + self.misses;
        total > 0 && self.hot_hits * 2 > total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_capacity_at_least_requested() {
        let pool = BufferPool::new();
        let buf = pool.get(1000);
        assert!(buf.capacity() >= 1000);
    }

    #[test]
    fn reuses_buffers_across_get_put() {
        let pool = BufferPool::new();
        let buf = pool.get(500);
        let cap = buf.capacity();
        pool.put(buf);
        let buf2 = pool.get(500);
        assert_eq!(buf2.capacity(), cap);
        assert!(pool.stats().hot_hits >= 1);
    }

    #[test]
    fn put_zeroes_contents() {
        let pool = BufferPool::new();
        let mut buf = pool.get(64);
        buf.extend_from_slice(b"secret data");
        pool.put(buf);
        let recycled = pool.get(64);
        assert!(recycled.is_empty(), "put() must clear length");
    }

    #[test]
    fn cold_tier_used_above_warm_ceiling() {
        let pool = BufferPool::new();
        let buf = pool.get(WARM_CEILING + 1);
        assert!(buf.capacity() > WARM_CEILING);
    }
}
