//! Bloom filter (C9): probabilistic existence test for tag/id lookup
//! (§4.8).
//!
//! `m = ceil(-n*ln(p) / ln2^2)`, `k = ceil((m/n)*ln2)`, `m` rounded up to a
//! multiple of 64. Two 64-bit FNV-1a hashes (one salted) are combined via
//! `h_i = h1 + i*h2` (the standard Kirsch-Mitzenmacher double-hashing
//! scheme), so no false negatives are possible and the false-positive
//! rate tracks the configured target.

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;
const SALT: u64 = 0x9e3779b97f4a7c15;

fn fnv1a(data: &[u8], salt: u64) -> u64 {
    let mut hash = FNV_OFFSET ^ salt;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A bloom filter sized for `n` expected items at a target false-positive
/// rate `p`.
pub struct BloomFilter {
    bits: Vec<u64>,
    m: u64,
    k: u32,
}

impl BloomFilter {
    /// Construct a filter sized for `expected_items` at `target_fpp`
    /// (e.g. 0.01 for 1%).
    pub fn new(expected_items: usize, target_fpp: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = target_fpp.clamp(1e-6, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let mut m = (-n * p.ln() / (ln2 * ln2)).ceil() as u64;
        m = m.max(64);
        m = m.div_ceil(64) * 64; // round up to a multiple of 64

        let k = ((m as f64 / n) * ln2).ceil().max(1.0) as u32;

        BloomFilter {
            bits: vec![0u64; (m / 64) as usize],
            m,
            k,
        }
    }

    fn indices(&self, data: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let h1 = fnv1a(data, 0);
        let h2 = fnv1a(data, SALT);
        (0..self.k as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.m)
    }

    /// Insert an item. Never removable; bloom filters only grow.
    pub fn insert(&mut self, data: &[u8]) {
        for idx in self.indices(data).collect::<Vec<_>>() {
            self.bits[(idx / 64) as usize] |= 1 << (idx % 64);
        }
    }

    /// Test membership. `false` is authoritative (no false negatives);
    /// `true` may be a false positive at the configured rate.
    pub fn contains(&self, data: &[u8]) -> bool {
        self.indices(data)
            .all(|idx| self.bits[(idx / 64) as usize] & (1 << (idx % 64)) != 0)
    }

    /// Clear all bits, resetting the filter to empty.
    pub fn reset(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
    }

    /// Number of bits allocated.
    pub fn num_bits(&self) -> u64 {
        self.m
    }

    /// Number of hash functions used per item.
    pub fn num_hashes(&self) -> u32 {
        self.k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let mut filter = BloomFilter::new(1000, 0.01);
        for i in 0..1000 {
            filter.insert(format!("item-{i}").as_bytes());
        }
        for i in 0..1000 {
            assert!(filter.contains(format!("item-{i}").as_bytes()));
        }
    }

    #[test]
    fn reset_clears_membership() {
        let mut filter = BloomFilter::new(100, 0.01);
        filter.insert(b"present");
        assert!(filter.contains(b"present"));
        filter.reset();
        assert!(!filter.contains(b"present"));
    }

    #[test]
    fn bit_count_is_multiple_of_64() {
        let filter = BloomFilter::new(37, 0.05);
        assert_eq!(filter.num_bits() % 64, 0);
    }

    #[test]
    fn false_positive_rate_is_roughly_bounded() {
        let mut filter = BloomFilter::new(2000, 0.01);
        for i in 0..2000 {
            filter.insert(format!("known-{i}").as_bytes());
        }
        let mut false_positives = 0;
        let trials = 5000;
        for i in 0..trials {
            if filter.contains(format!("unknown-{i}").as_bytes()) {
                false_positives += 1;
            }
        }
        let rate = false_positives as f64 / trials as f64;
        assert!(rate < 0.05, "observed fpp {rate} far exceeds 1% target");
    }
}
