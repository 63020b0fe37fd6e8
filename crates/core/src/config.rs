//! Typed, validated configuration (spec §6.4).
//!
//! Loading this from a file or CLI flags is out of scope (§1); embedders
//! construct an [`EngineConfig`] programmatically, following the builder
//! idiom used elsewhere in this codebase for per-instance configuration.

use crate::limits::*;
use std::path::PathBuf;
use std::time::Duration;

/// Every recognized configuration option from spec §6.4.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory containing data/WAL/index files.
    pub data_path: PathBuf,
    /// Hard cap per entity content size.
    pub max_entity_size: u64,
    /// WAL rotation size threshold.
    pub max_wal_bytes: u64,
    /// WAL rotation age trigger.
    pub max_wal_age_minutes: u64,
    /// Minimum reader pool handles.
    pub reader_pool_min: usize,
    /// Maximum reader pool handles.
    pub reader_pool_max: usize,
    /// Reader pool acquisition timeout.
    pub reader_acquire_timeout: Duration,
    /// Max entity cache entries.
    pub entity_cache_size: usize,
    /// Max entity cache bytes.
    pub entity_cache_memory_limit: u64,
    /// Minimum content size to compress.
    pub compression_threshold: usize,
    /// Ops between auto-checkpoints.
    pub checkpoint_ops: u64,
    /// Periodic corruption scan cadence, in minutes.
    pub corruption_scan_interval_min: u64,
    /// Enable/disable index auto-repair.
    pub auto_repair: bool,
    /// Target bloom filter false-positive rate.
    pub bloom_fpp: f64,
    /// Enable per-dataset tag-index partitioning.
    pub dataset_isolation: bool,
    /// TTL for the optional caching wrapper (0 disables).
    pub cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_path: PathBuf::from("./data"),
            max_entity_size: DEFAULT_MAX_ENTITY_SIZE,
            max_wal_bytes: DEFAULT_MAX_WAL_BYTES,
            max_wal_age_minutes: DEFAULT_MAX_WAL_AGE_MINUTES,
            reader_pool_min: DEFAULT_READER_POOL_MIN,
            reader_pool_max: DEFAULT_READER_POOL_MAX,
            reader_acquire_timeout: Duration::from_millis(DEFAULT_READER_ACQUIRE_TIMEOUT_MS),
            entity_cache_size: DEFAULT_ENTITY_CACHE_SIZE,
            entity_cache_memory_limit: DEFAULT_ENTITY_CACHE_MEMORY_LIMIT,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            checkpoint_ops: DEFAULT_CHECKPOINT_OPS,
            corruption_scan_interval_min: DEFAULT_CORRUPTION_SCAN_INTERVAL_MINUTES,
            auto_repair: true,
            bloom_fpp: DEFAULT_BLOOM_FPP,
            dataset_isolation: false,
            cache_ttl: Duration::from_secs(0),
        }
    }
}

impl EngineConfig {
    /// Start from defaults, pointed at `data_path`.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        EngineConfig {
            data_path: data_path.into(),
            ..Default::default()
        }
    }

    /// Configuration tuned for fast tests: small WAL segments, short scan
    /// intervals, tiny cache.
    pub fn for_testing(data_path: impl Into<PathBuf>) -> Self {
        EngineConfig {
            data_path: data_path.into(),
            max_wal_bytes: 64 * 1024,
            entity_cache_size: 64,
            entity_cache_memory_limit: 1024 * 1024,
            checkpoint_ops: 16,
            corruption_scan_interval_min: 1,
            ..Default::default()
        }
    }

    /// Builder: set reader pool bounds.
    pub fn with_reader_pool(mut self, min: usize, max: usize) -> Self {
        self.reader_pool_min = min;
        self.reader_pool_max = max;
        self
    }

    /// Builder: set entity cache bounds.
    pub fn with_entity_cache(mut self, size: usize, memory_limit: u64) -> Self {
        self.entity_cache_size = size;
        self.entity_cache_memory_limit = memory_limit;
        self
    }

    /// Builder: set the WAL rotation thresholds.
    pub fn with_wal_rotation(mut self, max_bytes: u64, max_age_minutes: u64) -> Self {
        self.max_wal_bytes = max_bytes;
        self.max_wal_age_minutes = max_age_minutes;
        self
    }

    /// Builder: enable dataset partitioning.
    pub fn with_dataset_isolation(mut self, enabled: bool) -> Self {
        self.dataset_isolation = enabled;
        self
    }

    /// Validate the configuration, rejecting impossible combinations
    /// before anything is constructed from it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reader_pool_min == 0 || self.reader_pool_min > self.reader_pool_max {
            return Err(ConfigError::InvalidReaderPoolBounds {
                min: self.reader_pool_min,
                max: self.reader_pool_max,
            });
        }
        if self.max_wal_bytes < 1024 {
            return Err(ConfigError::WalSegmentTooSmall);
        }
        if self.entity_cache_size < ENTITY_CACHE_MIN_ENTRIES as usize {
            return Err(ConfigError::EntityCacheTooSmall);
        }
        if !(0.0..1.0).contains(&self.bloom_fpp) {
            return Err(ConfigError::InvalidBloomFpp(self.bloom_fpp));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `reader_pool_min` is zero or exceeds `reader_pool_max`.
    #[error("invalid reader pool bounds: min={min}, max={max}")]
    InvalidReaderPoolBounds {
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },

    /// WAL segment size below the 1 KiB floor.
    #[error("WAL segment size must be at least 1KiB")]
    WalSegmentTooSmall,

    /// Entity cache entry cap below the pressure-eviction floor.
    #[error("entity cache size must be at least {} entries", ENTITY_CACHE_MIN_ENTRIES)]
    EntityCacheTooSmall,

    /// Bloom false-positive target outside `(0, 1)`.
    #[error("bloom_fpp must be in (0, 1), got {0}")]
    InvalidBloomFpp(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_reader_pool_bounds() {
        let cfg = EngineConfig::default().with_reader_pool(8, 2);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidReaderPoolBounds { .. })
        ));
    }

    #[test]
    fn rejects_tiny_wal_segment() {
        let mut cfg = EngineConfig::default();
        cfg.max_wal_bytes = 100;
        assert!(matches!(cfg.validate(), Err(ConfigError::WalSegmentTooSmall)));
    }

    #[test]
    fn testing_preset_validates() {
        assert!(EngineConfig::for_testing("/tmp/x").validate().is_ok());
    }
}
