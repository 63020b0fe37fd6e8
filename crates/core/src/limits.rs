//! Size and timing limits shared across the engine.
//!
//! These are the defaults named in spec §6.4; `EngineConfig` may override
//! any of them per-instance, but the hard ceilings below (entry length,
//! astronomical-length guard, file offset ceiling) are invariants of the
//! on-disk format and are never configurable.

/// Maximum length of an entity id, in bytes.
pub const MAX_ENTITY_ID_LEN: usize = 96;

/// Default maximum entity content size (100 MiB).
pub const DEFAULT_MAX_ENTITY_SIZE: u64 = 100 * 1024 * 1024;

/// Default WAL rotation size threshold (100 MiB).
pub const DEFAULT_MAX_WAL_BYTES: u64 = 100 * 1024 * 1024;

/// Default WAL rotation age threshold, in minutes.
pub const DEFAULT_MAX_WAL_AGE_MINUTES: u64 = 60;

/// Default minimum compressible content size (1 KiB).
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Hard cap on a single framed WAL entry length (200 MiB).
pub const DEFAULT_MAX_ENTRY_LENGTH: u64 = 200 * 1024 * 1024;

/// Frame lengths above this are treated as memory corruption, never as
/// legitimate entries (1 GiB). See spec §4.4 "astronomical" guard.
pub const ASTRONOMICAL_LENGTH: u64 = 1024 * 1024 * 1024;

/// Ceiling on any on-disk offset/size field (10 GiB). Validated by the
/// header checker during checkpoint (§4.13) and corruption scan (§4.14).
pub const MAX_FILE_OFFSET: u64 = 10 * 1024 * 1024 * 1024;

/// Default reader pool bounds.
pub const DEFAULT_READER_POOL_MIN: usize = 2;
pub const DEFAULT_READER_POOL_MAX: usize = 16;

/// Default reader pool acquisition timeout.
pub const DEFAULT_READER_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Default entity cache entry and memory caps.
pub const DEFAULT_ENTITY_CACHE_SIZE: usize = 10_000;
pub const DEFAULT_ENTITY_CACHE_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;

/// Floors the cache may not shrink below under pressure (§4.10).
pub const ENTITY_CACHE_MIN_ENTRIES: usize = 100;
pub const ENTITY_CACHE_MIN_MEMORY: u64 = 10 * 1024 * 1024;

/// Default number of write operations between automatic checkpoints.
pub const DEFAULT_CHECKPOINT_OPS: u64 = 1_000;

/// Default corruption scan cadence, in minutes.
pub const DEFAULT_CORRUPTION_SCAN_INTERVAL_MINUTES: u64 = 10;

/// Default bloom filter target false-positive rate.
pub const DEFAULT_BLOOM_FPP: f64 = 0.01;

/// Default write operation deadline, in milliseconds.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 30_000;

/// Default write-queue enqueue timeout, in milliseconds.
pub const DEFAULT_ENQUEUE_TIMEOUT_MS: u64 = 100;

/// Per-entity circuit breaker: max updates per second before it starts
/// counting toward the failure budget.
pub const CIRCUIT_MAX_UPDATES_PER_SEC: u32 = 10;

/// Per-entity circuit breaker: consecutive failures before tripping open.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Per-entity circuit breaker: open duration once tripped, in seconds.
pub const CIRCUIT_OPEN_SECONDS: u64 = 30;

/// Sharded lock manager defaults (§4.11), both must be powers of two.
pub const DEFAULT_ENTITY_LOCK_SHARDS: usize = 256;
pub const DEFAULT_TAG_LOCK_SHARDS: usize = 128;

/// Default tag index shard count (§4.6).
pub const DEFAULT_TAG_INDEX_SHARDS: usize = 32;

/// Temporal index bucket width, in nanoseconds (default 1 hour, §4.7).
pub const DEFAULT_TEMPORAL_BUCKET_NANOS: i64 = 60 * 60 * 1_000_000_000;

/// Corruption scan (§4.14): entities sampled per integrity check.
pub const CORRUPTION_ENTITY_SAMPLE_SIZE: usize = 10;

/// Corruption scan: WAL replay is healthy below this many corrupted
/// frames; spec names the check but not the threshold, so this is a
/// chosen default.
pub const CORRUPTION_MAX_WAL_CORRUPTED_FRAMES: u64 = 10;

/// Corruption scan: acceptable cache-size-to-index-size ratio band.
pub const CORRUPTION_CACHE_INDEX_RATIO_MIN: f64 = 0.1;
pub const CORRUPTION_CACHE_INDEX_RATIO_MAX: f64 = 2.0;

/// Corruption scan: minimum plausible data file size, in bytes.
pub const CORRUPTION_MIN_FILE_SIZE_BYTES: u64 = 64;

/// Corruption scan: minimum free disk space the filesystem check
/// requires.
pub const CORRUPTION_MIN_FREE_DISK_BYTES: u64 = 1024 * 1024 * 1024;

/// Corruption scan: auto-repairs applied per run before the remainder
/// is left for the next scan; spec caps this without naming a number.
pub const CORRUPTION_MAX_AUTO_REPAIRS_PER_RUN: usize = 100;

/// Single-entity recovery: cooldown between recovery attempts for the
/// same id.
pub const ENTITY_RECOVERY_COOLDOWN_SECONDS: u64 = 30;
