//! Unified error type for the entity store.
//!
//! Every fallible public operation returns `Result<T, EntityError>`. Variants
//! follow spec §7 exactly; the constructor functions and classification
//! methods below exist so callers (and the facade's retry/circuit-breaker
//! logic) can make decisions without matching on variants directly.

use std::time::Duration;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EntityError>;

/// Unified error type covering every kind named in spec §7.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// No entity exists with the given id.
    #[error("entity not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// An as-of query found the entity but no state at or before `t`.
    #[error("entity {id} has no state at or before t={at_nanos}")]
    NotFoundAtTime {
        /// The id that was looked up.
        id: String,
        /// The requested timestamp, in nanoseconds.
        at_nanos: i64,
    },

    /// A create operation targeted an id that already exists.
    #[error("entity already exists: {id}")]
    AlreadyExists {
        /// The conflicting id.
        id: String,
    },

    /// An id, tag, or content payload failed validation.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A disk read/write failed.
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    /// A stored or replayed checksum did not match its content.
    #[error("checksum mismatch at {context}")]
    ChecksumMismatch {
        /// Where the mismatch was detected (e.g. "wal segment 3 offset 512").
        context: String,
    },

    /// A detectable violation of invariants I1-I5 or the file format.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// The per-entity circuit breaker is open.
    #[error("circuit open for {id}, retry after {retry_after_ms}ms")]
    CircuitOpen {
        /// The entity id whose circuit tripped.
        id: String,
        /// Milliseconds until the circuit is eligible to close.
        retry_after_ms: u64,
    },

    /// An operation exceeded its configured deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The write queue (or a background task) has stopped.
    #[error("shutdown in progress")]
    Shutdown,
}

impl EntityError {
    /// Build a [`EntityError::NotFound`].
    pub fn not_found(id: impl Into<String>) -> Self {
        EntityError::NotFound { id: id.into() }
    }

    /// Build a [`EntityError::NotFoundAtTime`].
    pub fn not_found_at_time(id: impl Into<String>, at_nanos: i64) -> Self {
        EntityError::NotFoundAtTime {
            id: id.into(),
            at_nanos,
        }
    }

    /// Build a [`EntityError::AlreadyExists`].
    pub fn already_exists(id: impl Into<String>) -> Self {
        EntityError::AlreadyExists { id: id.into() }
    }

    /// Build a [`EntityError::ValidationFailed`].
    pub fn validation(msg: impl Into<String>) -> Self {
        EntityError::ValidationFailed(msg.into())
    }

    /// Build a [`EntityError::ChecksumMismatch`].
    pub fn checksum_mismatch(context: impl Into<String>) -> Self {
        EntityError::ChecksumMismatch {
            context: context.into(),
        }
    }

    /// Build a [`EntityError::Corruption`].
    pub fn corruption(msg: impl Into<String>) -> Self {
        EntityError::Corruption(msg.into())
    }

    /// Build a [`EntityError::CircuitOpen`].
    pub fn circuit_open(id: impl Into<String>, retry_after: Duration) -> Self {
        EntityError::CircuitOpen {
            id: id.into(),
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }

    /// `true` for errors the facade retries automatically (per §7,
    /// `IOError` is retried up to 3 times with 100ms backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(self, EntityError::IOError(_))
    }

    /// `true` for errors that must surface and halt writes rather than
    /// being silently repaired (Critical/Fatal corruption, checksum
    /// mismatches with no other copy).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EntityError::Corruption(_) | EntityError::ChecksumMismatch { .. }
        )
    }

    /// `true` if this error carries a caller-facing retry-after hint.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EntityError::CircuitOpen { retry_after_ms, .. } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }

    /// Exit/error code bucket per spec §6.5, for CLI-style embedders.
    pub fn exit_code(&self) -> i32 {
        match self {
            EntityError::ValidationFailed(_) => 5,
            EntityError::Corruption(_) | EntityError::ChecksumMismatch { .. } => 3,
            EntityError::IOError(_) => 4,
            _ => 0,
        }
    }
}

impl From<bincode::Error> for EntityError {
    fn from(e: bincode::Error) -> Self {
        EntityError::corruption(format!("decode failure: {e}"))
    }
}
