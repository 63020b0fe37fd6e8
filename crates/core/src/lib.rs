//! Shared types, error model, configuration, and trait seams for the
//! entity store engine.
//!
//! This crate has no I/O of its own; it exists so `entity-storage`,
//! `entity-durability`, `entity-concurrency`, and `entity-engine` can share
//! a single `Entity`/`EntityError`/`EngineConfig` vocabulary without
//! depending on each other's internals.

pub mod config;
pub mod error;
pub mod limits;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::{EntityError, Result};
pub use types::{Entity, IndexEntry};

/// Current wall-clock time in nanoseconds since the Unix epoch.
///
/// Centralized here (rather than called ad hoc with `SystemTime::now()`
/// everywhere) so tests can reason about a single time source.
pub fn now_nanos() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
