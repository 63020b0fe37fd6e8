//! Trait seams shared across crates.
//!
//! Keeping these in `entity-core` lets `entity-storage`, `entity-durability`,
//! and `entity-engine` depend on the abstraction without depending on each
//! other's concrete types, avoiding the cyclic-reference trap called out in
//! spec §9.

use crate::error::Result;
use crate::types::Entity;

/// A content codec used for transparent compression above
/// `compression_threshold` (§3, §4.1). All bytes passing through entity
/// block encoding go through a `StorageCodec`.
pub trait StorageCodec: Send + Sync {
    /// Encode bytes for storage.
    fn encode(&self, data: &[u8]) -> Vec<u8>;

    /// Decode previously-encoded bytes. Errors if the data cannot be
    /// decoded (corruption, truncated stream).
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Stable identifier for this codec (not persisted per spec's format,
    /// but useful for diagnostics and future format evolution).
    fn codec_id(&self) -> &'static str;
}

/// The narrow "direct repository" capability used by consumers that must
/// not re-enter the full facade (§9: breaking the repository/metrics
/// cycle). Only the operations a metrics or diagnostics path needs.
pub trait DirectRepository: Send + Sync {
    /// Create a new entity. Fails with `AlreadyExists` if the id is taken.
    fn create(&self, entity: Entity) -> Result<()>;

    /// Fetch an entity by id.
    fn get(&self, id: &str) -> Result<Entity>;

    /// List every entity id tagged with the given logical tag.
    fn list_by_tag(&self, tag: &str) -> Result<Vec<String>>;

    /// Attach a tag to an existing entity.
    fn add_tag(&self, id: &str, tag: &str) -> Result<()>;
}
