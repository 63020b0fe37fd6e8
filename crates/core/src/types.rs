//! Core data model: `Entity`, tags, and the on-disk index entry shape.
//!
//! This mirrors spec §3 exactly. An `Entity` is the only first-class
//! record; everything else (relationships, metrics, datasets) is modeled
//! as an ordinary entity distinguished only by its tags (§9 open
//! questions: `_source:`/`_target:`/`_relationship:` for relationships,
//! `dataset:<name>` for partitioning).

use crate::error::{EntityError, Result};
use crate::limits::MAX_ENTITY_ID_LEN;
use serde::{Deserialize, Serialize};

/// Reserved prefix for engine-managed tags (relationships, system
/// metadata). User code must not create tags with this prefix; `Entity`
/// construction rejects them unless explicitly allowed via
/// [`Entity::with_reserved_tags`].
pub const RESERVED_TAG_PREFIX: char = '_';

/// Tag key used to select a relationship's source entity.
pub const TAG_RELATIONSHIP_SOURCE: &str = "_source";
/// Tag key used to select a relationship's target entity.
pub const TAG_RELATIONSHIP_TARGET: &str = "_target";
/// Tag key used to name a relationship.
pub const TAG_RELATIONSHIP_KIND: &str = "_relationship";

/// Tag namespace prefix used for dataset partitioning (§9: frozen as
/// `dataset:`, not `dataspace:`).
pub const TAG_DATASET_PREFIX: &str = "dataset:";

/// The sole record type stored by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Opaque identifier, at most [`MAX_ENTITY_ID_LEN`] bytes.
    pub id: String,
    /// Ordered tags. A tag may carry a `"<nanos>|"` temporal prefix; see
    /// [`split_temporal_prefix`].
    pub tags: Vec<String>,
    /// Opaque content blob. Compressed transparently above a configurable
    /// threshold; decompression is automatic on read.
    pub content: Vec<u8>,
    /// Nanosecond creation timestamp.
    pub created_at: i64,
    /// Nanosecond timestamp of the most recent mutation.
    pub updated_at: i64,
}

impl Entity {
    /// Construct a new entity, validating id length and rejecting
    /// reserved-prefix tags supplied by the caller.
    pub fn new(id: impl Into<String>, tags: Vec<String>, content: Vec<u8>, now_nanos: i64) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        for tag in &tags {
            let (_, logical) = split_temporal_prefix(tag);
            if logical.starts_with(RESERVED_TAG_PREFIX) {
                return Err(EntityError::validation(format!(
                    "tag '{tag}' uses the reserved '_' prefix"
                )));
            }
        }
        Ok(Entity {
            id,
            tags,
            content,
            created_at: now_nanos,
            updated_at: now_nanos,
        })
    }

    /// Construct an entity allowing reserved-prefix tags, for
    /// engine-managed records (relationships).
    pub fn with_reserved_tags(
        id: impl Into<String>,
        tags: Vec<String>,
        content: Vec<u8>,
        now_nanos: i64,
    ) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Entity {
            id,
            tags,
            content,
            created_at: now_nanos,
            updated_at: now_nanos,
        })
    }

    /// The logical (prefix-stripped) form of every tag, in order.
    pub fn logical_tags(&self) -> Vec<&str> {
        self.tags.iter().map(|t| split_temporal_prefix(t).1).collect()
    }

    /// Returns `true` if any tag selects the given dataset.
    pub fn in_dataset(&self, name: &str) -> bool {
        let wanted = format!("{TAG_DATASET_PREFIX}{name}");
        self.logical_tags().iter().any(|t| *t == wanted)
    }
}

/// Validate an entity id: non-empty, at most [`MAX_ENTITY_ID_LEN`] bytes.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(EntityError::validation("entity id must not be empty"));
    }
    if id.len() > MAX_ENTITY_ID_LEN {
        return Err(EntityError::validation(format!(
            "entity id exceeds {MAX_ENTITY_ID_LEN} bytes: {id}"
        )));
    }
    Ok(())
}

/// Split a tag into its optional temporal prefix (nanoseconds) and its
/// logical form. Accepts both the compact `<int64_nanos>|` form and
/// `<RFC3339Nano>|` (§6.1); returns `None` for the timestamp when the tag
/// carries no recognizable prefix.
pub fn split_temporal_prefix(tag: &str) -> (Option<i64>, &str) {
    match tag.find('|') {
        Some(idx) => {
            let prefix = &tag[..idx];
            let logical = &tag[idx + 1..];
            if let Ok(nanos) = prefix.parse::<i64>() {
                return (Some(nanos), logical);
            }
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(prefix) {
                return (Some(dt.timestamp_nanos_opt().unwrap_or(0)), logical);
            }
            (None, tag)
        }
        None => (None, tag),
    }
}

/// Render the compact temporal form `"<nanos>|<logical>"` (§9: writers
/// always produce the compact form, never RFC3339Nano).
pub fn with_temporal_prefix(nanos: i64, logical: &str) -> String {
    format!("{nanos}|{logical}")
}

/// The namespace of a `key:value` logical tag: the portion before the
/// first colon, or the whole tag if there is no colon.
pub fn tag_namespace(logical: &str) -> &str {
    match logical.find(':') {
        Some(idx) => &logical[..idx],
        None => logical,
    }
}

/// Dense on-disk entity index entry (§3, §6.1): `{ id[96], offset, size, flags }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Fixed-width id buffer; unused bytes are zero.
    pub id: [u8; MAX_ENTITY_ID_LEN],
    /// Byte offset of the entity block within the data file.
    pub offset: u64,
    /// Size in bytes of the encoded entity block.
    pub size: u32,
    /// Reserved bit flags (currently always 0; tombstone bit reserved).
    pub flags: u32,
}

/// Bit set in [`IndexEntry::flags`] when the entry marks a deleted entity.
pub const INDEX_FLAG_TOMBSTONE: u32 = 1 << 0;

impl IndexEntry {
    /// Pack an id string into the fixed-width on-disk representation.
    pub fn pack_id(id: &str) -> Result<[u8; MAX_ENTITY_ID_LEN]> {
        validate_id(id)?;
        let mut buf = [0u8; MAX_ENTITY_ID_LEN];
        buf[..id.len()].copy_from_slice(id.as_bytes());
        Ok(buf)
    }

    /// Unpack a fixed-width id buffer back to a `String`, trimming the
    /// trailing zero padding.
    pub fn unpack_id(buf: &[u8; MAX_ENTITY_ID_LEN]) -> String {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    }

    /// Returns `true` if the tombstone flag is set.
    pub fn is_tombstone(&self) -> bool {
        self.flags & INDEX_FLAG_TOMBSTONE != 0
    }
}
