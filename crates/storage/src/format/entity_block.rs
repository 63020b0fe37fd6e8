//! Entity block encode/decode (§4.1).
//!
//! ```text
//! EntityHeader { modified:i64, tag_count:u16, content_count:u16, reserved:u32 }
//! tag_count × tag-id:u32
//! content_count × { type_len:u16, type, value_len:u32, value, ts:i64 }
//! ```
//!
//! Raw content always uses the sentinel type `"raw_content"` so generic
//! deserializers don't wrap it. `created_at` has no dedicated header field
//! in the wire format, so it rides along as an engine-managed sub-block
//! (`"_meta:created_at"`) rather than widening the header.

use crate::tag_dict::TagDictionary;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use entity_core::error::{EntityError, Result};
use entity_core::traits::StorageCodec;
use entity_core::types::Entity;
use std::io::Cursor;

const SENTINEL_RAW_CONTENT: &str = "raw_content";
const SENTINEL_CREATED_AT: &str = "_meta:created_at";

/// Encode an entity into its on-disk block form, interning tags into
/// `dict` and compressing content with `codec`.
pub fn encode_entity(entity: &Entity, dict: &TagDictionary, codec: &dyn StorageCodec) -> Vec<u8> {
    let tag_ids: Vec<u32> = entity.tags.iter().map(|t| dict.intern(t)).collect();
    let encoded_content = codec.encode(&entity.content);

    let mut buf = Vec::with_capacity(16 + tag_ids.len() * 4 + encoded_content.len() + 32);
    buf.write_i64::<LittleEndian>(entity.updated_at).unwrap();
    buf.write_u16::<LittleEndian>(tag_ids.len() as u16).unwrap();
    buf.write_u16::<LittleEndian>(2).unwrap(); // content_count: raw_content + created_at meta
    buf.write_u32::<LittleEndian>(0).unwrap(); // reserved

    for id in &tag_ids {
        buf.write_u32::<LittleEndian>(*id).unwrap();
    }

    write_sub_block(&mut buf, SENTINEL_RAW_CONTENT, &encoded_content, entity.updated_at);
    write_sub_block(
        &mut buf,
        SENTINEL_CREATED_AT,
        &entity.created_at.to_le_bytes(),
        entity.created_at,
    );

    buf
}

fn write_sub_block(buf: &mut Vec<u8>, ty: &str, value: &[u8], ts: i64) {
    buf.write_u16::<LittleEndian>(ty.len() as u16).unwrap();
    buf.extend_from_slice(ty.as_bytes());
    buf.write_u32::<LittleEndian>(value.len() as u32).unwrap();
    buf.extend_from_slice(value);
    buf.write_i64::<LittleEndian>(ts).unwrap();
}

/// Decode an entity block previously produced by [`encode_entity`].
pub fn decode_entity(
    id: &str,
    data: &[u8],
    dict: &TagDictionary,
    codec: &dyn StorageCodec,
) -> Result<Entity> {
    let mut cur = Cursor::new(data);
    let modified = cur
        .read_i64::<LittleEndian>()
        .map_err(|e| EntityError::corruption(format!("entity header modified: {e}")))?;
    let tag_count = cur
        .read_u16::<LittleEndian>()
        .map_err(|e| EntityError::corruption(format!("entity header tag_count: {e}")))?;
    let content_count = cur
        .read_u16::<LittleEndian>()
        .map_err(|e| EntityError::corruption(format!("entity header content_count: {e}")))?;
    let _reserved = cur
        .read_u32::<LittleEndian>()
        .map_err(|e| EntityError::corruption(format!("entity header reserved: {e}")))?;

    let mut tags = Vec::with_capacity(tag_count as usize);
    for _ in 0..tag_count {
        let tag_id = cur
            .read_u32::<LittleEndian>()
            .map_err(|e| EntityError::corruption(format!("entity tag id: {e}")))?;
        let tag = dict
            .resolve(tag_id)
            .ok_or_else(|| EntityError::corruption(format!("unresolved tag id {tag_id}")))?;
        tags.push(tag);
    }

    let mut content = Vec::new();
    let mut created_at = modified;
    for _ in 0..content_count {
        let type_len = cur
            .read_u16::<LittleEndian>()
            .map_err(|e| EntityError::corruption(format!("sub-block type_len: {e}")))?
            as usize;
        let mut type_buf = vec![0u8; type_len];
        std::io::Read::read_exact(&mut cur, &mut type_buf)
            .map_err(|e| EntityError::corruption(format!("sub-block type: {e}")))?;
        let ty = String::from_utf8(type_buf)
            .map_err(|e| EntityError::corruption(format!("sub-block type utf8: {e}")))?;

        let value_len = cur
            .read_u32::<LittleEndian>()
            .map_err(|e| EntityError::corruption(format!("sub-block value_len: {e}")))?
            as usize;
        let mut value = vec![0u8; value_len];
        std::io::Read::read_exact(&mut cur, &mut value)
            .map_err(|e| EntityError::corruption(format!("sub-block value: {e}")))?;

        let ts = cur
            .read_i64::<LittleEndian>()
            .map_err(|e| EntityError::corruption(format!("sub-block ts: {e}")))?;

        match ty.as_str() {
            SENTINEL_RAW_CONTENT => content = codec.decode(&value)?,
            SENTINEL_CREATED_AT => {
                if value.len() == 8 {
                    created_at = i64::from_le_bytes(value.try_into().unwrap());
                }
                let _ = ts;
            }
            _ => {} // unknown sub-block type, skip (forward compatible)
        }
    }

    Ok(Entity {
        id: id.to_string(),
        tags,
        content,
        created_at,
        updated_at: modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IdentityCodec;

    #[test]
    fn round_trips_an_entity() {
        let dict = TagDictionary::new();
        let codec = IdentityCodec;
        let entity = Entity::new(
            "e1",
            vec!["type:user".into(), "status:active".into()],
            b"hello".to_vec(),
            1000,
        )
        .unwrap();

        let block = encode_entity(&entity, &dict, &codec);
        let decoded = decode_entity("e1", &block, &dict, &codec).unwrap();

        assert_eq!(decoded.id, entity.id);
        assert_eq!(decoded.tags, entity.tags);
        assert_eq!(decoded.content, entity.content);
        assert_eq!(decoded.created_at, entity.created_at);
        assert_eq!(decoded.updated_at, entity.updated_at);
    }

    #[test]
    fn preserves_distinct_created_and_updated_timestamps() {
        let dict = TagDictionary::new();
        let codec = IdentityCodec;
        let mut entity = Entity::new("e1", vec![], b"v1".to_vec(), 1000).unwrap();
        entity.updated_at = 2000;
        entity.content = b"v2".to_vec();

        let block = encode_entity(&entity, &dict, &codec);
        let decoded = decode_entity("e1", &block, &dict, &codec).unwrap();

        assert_eq!(decoded.created_at, 1000);
        assert_eq!(decoded.updated_at, 2000);
    }
}
