//! On-disk format and in-memory indexing structures for the entity
//! store: file format (C1), buffer pool (C2), tag dictionary (C6), tag
//! index (C7), temporal index (C8), bloom filter (C9), skip list
//! (C10), and entity cache (C11).

pub mod bloom;
pub mod buffer_pool;
pub mod cache;
pub mod codec;
pub mod format;
pub mod skiplist;
pub mod tag_dict;
pub mod tag_index;
pub mod temporal_index;

pub use bloom::BloomFilter;
pub use buffer_pool::{BufferPool, BufferPoolStats};
pub use cache::EntityCache;
pub use codec::{CompressingCodec, IdentityCodec, ZstdCodec};
pub use format::{decode_entity, encode_entity, FileHeader, FormatVariant};
pub use skiplist::SkipList;
pub use tag_dict::TagDictionary;
pub use tag_index::TagIndex;
pub use temporal_index::{TagDiff, TemporalIndex};
