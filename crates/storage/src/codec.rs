//! Storage codec: transparent compression above `compression_threshold`.
//!
//! Content below the threshold is stored raw (`IdentityCodec`); content at
//! or above it is compressed with a general-purpose lossless codec
//! (zstd). Decompression is automatic and detected by a one-byte tag
//! prefixed to the encoded bytes, so a reader never needs to know what
//! threshold the writer used.

use entity_core::error::{EntityError, Result};
use entity_core::traits::StorageCodec;

const TAG_RAW: u8 = 0;
const TAG_ZSTD: u8 = 1;

/// No-op codec: encode/decode are identity plus the one-byte framing tag.
/// Used for content that never reaches the compression threshold.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl StorageCodec for IdentityCodec {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 1);
        out.push(TAG_RAW);
        out.extend_from_slice(data);
        out
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        decode_tagged(data)
    }

    fn codec_id(&self) -> &'static str {
        "identity"
    }
}

/// Zstd-backed codec that compresses unconditionally. Wrapped by
/// [`CompressingCodec`] to apply the configurable size threshold.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    /// Construct with zstd's default compression level.
    pub fn new() -> Self {
        ZstdCodec { level: 3 }
    }
}

impl StorageCodec for ZstdCodec {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        match zstd::encode_all(data, self.level) {
            Ok(compressed) => {
                let mut out = Vec::with_capacity(compressed.len() + 1);
                out.push(TAG_ZSTD);
                out.extend_from_slice(&compressed);
                out
            }
            Err(_) => IdentityCodec.encode(data),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        decode_tagged(data)
    }

    fn codec_id(&self) -> &'static str {
        "zstd"
    }
}

fn decode_tagged(data: &[u8]) -> Result<Vec<u8>> {
    let (tag, body) = data
        .split_first()
        .ok_or_else(|| EntityError::corruption("empty codec frame"))?;
    match *tag {
        TAG_RAW => Ok(body.to_vec()),
        TAG_ZSTD => zstd::decode_all(body)
            .map_err(|e| EntityError::corruption(format!("zstd decode failure: {e}"))),
        other => Err(EntityError::corruption(format!("unknown codec tag {other}"))),
    }
}

/// Applies [`ZstdCodec`] only to payloads at or above a configured
/// threshold; smaller payloads pass through [`IdentityCodec`] to avoid
/// paying compression overhead on tiny content (spec §3, default 1 KiB).
pub struct CompressingCodec {
    threshold: usize,
    zstd: ZstdCodec,
}

impl CompressingCodec {
    /// Construct with the given compression threshold in bytes.
    pub fn new(threshold: usize) -> Self {
        CompressingCodec {
            threshold,
            zstd: ZstdCodec::new(),
        }
    }
}

impl StorageCodec for CompressingCodec {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        if data.len() >= self.threshold {
            self.zstd.encode(data)
        } else {
            IdentityCodec.encode(data)
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        decode_tagged(data)
    }

    fn codec_id(&self) -> &'static str {
        "compressing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips() {
        let codec = IdentityCodec;
        let data = b"hello world".to_vec();
        let encoded = codec.encode(&data);
        assert_eq!(codec.decode(&encoded).unwrap(), data);
    }

    #[test]
    fn zstd_round_trips() {
        let codec = ZstdCodec::new();
        let data = vec![b'x'; 4096];
        let encoded = codec.encode(&data);
        assert!(encoded.len() < data.len());
        assert_eq!(codec.decode(&encoded).unwrap(), data);
    }

    #[test]
    fn compressing_codec_skips_small_payloads() {
        let codec = CompressingCodec::new(1024);
        let small = vec![b'a'; 10];
        let encoded = codec.encode(&small);
        assert_eq!(encoded[0], TAG_RAW);
        assert_eq!(codec.decode(&encoded).unwrap(), small);
    }

    #[test]
    fn compressing_codec_compresses_large_payloads() {
        let codec = CompressingCodec::new(1024);
        let large = vec![b'a'; 4096];
        let encoded = codec.encode(&large);
        assert_eq!(encoded[0], TAG_ZSTD);
        assert_eq!(codec.decode(&encoded).unwrap(), large);
    }
}
