//! Gzip compression for document payloads.

use crate::error::{CodecError, CodecResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compresses `data` with gzip at the default level.
pub fn compress(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a gzip stream.
///
/// A malformed stream is reported as corruption: the bytes came from a
/// CRC-verified frame, so any gzip error means the writer produced garbage.
pub fn decompress(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::corrupt(format!("invalid gzip payload: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"a moderately repetitive payload payload payload payload";
        let compressed = compress(data).unwrap();
        let restored = decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn roundtrip_empty() {
        let compressed = compress(b"").unwrap();
        assert!(decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = decompress(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { .. }));
    }
}
