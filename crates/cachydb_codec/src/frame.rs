//! Framed record encoding.
//!
//! A frame is `[length:u32 LE][crc32:u32 LE][payload:length bytes]`. The
//! checksum is IEEE CRC-32 over the payload only. Frames are self-delimiting
//! so a file can hold a sequence of them back to back.

use crate::error::{CodecError, CodecResult};
use std::io::{self, Read, Write};

/// Size of the frame prefix: length (4) + crc32 (4).
pub const PREFIX_SIZE: usize = 8;

/// Maximum accepted payload length.
///
/// Anything larger than this is treated as corruption rather than an
/// allocation request: no legitimate record approaches this size.
pub const MAX_PAYLOAD: u32 = 256 * 1024 * 1024;

/// Computes the IEEE CRC-32 checksum of `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Encodes a payload into a framed record.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&checksum(payload).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Writes a framed record to `w`.
pub fn write_to<W: Write>(w: &mut W, payload: &[u8]) -> CodecResult<()> {
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(&checksum(payload).to_le_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Decodes one frame from the front of `data`.
///
/// Returns the payload and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`CodecError::Corrupt`] if the frame is truncated or the CRC
/// does not match.
pub fn decode(data: &[u8]) -> CodecResult<(Vec<u8>, usize)> {
    if data.len() < PREFIX_SIZE {
        return Err(CodecError::corrupt("truncated frame prefix"));
    }
    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let expected = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    if len > MAX_PAYLOAD {
        return Err(CodecError::corrupt(format!(
            "frame length {len} exceeds maximum {MAX_PAYLOAD}"
        )));
    }
    let len = len as usize;
    if data.len() < PREFIX_SIZE + len {
        return Err(CodecError::corrupt(format!(
            "truncated frame payload: need {len} bytes, have {}",
            data.len() - PREFIX_SIZE
        )));
    }

    let payload = &data[PREFIX_SIZE..PREFIX_SIZE + len];
    let actual = checksum(payload);
    if actual != expected {
        return Err(CodecError::corrupt(format!(
            "checksum mismatch: expected {expected:08x}, got {actual:08x}"
        )));
    }

    Ok((payload.to_vec(), PREFIX_SIZE + len))
}

/// Reads one frame from `r`.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes before EOF). A
/// partial prefix or payload is reported as corruption: it means a write
/// was torn mid-frame.
pub fn read_from<R: Read>(r: &mut R) -> CodecResult<Option<Vec<u8>>> {
    let mut prefix = [0u8; PREFIX_SIZE];
    match read_exact_or_eof(r, &mut prefix)? {
        ReadOutcome::Eof => return Ok(None),
        ReadOutcome::Partial => {
            return Err(CodecError::corrupt("truncated frame prefix"));
        }
        ReadOutcome::Full => {}
    }

    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    let expected = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

    if len > MAX_PAYLOAD {
        return Err(CodecError::corrupt(format!(
            "frame length {len} exceeds maximum {MAX_PAYLOAD}"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    match read_exact_or_eof(r, &mut payload)? {
        ReadOutcome::Full => {}
        ReadOutcome::Eof | ReadOutcome::Partial => {
            return Err(CodecError::corrupt("truncated frame payload"));
        }
    }

    let actual = checksum(&payload);
    if actual != expected {
        return Err(CodecError::corrupt(format!(
            "checksum mismatch: expected {expected:08x}, got {actual:08x}"
        )));
    }

    Ok(Some(payload))
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// Fills `buf` from `r`, distinguishing clean EOF from a short read.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip() {
        let payload = b"the quick brown fox";
        let encoded = encode(payload);
        let (decoded, consumed) = decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn roundtrip_empty_payload() {
        let encoded = encode(b"");
        let (decoded, consumed) = decode(&encoded).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(consumed, PREFIX_SIZE);
    }

    #[test]
    fn every_bit_flip_is_detected() {
        let encoded = encode(b"durability");
        for byte in 0..encoded.len() {
            for bit in 0..8 {
                let mut tampered = encoded.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    decode(&tampered).is_err(),
                    "flip of byte {byte} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn truncated_prefix_is_corrupt() {
        let encoded = encode(b"abc");
        let err = decode(&encoded[..5]).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { .. }));
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let encoded = encode(b"abcdef");
        let err = decode(&encoded[..encoded.len() - 2]).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { .. }));
    }

    #[test]
    fn oversized_length_is_corrupt() {
        let mut encoded = encode(b"x");
        encoded[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode(&encoded),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn stream_reads_frames_in_sequence() {
        let mut buf = Vec::new();
        write_to(&mut buf, b"one").unwrap();
        write_to(&mut buf, b"two").unwrap();
        write_to(&mut buf, b"three").unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_from(&mut cursor).unwrap().unwrap(), b"one");
        assert_eq!(read_from(&mut cursor).unwrap().unwrap(), b"two");
        assert_eq!(read_from(&mut cursor).unwrap().unwrap(), b"three");
        assert!(read_from(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn stream_torn_tail_is_corrupt() {
        let mut buf = Vec::new();
        write_to(&mut buf, b"complete").unwrap();
        write_to(&mut buf, b"torn").unwrap();
        buf.truncate(buf.len() - 2);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_from(&mut cursor).unwrap().unwrap(), b"complete");
        assert!(read_from(&mut cursor).is_err());
    }

    #[test]
    fn crc_known_vector() {
        // IEEE CRC-32 of "123456789"
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }
}
