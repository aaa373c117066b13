//! Collection data file header.
//!
//! Every `collection.data` file starts with a fixed 8-byte header:
//! `[magic:u32 LE][version:u16 LE][flags:u16 LE]`.

use crate::error::{CodecError, CodecResult};
use std::io::{Read, Write};

/// Magic number identifying a CachyDB collection data file.
pub const MAGIC: u32 = 0xCADB_0001;

/// Current collection file format version.
pub const FORMAT_VERSION: u16 = 1;

/// Flag bit: document payloads are gzip-compressed.
pub const FLAG_GZIP: u16 = 0b1;

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Parsed collection file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version of the file.
    pub version: u16,
    /// Feature flags (bit 0 = gzip payloads).
    pub flags: u16,
}

impl FileHeader {
    /// Header for a new file with gzip compression enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            flags: FLAG_GZIP,
        }
    }

    /// Whether document payloads in this file are gzip-compressed.
    #[must_use]
    pub const fn compressed(&self) -> bool {
        self.flags & FLAG_GZIP != 0
    }

    /// Encodes the header to its on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    /// Decodes a header, rejecting unknown magic or versions.
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CodecError::corrupt("truncated file header"));
        }
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if magic != MAGIC {
            return Err(CodecError::corrupt(format!(
                "bad magic number: expected {MAGIC:08x}, got {magic:08x}"
            )));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != FORMAT_VERSION {
            return Err(CodecError::corrupt(format!(
                "unsupported format version {version} (expected {FORMAT_VERSION})"
            )));
        }
        let flags = u16::from_le_bytes([data[6], data[7]]);
        Ok(Self { version, flags })
    }

    /// Writes the header to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> CodecResult<()> {
        w.write_all(&self.encode())?;
        Ok(())
    }

    /// Reads and validates a header from `r`.
    pub fn read_from<R: Read>(r: &mut R) -> CodecResult<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        r.read_exact(&mut buf)
            .map_err(|_| CodecError::corrupt("truncated file header"))?;
        Self::decode(&buf)
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let header = FileHeader::new();
        let decoded = FileHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.compressed());
    }

    #[test]
    fn uncompressed_flag() {
        let header = FileHeader {
            version: FORMAT_VERSION,
            flags: 0,
        };
        assert!(!header.compressed());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = FileHeader::new().encode();
        encoded[0] ^= 0xFF;
        assert!(FileHeader::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut encoded = FileHeader::new().encode();
        encoded[4] = 99;
        assert!(FileHeader::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_truncation() {
        let encoded = FileHeader::new().encode();
        assert!(FileHeader::decode(&encoded[..6]).is_err());
    }
}
