//! # CachyDB Codec
//!
//! Byte-level encoding shared by the collection store and the write-ahead
//! log, plus the dynamic document value model.
//!
//! This crate provides:
//! - Framed records: `[length:u32 LE][crc32:u32 LE][payload]`
//! - The collection file header (magic, format version, feature flags)
//! - Gzip compression for document payloads
//! - [`Value`], the tagged JSON-like value type used by documents
//!
//! ## Framing
//!
//! Every durable record (a document in a collection file, an offset index,
//! a WAL entry) is written as a single frame. The CRC is IEEE CRC-32 over
//! the payload bytes; a mismatch, a bad magic number, or a truncated frame
//! surfaces as [`CodecError::Corrupt`].
//!
//! ```
//! use cachydb_codec::frame;
//!
//! let encoded = frame::encode(b"hello");
//! let (payload, consumed) = frame::decode(&encoded).unwrap();
//! assert_eq!(payload, b"hello");
//! assert_eq!(consumed, encoded.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod compress;
pub mod frame;
pub mod header;

mod error;
mod value;

pub use error::{CodecError, CodecResult};
pub use header::FileHeader;
pub use value::Value;
