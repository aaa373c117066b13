//! Error types for the codec crate.

use std::io;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The data on disk is not a valid record.
    ///
    /// Raised for magic/version mismatches, CRC failures, and truncated
    /// frames.
    #[error("corrupt data: {message}")]
    Corrupt {
        /// Description of what failed to decode.
        message: String,
    },
}

impl CodecError {
    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}
