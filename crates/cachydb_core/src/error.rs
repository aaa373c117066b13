//! Error types for the core engine.

use cachydb_codec::CodecError;
use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, DbError>;

/// Errors surfaced by the CachyDB engine.
///
/// Every variant carries a message naming the affected database, collection,
/// or document. `Io` may be transient and retried by the caller; `NotFound`,
/// `Conflict`, `SchemaViolation`, and `InvalidArgument` are user errors and
/// retrying without changing the request will fail again.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A collection file, offset index, or persisted index failed to decode.
    #[error("corrupt data: {message}")]
    CorruptData {
        /// What failed to decode, and where.
        message: String,
    },

    /// The write-ahead log failed to decode during replay.
    #[error("WAL corruption: {message}")]
    WalCorrupt {
        /// What failed to decode, and where.
        message: String,
    },

    /// A database, collection, or document does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// The missing object.
        message: String,
    },

    /// An object with the given name or ID already exists, or an exclusive
    /// resource is held elsewhere.
    #[error("conflict: {message}")]
    Conflict {
        /// The conflicting object.
        message: String,
    },

    /// A document does not conform to its collection's schema.
    #[error("schema violation: {message}")]
    SchemaViolation {
        /// Which field failed, and how.
        message: String,
    },

    /// A caller-supplied argument is invalid.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Which argument, and why.
        message: String,
    },

    /// An invariant the engine relies on was broken.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the broken invariant.
        message: String,
    },
}

impl DbError {
    /// Creates a corrupt-data error.
    pub fn corrupt_data(message: impl Into<String>) -> Self {
        Self::CorruptData {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corrupt(message: impl Into<String>) -> Self {
        Self::WalCorrupt {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a schema violation error.
    pub fn schema_violation(message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<CodecError> for DbError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io) => Self::Io(io),
            CodecError::Corrupt { message } => Self::CorruptData { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = DbError::not_found("document 'abc' in collection 'users'");
        assert_eq!(
            err.to_string(),
            "not found: document 'abc' in collection 'users'"
        );
    }

    #[test]
    fn codec_corruption_maps_to_corrupt_data() {
        let err = DbError::from(CodecError::corrupt("bad frame"));
        assert!(matches!(err, DbError::CorruptData { .. }));
    }

    #[test]
    fn codec_io_maps_to_io() {
        let io = io::Error::new(io::ErrorKind::Other, "disk");
        let err = DbError::from(CodecError::Io(io));
        assert!(matches!(err, DbError::Io(_)));
    }
}
