//! Write-ahead log.
//!
//! Every mutation is recorded as a JSON entry framed by the binary codec
//! (`[len][crc32][json]`) before the caller sees success. Entries carry
//! process-wide monotonic offsets; `wal.checkpoint` records the offset up to
//! which all entries are durably reflected in collection files, and replay
//! on open applies everything past it.

mod entry;
mod manager;

pub use entry::{IndexSpecPayload, WalCheckpoint, WalEntry, WalOp};
pub use manager::WalManager;

/// Prefix of WAL file names (`wal-<unix-seconds>-<offset:06>.log`).
pub const WAL_FILE_PREFIX: &str = "wal-";

/// Suffix of WAL file names.
pub const WAL_FILE_SUFFIX: &str = ".log";

/// Name of the checkpoint file.
pub const CHECKPOINT_FILE: &str = "wal.checkpoint";
