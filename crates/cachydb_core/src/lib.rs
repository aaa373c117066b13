//! # CachyDB Core
//!
//! The storage engine behind CachyDB: a lightweight, embeddable,
//! document-oriented database.
//!
//! This crate provides:
//! - Named databases holding named collections of JSON-like documents
//! - Optional per-collection schema validation
//! - Hash-based secondary indexes with on-disk persistence
//! - Equality and range query evaluation with skip/limit
//! - A write-ahead log with batched and sync appends, size-based rotation,
//!   and checkpointing
//! - A compressed binary collection format with an offset index
//! - Crash recovery by WAL replay on open
//!
//! ## Durability contract
//!
//! Every mutation that returns success has been fsynced to the WAL. The
//! in-memory model is authoritative at runtime; collection files are
//! rewritten in the background and the WAL checkpoint records how far those
//! rewrites have caught up. On open, the engine loads the collection files
//! and replays every WAL entry past the checkpoint, reconstructing exactly
//! the acknowledged state.
//!
//! ## Usage
//!
//! ```ignore
//! use cachydb_core::{Config, Engine, Query, FilterOp};
//!
//! let engine = Engine::open(Config::default().root_dir("./data"))?;
//! let db = engine.default_database()?;
//! let users = db.create_collection("users", None)?;
//!
//! let id = users.insert_json(serde_json::json!({"name": "Alice"}))?;
//! let found = users.find(&Query::new().filter("name", FilterOp::Eq, "Alice"))?;
//! assert_eq!(found[0].id(), id);
//!
//! engine.close()?;
//! ```
//!
//! ## Known limitations
//!
//! Hash indexes map each field value to a single document ID: when several
//! documents share an indexed value, only the most recently indexed one is
//! reachable through the index. Queries whose leading filter is not an
//! equality test always scan, so they are unaffected. Within one collection
//! mutations are serialized by a write lock; there is no cross-collection
//! transaction support.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod migrate;
pub mod store;
pub mod wal;

mod collection;
mod config;
mod database;
mod document;
mod engine;
mod error;
mod index;
mod query;
mod schema;
mod storage;

pub use cachydb_codec::Value;
pub use collection::Collection;
pub use config::{Config, StorageFormat};
pub use database::{Database, DatabaseManager};
pub use document::{Document, ID_FIELD};
pub use engine::{CollectionHandle, DatabaseHandle, Engine};
pub use error::{DbError, Result};
pub use index::Index;
pub use query::{Filter, FilterOp, Query};
pub use schema::{Field, FieldType, Schema};
pub use storage::{FlushReport, StorageManager};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
