//! Storage-format migration: legacy JSON collections to the binary store.
//!
//! Collections written by early versions keep their documents in a plain
//! `documents.json` array. Migration loads such a collection, rewrites it in
//! the binary format (compressed framed records, offset index, persisted
//! secondary indexes), and removes the legacy file. Collections already in
//! the binary format are left untouched.

use crate::config::StorageFormat;
use crate::error::Result;
use crate::storage::StorageManager;
use std::fs;
use tracing::{info, warn};

/// Migrates one collection to the binary format.
///
/// Returns `true` when the collection was rewritten, `false` when it was
/// already binary.
pub fn migrate_collection(storage: &StorageManager, db: &str, coll: &str) -> Result<bool> {
    if storage.collection_format(db, coll)? == StorageFormat::Binary {
        return Ok(false);
    }

    let loaded = storage.load_collection(db, coll)?;
    storage.save_collection_as(db, &loaded, StorageFormat::Binary)?;

    let legacy = storage.legacy_docs_path(db, coll);
    if let Err(e) = fs::remove_file(&legacy) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove legacy file {}: {e}", legacy.display());
        }
    }

    info!("migrated collection '{db}/{coll}' to binary format");
    Ok(true)
}

/// Migrates every legacy collection of one database.
///
/// Returns the number of collections rewritten.
pub fn migrate_database(storage: &StorageManager, db: &str) -> Result<usize> {
    let mut migrated = 0;
    for coll in storage.list_collection_dirs(db)? {
        if migrate_collection(storage, db, &coll)? {
            migrated += 1;
        }
    }
    Ok(migrated)
}

/// Migrates every legacy collection under the root.
///
/// Returns the number of collections rewritten.
pub fn migrate_all(storage: &StorageManager) -> Result<usize> {
    let mut migrated = 0;
    for db in storage.list_database_dirs()? {
        migrated += migrate_database(storage, &db)?;
    }
    if migrated > 0 {
        info!("migration complete: {migrated} collection(s) rewritten");
    }
    Ok(migrated)
}
