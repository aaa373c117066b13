//! Databases and the database manager.

use crate::collection::Collection;
use crate::error::{DbError, Result};
use crate::schema::Schema;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Default schema version for new databases.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// A named set of collections plus a numeric schema version.
pub struct Database {
    name: String,
    schema_version: AtomicU32,
    collections: RwLock<BTreeMap<String, Arc<Collection>>>,
}

impl Database {
    /// Creates an empty database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_version: AtomicU32::new(DEFAULT_SCHEMA_VERSION),
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    /// The database's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current schema version.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.schema_version.load(Ordering::Relaxed)
    }

    /// Sets the schema version (driven by an external migration framework).
    pub fn set_schema_version(&self, version: u32) {
        self.schema_version.store(version, Ordering::Relaxed);
    }

    /// Creates a collection, failing if the name is taken.
    pub fn create_collection(
        &self,
        name: &str,
        schema: Option<Schema>,
    ) -> Result<Arc<Collection>> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(DbError::conflict(format!(
                "collection '{name}' already exists in database '{}'",
                self.name
            )));
        }
        let coll = Arc::new(Collection::new(name, schema));
        collections.insert(name.to_string(), Arc::clone(&coll));
        Ok(coll)
    }

    /// Returns an existing collection, or creates it. Used by WAL replay,
    /// which must tolerate re-applied entries.
    pub(crate) fn ensure_collection(
        &self,
        name: &str,
        schema: Option<Schema>,
    ) -> Arc<Collection> {
        let mut collections = self.collections.write();
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Collection::new(name, schema))),
        )
    }

    /// Installs an already-constructed collection (load path).
    pub(crate) fn install_collection(&self, coll: Arc<Collection>) {
        self.collections
            .write()
            .insert(coll.name().to_string(), coll);
    }

    /// Looks up a collection by name.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections.read().get(name).cloned().ok_or_else(|| {
            DbError::not_found(format!(
                "collection '{name}' in database '{}'",
                self.name
            ))
        })
    }

    /// Removes a collection from the in-memory model.
    pub fn remove_collection(&self, name: &str) -> Result<()> {
        if self.collections.write().remove(name).is_none() {
            return Err(DbError::not_found(format!(
                "collection '{name}' in database '{}'",
                self.name
            )));
        }
        Ok(())
    }

    /// Names of all collections, sorted.
    #[must_use]
    pub fn list_collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Snapshot of all collection handles.
    pub(crate) fn collection_snapshot(&self) -> Vec<Arc<Collection>> {
        self.collections.read().values().cloned().collect()
    }
}

/// The set of databases owned by one engine instance.
pub struct DatabaseManager {
    databases: RwLock<BTreeMap<String, Arc<Database>>>,
}

impl DatabaseManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(BTreeMap::new()),
        }
    }

    /// Looks up a database by name.
    pub fn database(&self, name: &str) -> Result<Arc<Database>> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::not_found(format!("database '{name}'")))
    }

    /// Creates a database, failing if the name is taken.
    pub fn create_database(&self, name: &str) -> Result<Arc<Database>> {
        let mut databases = self.databases.write();
        if databases.contains_key(name) {
            return Err(DbError::conflict(format!("database '{name}' already exists")));
        }
        let db = Arc::new(Database::new(name));
        databases.insert(name.to_string(), Arc::clone(&db));
        Ok(db)
    }

    /// Returns an existing database, or creates it. Used by WAL replay and
    /// the default-database bootstrap.
    pub(crate) fn ensure_database(&self, name: &str) -> Arc<Database> {
        let mut databases = self.databases.write();
        Arc::clone(
            databases
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Database::new(name))),
        )
    }

    /// Installs an already-constructed database (load path).
    pub(crate) fn install_database(&self, db: Arc<Database>) {
        self.databases.write().insert(db.name().to_string(), db);
    }

    /// Removes a database from the in-memory model.
    pub fn remove_database(&self, name: &str) -> Result<()> {
        if self.databases.write().remove(name).is_none() {
            return Err(DbError::not_found(format!("database '{name}'")));
        }
        Ok(())
    }

    /// Whether a database exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.databases.read().contains_key(name)
    }

    /// Names of all databases, sorted.
    #[must_use]
    pub fn list_databases(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    /// Snapshot of all database handles.
    pub(crate) fn database_snapshot(&self) -> Vec<Arc<Database>> {
        self.databases.read().values().cloned().collect()
    }
}

impl Default for DatabaseManager {
    fn default() -> Self {
        Self::new()
    }
}
