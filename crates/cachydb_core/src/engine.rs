//! Engine facade: the public entry point binding the model to storage.

use crate::collection::Collection;
use crate::config::{validate_name, Config};
use crate::database::{Database, DatabaseManager};
use crate::document::Document;
use crate::error::{DbError, Result};
use crate::query::Query;
use crate::schema::Schema;
use crate::storage::StorageManager;
use cachydb_codec::Value;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

/// Name of the root-directory lock file.
const LOCK_FILE: &str = ".lock";

/// An open CachyDB engine instance.
///
/// Opening loads all on-disk state, replays the WAL, and starts the
/// background WAL batcher and storage flusher. The instance holds an
/// exclusive lock on the root directory for its lifetime; a second engine
/// on the same root is refused.
///
/// ```ignore
/// let engine = Engine::open(Config::default().root_dir("/var/lib/cachydb"))?;
/// let db = engine.default_database()?;
/// db.create_collection("users", None)?;
/// let users = db.collection("users")?;
/// let id = users.insert_json(serde_json::json!({"name": "Alice"}))?;
/// engine.close()?;
/// ```
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    storage: Arc<StorageManager>,
    dbs: Arc<DatabaseManager>,
    closed: AtomicBool,
    _lock: RootLock,
}

impl EngineInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::invalid_argument("engine is closed"));
        }
        Ok(())
    }
}

impl Engine {
    /// Opens the engine rooted at `config.root_dir`.
    pub fn open(config: Config) -> Result<Self> {
        validate_name("database", &config.db_name)?;
        std::fs::create_dir_all(&config.root_dir)?;
        let lock = RootLock::acquire(&config.root_dir)?;

        let storage = StorageManager::open(config.clone())?;
        let dbs = match storage.load_all() {
            Ok(dbs) => dbs,
            Err(e) => {
                // Stop the WAL batcher before surfacing the failure
                let _ = storage.abort();
                return Err(e);
            }
        };

        let engine = Self {
            inner: Arc::new(EngineInner {
                storage,
                dbs,
                closed: AtomicBool::new(false),
                _lock: lock,
            }),
        };
        engine.ensure_default_database(&config.db_name)?;
        Ok(engine)
    }

    /// Opens the engine at `path` with default settings.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::default().root_dir(path.as_ref()))
    }

    /// Creates the configured default database when it does not exist yet.
    fn ensure_default_database(&self, name: &str) -> Result<()> {
        if !self.inner.dbs.contains(name) {
            self.inner.dbs.ensure_database(name);
            self.inner.storage.log_create_database(name)?;
        }
        Ok(())
    }

    /// Names of all databases, sorted.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        self.inner.ensure_open()?;
        Ok(self.inner.dbs.list_databases())
    }

    /// Creates a database.
    pub fn create_database(&self, name: &str) -> Result<()> {
        self.inner.ensure_open()?;
        validate_name("database", name)?;
        self.inner.dbs.create_database(name)?;
        self.inner.storage.log_create_database(name)
    }

    /// Deletes a database: removed from memory, logged, files deleted
    /// immediately.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.dbs.remove_database(name)?;
        self.inner.storage.log_delete_database(name)?;
        self.inner.storage.delete_database_files(name)
    }

    /// Returns a handle to a database.
    pub fn database(&self, name: &str) -> Result<DatabaseHandle> {
        self.inner.ensure_open()?;
        let db = self.inner.dbs.database(name)?;
        Ok(DatabaseHandle {
            inner: Arc::clone(&self.inner),
            db,
        })
    }

    /// Returns a handle to the configured default database.
    pub fn default_database(&self) -> Result<DatabaseHandle> {
        let name = self.inner.storage.config().db_name.clone();
        self.database(&name)
    }

    /// Forces a flush of all dirty collections and advances the WAL
    /// checkpoint.
    pub fn flush(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.storage.flush_and_checkpoint()
    }

    /// Rewrites every legacy JSON collection in the binary format. Returns
    /// the number of collections migrated.
    ///
    /// Only meaningful when the engine is configured with the binary format
    /// (the default): later background flushes rewrite collections in the
    /// configured format.
    pub fn migrate_to_binary(&self) -> Result<usize> {
        self.inner.ensure_open()?;
        crate::migrate::migrate_all(&self.inner.storage)
    }

    /// Closes the engine: stops background work, runs a final flush,
    /// checkpoints, and closes the WAL.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.storage.close()
    }

    /// Tears the engine down without the final flush or checkpoint,
    /// approximating an abrupt process exit. Sync-logged mutations survive
    /// in the WAL and are replayed on the next open; this is the hook
    /// crash-recovery tests build on.
    pub fn abort(self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.storage.abort()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.inner.storage.close() {
                error!("engine close on drop failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("databases", &self.inner.dbs.list_databases())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Handle to one database of an open engine.
pub struct DatabaseHandle {
    inner: Arc<EngineInner>,
    db: Arc<Database>,
}

impl DatabaseHandle {
    /// The database's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.db.name()
    }

    /// The database's schema version.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.db.schema_version()
    }

    /// Creates a collection with an optional schema.
    pub fn create_collection(
        &self,
        name: &str,
        schema: Option<Schema>,
    ) -> Result<CollectionHandle> {
        self.inner.ensure_open()?;
        validate_name("collection", name)?;
        let coll = self.db.create_collection(name, schema)?;
        self.inner
            .storage
            .log_create_collection(self.db.name(), name, coll.schema())?;
        Ok(CollectionHandle {
            inner: Arc::clone(&self.inner),
            db_name: self.db.name().to_string(),
            coll,
        })
    }

    /// Names of all collections, sorted.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.ensure_open()?;
        Ok(self.db.list_collections())
    }

    /// Returns a handle to a collection.
    pub fn collection(&self, name: &str) -> Result<CollectionHandle> {
        self.inner.ensure_open()?;
        let coll = self.db.collection(name)?;
        Ok(CollectionHandle {
            inner: Arc::clone(&self.inner),
            db_name: self.db.name().to_string(),
            coll,
        })
    }

    /// Deletes a collection. The in-memory removal is immediate; the
    /// directory is pruned by the next database flush.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        self.inner.ensure_open()?;
        self.db.remove_collection(name)?;
        self.inner
            .storage
            .log_delete_collection(self.db.name(), name)
    }
}

/// Handle to one collection of an open engine.
///
/// Mutations apply to the in-memory model and are logged to the WAL with a
/// sync append before returning; the collection's write lock is held across
/// both steps, so WAL offsets reflect the order in which mutations were
/// serialized.
pub struct CollectionHandle {
    inner: Arc<EngineInner>,
    db_name: String,
    coll: Arc<Collection>,
}

impl CollectionHandle {
    /// The collection's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.coll.name()
    }

    /// The collection's schema, if any.
    #[must_use]
    pub fn schema(&self) -> Option<&Schema> {
        self.coll.schema()
    }

    /// Number of documents.
    pub fn count(&self) -> Result<usize> {
        self.inner.ensure_open()?;
        Ok(self.coll.len())
    }

    /// Inserts a document, returning its (possibly assigned) ID.
    pub fn insert(&self, doc: Document) -> Result<String> {
        self.inner.ensure_open()?;
        let mut state = self.coll.state().write();
        let stored = state.insert(doc, self.coll.schema())?;
        self.inner
            .storage
            .log_insert(&self.db_name, self.coll.name(), &stored)?;
        Ok(stored.id().to_string())
    }

    /// Inserts a document given as a JSON object.
    pub fn insert_json(&self, value: serde_json::Value) -> Result<String> {
        let doc: Document = serde_json::from_value(value)
            .map_err(|e| DbError::invalid_argument(format!("document is not a JSON object: {e}")))?;
        self.insert(doc)
    }

    /// Applies a field-level patch to a document and returns the updated
    /// document.
    pub fn update(&self, id: &str, patch: BTreeMap<String, Value>) -> Result<Document> {
        self.inner.ensure_open()?;
        let mut state = self.coll.state().write();
        let updated = state.update(id, &patch, self.coll.schema())?;
        self.inner
            .storage
            .log_update(&self.db_name, self.coll.name(), &updated)?;
        Ok(updated)
    }

    /// Deletes a document by ID.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.inner.ensure_open()?;
        let mut state = self.coll.state().write();
        state.delete(id)?;
        self.inner
            .storage
            .log_delete(&self.db_name, self.coll.name(), id)
    }

    /// Looks up a document by ID.
    pub fn find_by_id(&self, id: &str) -> Result<Document> {
        self.inner.ensure_open()?;
        self.coll.find_by_id(id).ok_or_else(|| {
            DbError::not_found(format!(
                "document '{id}' in collection '{}/{}'",
                self.db_name,
                self.coll.name()
            ))
        })
    }

    /// Runs a query.
    pub fn find(&self, query: &Query) -> Result<Vec<Document>> {
        self.inner.ensure_open()?;
        Ok(self.coll.find(query))
    }

    /// Creates a secondary index over a field.
    pub fn create_index(&self, name: &str, field: &str) -> Result<()> {
        self.inner.ensure_open()?;
        validate_name("index", name)?;
        let mut state = self.coll.state().write();
        state.create_index(name, field)?;
        self.inner
            .storage
            .log_create_index(&self.db_name, self.coll.name(), name, field)
    }
}

/// Exclusive lock on the engine root directory.
///
/// The advisory lock is released when the file handle drops, including on
/// process death, so a crashed engine never wedges its root.
struct RootLock {
    _file: File,
}

impl RootLock {
    fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(DbError::conflict(format!(
                "root directory '{}' is locked by another engine instance",
                root.display()
            )));
        }
        Ok(Self { _file: file })
    }
}
