//! Storage manager: persistence, dirty tracking, background flush, recovery.

use crate::collection::Collection;
use crate::config::{is_wal_artifact, Config, StorageFormat};
use crate::database::{Database, DatabaseManager, DEFAULT_SCHEMA_VERSION};
use crate::document::{Document, ID_FIELD};
use crate::error::{DbError, Result};
use crate::index::{self, Index, INDEXES_DIR};
use crate::schema::Schema;
use crate::store::{self, CollectionReader, LEGACY_DOCS_FILE, META_FILE};
use crate::wal::{IndexSpecPayload, WalEntry, WalManager, WalOp};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one dirty-set flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries drained from the dirty set this pass.
    pub attempted: usize,
    /// Entries that failed and were re-queued.
    pub failed: usize,
}

/// A database or collection awaiting its background rewrite.
#[derive(Debug, Clone)]
struct DirtyEntry {
    database: String,
    /// `None` marks the whole database dirty.
    collection: Option<String>,
    #[allow(dead_code)]
    timestamp: DateTime<Utc>,
}

/// `db.meta.json` contents.
#[derive(Debug, Serialize, Deserialize)]
struct DatabaseMeta {
    name: String,
    #[serde(default = "default_schema_version")]
    schema_version: u32,
}

fn default_schema_version() -> u32 {
    DEFAULT_SCHEMA_VERSION
}

/// `collection.meta.json` contents.
#[derive(Debug, Serialize, Deserialize)]
struct CollectionMeta {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema: Option<Schema>,
    /// Index name to indexed field.
    indexes: BTreeMap<String, String>,
    /// Collections written before the binary store default to the legacy
    /// JSON format when the field is absent.
    #[serde(default = "default_format")]
    format: StorageFormat,
}

fn default_format() -> StorageFormat {
    StorageFormat::Json
}

/// Binds the in-memory model to the WAL and the collection stores.
///
/// All durable writes funnel through here: mutations log to the WAL
/// synchronously and mark their collection dirty; a background thread
/// rewrites dirty collections every few seconds and advances the WAL
/// checkpoint once a whole batch lands.
pub struct StorageManager {
    root: PathBuf,
    config: Config,
    wal: Arc<WalManager>,
    dirty: Mutex<HashMap<String, DirtyEntry>>,
    dbs: RwLock<Option<Arc<DatabaseManager>>>,
    stop_tx: Sender<()>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    stop_rx: crossbeam_channel::Receiver<()>,
}

impl StorageManager {
    /// Creates the root directory and opens the WAL. The background flusher
    /// starts once [`StorageManager::load_all`] has produced the model.
    pub fn open(config: Config) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.root_dir)?;
        let wal = WalManager::open(&config.root_dir, &config)?;
        let (stop_tx, stop_rx) = bounded::<()>(1);

        Ok(Arc::new(Self {
            root: config.root_dir.clone(),
            config,
            wal,
            dirty: Mutex::new(HashMap::new()),
            dbs: RwLock::new(None),
            stop_tx,
            flusher: Mutex::new(None),
            stop_rx,
        }))
    }

    /// The WAL handle.
    #[must_use]
    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Loads every on-disk database, replays the WAL, and starts the
    /// background flusher.
    pub fn load_all(self: &Arc<Self>) -> Result<Arc<DatabaseManager>> {
        let dm = Arc::new(DatabaseManager::new());

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_wal_artifact(&name) {
                continue;
            }
            let db = self.load_database(&name)?;
            dm.install_database(db);
        }

        self.replay(&dm)?;

        *self.dbs.write() = Some(Arc::clone(&dm));
        self.start_flusher();
        Ok(dm)
    }

    /// Spawns the dirty-set flusher thread.
    fn start_flusher(self: &Arc<Self>) {
        let ticker = tick(self.config.sync_interval);
        let stop_rx = self.stop_rx.clone();
        let manager = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("cachydb-storage-sync".into())
            .spawn(move || loop {
                select! {
                    recv(ticker) -> _ => manager.sync_dirty(),
                    recv(stop_rx) -> _ => return,
                }
            });
        match handle {
            Ok(handle) => *self.flusher.lock() = Some(handle),
            Err(e) => error!("failed to start storage flusher: {e}"),
        }
    }

    // ------------------------------------------------------------------
    // WAL logging (sync paths used by every caller-visible mutation)
    // ------------------------------------------------------------------

    /// Logs a document insert and marks the collection dirty.
    pub fn log_insert(&self, db: &str, coll: &str, doc: &Document) -> Result<()> {
        let data = encode_document(doc)?;
        self.wal.append_sync(
            WalEntry::new(WalOp::Insert, db)
                .collection(coll)
                .document(doc.id())
                .data(data),
        )?;
        self.mark_dirty(db, Some(coll));
        Ok(())
    }

    /// Logs a document update (full post-image) and marks the collection
    /// dirty.
    pub fn log_update(&self, db: &str, coll: &str, doc: &Document) -> Result<()> {
        let data = encode_document(doc)?;
        self.wal.append_sync(
            WalEntry::new(WalOp::Update, db)
                .collection(coll)
                .document(doc.id())
                .data(data),
        )?;
        self.mark_dirty(db, Some(coll));
        Ok(())
    }

    /// Logs a document delete and marks the collection dirty.
    pub fn log_delete(&self, db: &str, coll: &str, doc_id: &str) -> Result<()> {
        self.wal.append_sync(
            WalEntry::new(WalOp::Delete, db)
                .collection(coll)
                .document(doc_id),
        )?;
        self.mark_dirty(db, Some(coll));
        Ok(())
    }

    /// Logs a database creation and marks the database dirty.
    pub fn log_create_database(&self, db: &str) -> Result<()> {
        self.wal
            .append_sync(WalEntry::new(WalOp::CreateDatabase, db))?;
        self.mark_dirty(db, None);
        Ok(())
    }

    /// Logs a database deletion. File removal is immediate, so nothing is
    /// marked dirty.
    pub fn log_delete_database(&self, db: &str) -> Result<()> {
        self.wal
            .append_sync(WalEntry::new(WalOp::DeleteDatabase, db))?;
        Ok(())
    }

    /// Logs a collection creation and marks the database dirty.
    pub fn log_create_collection(
        &self,
        db: &str,
        coll: &str,
        schema: Option<&Schema>,
    ) -> Result<()> {
        let data = match schema {
            Some(schema) => serde_json::to_vec(schema).map_err(|e| {
                DbError::internal(format!("failed to encode schema for '{db}/{coll}': {e}"))
            })?,
            None => Vec::new(),
        };
        self.wal.append_sync(
            WalEntry::new(WalOp::CreateCollection, db)
                .collection(coll)
                .data(data),
        )?;
        self.mark_dirty(db, None);
        Ok(())
    }

    /// Logs a collection deletion and marks the database dirty; the
    /// directory is pruned by the next database rewrite.
    pub fn log_delete_collection(&self, db: &str, coll: &str) -> Result<()> {
        self.wal
            .append_sync(WalEntry::new(WalOp::DeleteCollection, db).collection(coll))?;
        self.mark_dirty(db, None);
        Ok(())
    }

    /// Logs an index creation and marks the collection dirty.
    pub fn log_create_index(
        &self,
        db: &str,
        coll: &str,
        index_name: &str,
        field_name: &str,
    ) -> Result<()> {
        let payload = IndexSpecPayload {
            index_name: index_name.to_string(),
            field_name: field_name.to_string(),
        };
        let data = serde_json::to_vec(&payload).map_err(|e| {
            DbError::internal(format!(
                "failed to encode index spec for '{db}/{coll}': {e}"
            ))
        })?;
        self.wal.append_sync(
            WalEntry::new(WalOp::CreateIndex, db)
                .collection(coll)
                .data(data),
        )?;
        self.mark_dirty(db, Some(coll));
        Ok(())
    }

    /// Queues a database (`collection` = `None`) or collection for the next
    /// background rewrite.
    pub fn mark_dirty(&self, db: &str, collection: Option<&str>) {
        let key = match collection {
            Some(coll) => format!("{db}/{coll}"),
            None => db.to_string(),
        };
        self.dirty.lock().insert(
            key,
            DirtyEntry {
                database: db.to_string(),
                collection: collection.map(str::to_string),
                timestamp: Utc::now(),
            },
        );
    }

    // ------------------------------------------------------------------
    // Background flush
    // ------------------------------------------------------------------

    /// One flusher round: drain the dirty set, rewrite each entry, advance
    /// the checkpoint when everything landed. Failures are logged and the
    /// entry is re-queued; a round with any failure leaves the checkpoint
    /// where it was.
    fn sync_dirty(&self) {
        let report = self.flush_dirty();
        if report.attempted > 0 && report.failed == 0 {
            if let Err(e) = self.checkpoint() {
                error!("checkpoint after storage sync failed: {e}");
            }
        }
    }

    /// Rewrites everything in the dirty set, re-queueing failures.
    pub fn flush_dirty(&self) -> FlushReport {
        let to_sync: Vec<(String, DirtyEntry)> = {
            let mut dirty = self.dirty.lock();
            dirty.drain().collect()
        };
        let mut report = FlushReport {
            attempted: to_sync.len(),
            failed: 0,
        };
        if to_sync.is_empty() {
            return report;
        }

        let Some(dm) = self.dbs.read().clone() else {
            // Not loaded yet; put everything back
            let mut dirty = self.dirty.lock();
            for (key, entry) in to_sync {
                dirty.insert(key, entry);
            }
            report.failed = report.attempted;
            return report;
        };

        for (key, entry) in to_sync {
            if let Err(e) = self.flush_entry(&dm, &entry) {
                warn!("failed to sync '{key}' to storage, requeueing: {e}");
                self.dirty.lock().insert(key, entry);
                report.failed += 1;
            }
        }
        report
    }

    fn flush_entry(&self, dm: &DatabaseManager, entry: &DirtyEntry) -> Result<()> {
        // The model may have dropped the object since it was marked; a
        // deleted database's files are already gone, a deleted collection's
        // directory is pruned by its database rewrite.
        let Ok(db) = dm.database(&entry.database) else {
            return Ok(());
        };
        match &entry.collection {
            None => self.save_database(&db),
            Some(coll_name) => match db.collection(coll_name) {
                Ok(coll) => self.save_collection(&entry.database, &coll),
                Err(_) => self.save_database(&db),
            },
        }
    }

    /// Advances the WAL checkpoint to the last assigned offset.
    pub fn checkpoint(&self) -> Result<()> {
        self.wal.advance_checkpoint(self.wal.last_offset())
    }

    /// Flushes all dirty state and checkpoints, regardless of whether the
    /// dirty set was empty. Fails without checkpointing if any rewrite
    /// failed.
    pub fn flush_and_checkpoint(&self) -> Result<()> {
        let report = self.flush_dirty();
        if report.failed > 0 {
            return Err(DbError::internal(format!(
                "{} dirty entries failed to flush; checkpoint not advanced",
                report.failed
            )));
        }
        self.checkpoint()
    }

    // ------------------------------------------------------------------
    // Save / load
    // ------------------------------------------------------------------

    fn database_dir(&self, db: &str) -> PathBuf {
        self.root.join(db)
    }

    fn collection_dir(&self, db: &str, coll: &str) -> PathBuf {
        self.root.join(db).join(coll)
    }

    /// Writes a database's metadata and every collection, then prunes
    /// directories of collections that no longer exist in memory.
    pub fn save_database(&self, db: &Database) -> Result<()> {
        let dir = self.database_dir(db.name());
        fs::create_dir_all(&dir)?;

        let meta = DatabaseMeta {
            name: db.name().to_string(),
            schema_version: db.schema_version(),
        };
        write_json(&dir.join("db.meta.json"), &meta)?;

        let live: Vec<Arc<Collection>> = db.collection_snapshot();
        for coll in &live {
            self.save_collection(db.name(), coll)?;
        }

        // Prune directories left behind by deleted collections
        let live_names: Vec<&str> = live.iter().map(|c| c.name()).collect();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !live_names.iter().any(|n| *n == name) {
                fs::remove_dir_all(entry.path())?;
                debug!("pruned deleted collection directory '{}/{name}'", db.name());
            }
        }
        Ok(())
    }

    /// Rewrites a collection: metadata, document payloads, and persisted
    /// indexes.
    pub fn save_collection(&self, db_name: &str, coll: &Collection) -> Result<()> {
        self.save_collection_as(db_name, coll, self.config.format)
    }

    /// Rewrites a collection in an explicit format (the migration path).
    pub(crate) fn save_collection_as(
        &self,
        db_name: &str,
        coll: &Collection,
        format: StorageFormat,
    ) -> Result<()> {
        let dir = self.collection_dir(db_name, coll.name());
        fs::create_dir_all(&dir)?;

        let meta = CollectionMeta {
            name: coll.name().to_string(),
            schema: coll.schema().cloned(),
            indexes: coll.index_fields(),
            format,
        };
        write_json(&dir.join(META_FILE), &meta)?;

        match format {
            StorageFormat::Binary => {
                let docs = coll.snapshot();
                store::flush_all(&dir, &docs)?;
                let indexes_dir = dir.join(INDEXES_DIR);
                for index in coll.index_snapshot() {
                    index.save(&indexes_dir)?;
                }
            }
            StorageFormat::Json => {
                write_json(&dir.join(LEGACY_DOCS_FILE), &coll.snapshot())?;
            }
        }
        Ok(())
    }

    /// Loads a database directory: metadata plus every collection
    /// subdirectory.
    pub fn load_database(&self, name: &str) -> Result<Arc<Database>> {
        let dir = self.database_dir(name);
        let db = Arc::new(Database::new(name));

        let meta_path = dir.join("db.meta.json");
        if meta_path.exists() {
            let meta: DatabaseMeta = read_json(&meta_path)?;
            db.set_schema_version(meta.schema_version);
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let coll_name = entry.file_name().to_string_lossy().into_owned();
            let coll = self.load_collection(name, &coll_name)?;
            db.install_collection(coll);
        }
        Ok(db)
    }

    /// Loads one collection in whichever format its metadata declares,
    /// rebuilding any index whose file is missing.
    pub fn load_collection(&self, db_name: &str, coll_name: &str) -> Result<Arc<Collection>> {
        let dir = self.collection_dir(db_name, coll_name);
        let meta: CollectionMeta = read_json(&dir.join(META_FILE)).map_err(|e| match e {
            DbError::Io(io) => DbError::corrupt_data(format!(
                "collection '{db_name}/{coll_name}' has no readable metadata: {io}"
            )),
            other => other,
        })?;

        let mut documents = BTreeMap::new();
        let mut indexes = BTreeMap::new();

        match meta.format {
            StorageFormat::Binary => {
                if let Some(reader) = CollectionReader::open(&dir)? {
                    for doc in reader.scan()? {
                        let doc = doc?;
                        documents.insert(doc.id().to_string(), doc);
                    }
                }
                indexes = index::load_all(&dir.join(INDEXES_DIR))?;
            }
            StorageFormat::Json => {
                let docs_path = dir.join(LEGACY_DOCS_FILE);
                if docs_path.exists() {
                    let docs: Vec<Document> = read_json(&docs_path)?;
                    for doc in docs {
                        documents.insert(doc.id().to_string(), doc);
                    }
                }
            }
        }

        // Any index declared in the metadata but absent on disk is rebuilt
        // by scanning the loaded documents.
        for (index_name, field_name) in &meta.indexes {
            if index_name == ID_FIELD || indexes.contains_key(index_name) {
                continue;
            }
            let mut index = Index::new(index_name, field_name);
            index.rebuild(documents.values());
            indexes.insert(index_name.clone(), index);
        }

        Ok(Arc::new(Collection::from_parts(
            coll_name,
            meta.schema,
            documents,
            indexes,
        )))
    }

    /// The storage format a collection is currently persisted in, read
    /// from its metadata.
    pub(crate) fn collection_format(&self, db_name: &str, coll_name: &str) -> Result<StorageFormat> {
        let meta: CollectionMeta =
            read_json(&self.collection_dir(db_name, coll_name).join(META_FILE))?;
        Ok(meta.format)
    }

    /// Names of collection directories under a database directory.
    pub(crate) fn list_collection_dirs(&self, db_name: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.database_dir(db_name))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Names of database directories under the root.
    pub(crate) fn list_database_dirs(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_wal_artifact(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path of a collection's legacy JSON document file.
    pub(crate) fn legacy_docs_path(&self, db_name: &str, coll_name: &str) -> PathBuf {
        self.collection_dir(db_name, coll_name).join(LEGACY_DOCS_FILE)
    }

    /// Removes a database's directory tree.
    pub fn delete_database_files(&self, name: &str) -> Result<()> {
        let dir = self.database_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Replays WAL entries past the checkpoint into the model and the
    /// collection files, then advances the checkpoint.
    fn replay(&self, dm: &DatabaseManager) -> Result<()> {
        let checkpoint = self.wal.checkpoint();
        let entries = self
            .wal
            .read_from(checkpoint.offset, self.config.recover_corrupt_wal)?;
        if entries.is_empty() {
            return Ok(());
        }

        info!(
            "replaying {} WAL entries after offset {}",
            entries.len(),
            checkpoint.offset
        );

        let mut last_offset = checkpoint.offset;
        for entry in entries {
            let offset = entry.offset;
            self.apply_entry(dm, entry).map_err(|e| {
                DbError::wal_corrupt(format!("failed to replay entry at offset {offset}: {e}"))
            })?;
            last_offset = offset;
        }

        self.wal.reserve_offsets(last_offset);
        self.wal.advance_checkpoint(last_offset)?;
        info!("WAL replay complete at offset {last_offset}");
        Ok(())
    }

    /// Applies one replayed entry to the model and persists the affected
    /// object.
    ///
    /// Application is idempotent: a crash between a background flush and its
    /// checkpoint legitimately leaves entries that describe already-applied
    /// state.
    fn apply_entry(&self, dm: &DatabaseManager, entry: WalEntry) -> Result<()> {
        match entry.operation {
            WalOp::CreateDatabase => {
                let db = dm.ensure_database(&entry.database);
                self.save_database(&db)
            }
            WalOp::DeleteDatabase => {
                let _ = dm.remove_database(&entry.database);
                self.delete_database_files(&entry.database)
            }
            WalOp::CreateCollection => {
                let coll_name = require_collection(&entry)?;
                let schema = if entry.data.is_empty() {
                    None
                } else {
                    Some(serde_json::from_slice(&entry.data).map_err(|e| {
                        DbError::wal_corrupt(format!("invalid schema payload: {e}"))
                    })?)
                };
                let db = dm.ensure_database(&entry.database);
                db.ensure_collection(&coll_name, schema);
                self.save_database(&db)
            }
            WalOp::DeleteCollection => {
                let coll_name = require_collection(&entry)?;
                let db = dm.ensure_database(&entry.database);
                let _ = db.remove_collection(&coll_name);
                self.save_database(&db)
            }
            WalOp::Insert | WalOp::Update => {
                let coll_name = require_collection(&entry)?;
                let doc: Document = serde_json::from_slice(&entry.data).map_err(|e| {
                    DbError::wal_corrupt(format!("invalid document payload: {e}"))
                })?;
                let db = dm.ensure_database(&entry.database);
                let coll = db.ensure_collection(&coll_name, None);
                coll.state().write().replace(doc);
                self.save_collection(&entry.database, &coll)
            }
            WalOp::Delete => {
                let coll_name = require_collection(&entry)?;
                let doc_id = entry.document_id.as_deref().ok_or_else(|| {
                    DbError::wal_corrupt("delete entry carries no document_id")
                })?;
                let db = dm.ensure_database(&entry.database);
                let coll = db.ensure_collection(&coll_name, None);
                let _ = coll.state().write().delete(doc_id);
                self.save_collection(&entry.database, &coll)
            }
            WalOp::CreateIndex => {
                let coll_name = require_collection(&entry)?;
                let spec: IndexSpecPayload =
                    serde_json::from_slice(&entry.data).map_err(|e| {
                        DbError::wal_corrupt(format!("invalid index payload: {e}"))
                    })?;
                let db = dm.ensure_database(&entry.database);
                let coll = db.ensure_collection(&coll_name, None);
                match coll
                    .state()
                    .write()
                    .create_index(&spec.index_name, &spec.field_name)
                {
                    Ok(()) | Err(DbError::Conflict { .. }) => {}
                    Err(e) => return Err(e),
                }
                self.save_collection(&entry.database, &coll)
            }
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stops the flusher, runs a final flush, checkpoints, and closes the
    /// WAL.
    pub fn close(&self) -> Result<()> {
        self.stop_flusher();
        let flushed = self.flush_and_checkpoint();
        let closed = self.wal.close();
        flushed.and(closed)
    }

    /// Tears down background work without flushing dirty state or
    /// advancing the checkpoint. Recovery tests use this as a stand-in for
    /// an abrupt process exit.
    pub fn abort(&self) -> Result<()> {
        self.stop_flusher();
        self.wal.close()
    }

    fn stop_flusher(&self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
    }
}

fn require_collection(entry: &WalEntry) -> Result<String> {
    entry.collection.clone().ok_or_else(|| {
        DbError::wal_corrupt(format!(
            "{:?} entry for database '{}' carries no collection",
            entry.operation, entry.database
        ))
    })
}

fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    serde_json::to_vec(doc)
        .map_err(|e| DbError::internal(format!("failed to encode document '{}': {e}", doc.id())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| DbError::internal(format!("failed to encode {}: {e}", path.display())))?;
    fs::write(path, data)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data)
        .map_err(|e| DbError::corrupt_data(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachydb_codec::Value;
    use tempfile::tempdir;

    fn config_for(dir: &Path) -> Config {
        Config::default().root_dir(dir)
    }

    fn doc(id: &str, n: f64) -> Document {
        Document::with_id(
            id,
            BTreeMap::from([("n".to_string(), Value::from(n))]),
        )
    }

    #[test]
    fn save_and_load_collection_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = StorageManager::open(config_for(dir.path())).unwrap();

        let db = Database::new("t");
        let coll = db.create_collection("u", None).unwrap();
        {
            let mut state = coll.state().write();
            state.insert(doc("a", 1.0), None).unwrap();
            state.insert(doc("b", 2.0), None).unwrap();
            state.create_index("by_n", "n").unwrap();
        }
        storage.save_database(&db).unwrap();

        let loaded = storage.load_database("t").unwrap();
        let loaded_coll = loaded.collection("u").unwrap();
        assert_eq!(loaded_coll.len(), 2);
        assert_eq!(
            loaded_coll.find_by_id("a").unwrap().get("n"),
            Some(Value::from(1.0))
        );
        // Secondary index came back from its file
        let fields = loaded_coll.index_fields();
        assert_eq!(fields.get("by_n").map(String::as_str), Some("n"));
        storage.abort().unwrap();
    }

    #[test]
    fn missing_index_file_is_rebuilt() {
        let dir = tempdir().unwrap();
        let storage = StorageManager::open(config_for(dir.path())).unwrap();

        let db = Database::new("t");
        let coll = db.create_collection("u", None).unwrap();
        {
            let mut state = coll.state().write();
            state.insert(doc("a", 7.0), None).unwrap();
            state.create_index("by_n", "n").unwrap();
        }
        storage.save_database(&db).unwrap();

        // Blow away the whole indexes directory
        fs::remove_dir_all(dir.path().join("t/u/indexes")).unwrap();

        let loaded = storage.load_collection("t", "u").unwrap();
        let result = loaded.find(
            &crate::query::Query::new().filter("n", crate::query::FilterOp::Eq, 7),
        );
        assert_eq!(result.len(), 1);
        storage.abort().unwrap();
    }

    #[test]
    fn legacy_json_collection_loads() {
        let dir = tempdir().unwrap();
        let storage = StorageManager::open(
            config_for(dir.path()).format(StorageFormat::Json),
        )
        .unwrap();

        let db = Database::new("t");
        let coll = db.create_collection("u", None).unwrap();
        coll.state().write().insert(doc("a", 1.0), None).unwrap();
        storage.save_database(&db).unwrap();

        assert!(dir.path().join("t/u/documents.json").exists());
        assert!(!dir.path().join("t/u/collection.data").exists());

        let loaded = storage.load_collection("t", "u").unwrap();
        assert_eq!(loaded.len(), 1);
        storage.abort().unwrap();
    }

    #[test]
    fn save_database_prunes_deleted_collections() {
        let dir = tempdir().unwrap();
        let storage = StorageManager::open(config_for(dir.path())).unwrap();

        let db = Database::new("t");
        db.create_collection("keep", None).unwrap();
        db.create_collection("drop", None).unwrap();
        storage.save_database(&db).unwrap();
        assert!(dir.path().join("t/drop").exists());

        db.remove_collection("drop").unwrap();
        storage.save_database(&db).unwrap();
        assert!(!dir.path().join("t/drop").exists());
        assert!(dir.path().join("t/keep").exists());
        storage.abort().unwrap();
    }

    #[test]
    fn dirty_set_flush_advances_checkpoint() {
        let dir = tempdir().unwrap();
        let storage = StorageManager::open(config_for(dir.path())).unwrap();
        let dm = storage.load_all().unwrap();

        let db = dm.ensure_database("t");
        let coll = db.ensure_collection("u", None);
        let inserted = {
            let mut state = coll.state().write();
            state.insert(doc("a", 1.0), None).unwrap()
        };
        storage.log_insert("t", "u", &inserted).unwrap();

        assert_eq!(storage.wal().checkpoint().offset, 0);
        storage.flush_and_checkpoint().unwrap();
        assert_eq!(storage.wal().checkpoint().offset, storage.wal().last_offset());
        assert!(dir.path().join("t/u/collection.data").exists());
        storage.abort().unwrap();
    }
}
