//! Hash-based secondary indexes and their persistence.

use crate::document::{Document, ID_FIELD};
use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Name of the per-collection directory holding persisted indexes.
pub const INDEXES_DIR: &str = "indexes";

/// A single-field hash index: stringified field value to document ID.
///
/// Hash indexes serve equality lookups only. Each value slot holds exactly
/// one document ID: when several documents share a field value, the most
/// recently indexed one wins and the others are reachable only by scan.
/// The query executor therefore consults an index solely for a leading `eq`
/// filter; everything else takes the scan path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name, unique within the collection.
    pub name: String,
    /// Document field this index covers.
    pub field_name: String,
    /// Value-to-ID mapping.
    pub data: HashMap<String, String>,
}

impl Index {
    /// Creates an empty index over `field_name`.
    #[must_use]
    pub fn new(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_name: field_name.into(),
            data: HashMap::new(),
        }
    }

    /// The implicit primary-key index every collection carries.
    #[must_use]
    pub fn primary() -> Self {
        Self::new(ID_FIELD, ID_FIELD)
    }

    /// Adds a document's entry, if the indexed field holds a scalar.
    pub fn add(&mut self, doc: &Document) {
        if let Some(key) = doc.get(&self.field_name).and_then(|v| v.index_key()) {
            self.data.insert(key, doc.id().to_string());
        }
    }

    /// Removes a document's entry.
    ///
    /// The slot is only cleared if it still points at this document; a later
    /// insert with the same field value owns the slot.
    pub fn remove(&mut self, doc: &Document) {
        if let Some(key) = doc.get(&self.field_name).and_then(|v| v.index_key()) {
            if self.data.get(&key).is_some_and(|id| id == doc.id()) {
                self.data.remove(&key);
            }
        }
    }

    /// Looks up the document ID indexed under a stringified value.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Discards all entries and re-indexes the given documents.
    pub fn rebuild<'a, I>(&mut self, docs: I)
    where
        I: IntoIterator<Item = &'a Document>,
    {
        self.data.clear();
        for doc in docs {
            self.add(doc);
        }
    }

    /// Number of indexed values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Persists this index to `<dir>/<name>.json` atomically.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.name));
        let tmp = dir.join(format!("{}.json.tmp", self.name));

        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| DbError::internal(format!("failed to encode index '{}': {e}", self.name)))?;
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Loads an index from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| {
            DbError::corrupt_data(format!("index file {}: {e}", path.display()))
        })
    }
}

/// Loads every `*.json` index file under `dir`, keyed by index name.
///
/// A missing directory yields an empty map (new or never-flushed
/// collection).
pub fn load_all(dir: &Path) -> Result<BTreeMap<String, Index>> {
    let mut indexes = BTreeMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(indexes),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let index = Index::load(&path)?;
        indexes.insert(index.name.clone(), index);
    }
    Ok(indexes)
}
