//! Collections: named document sets with indexes and optional schemas.

use crate::document::{Document, ID_FIELD};
use crate::error::{DbError, Result};
use crate::index::Index;
use crate::query::{FilterOp, Query};
use crate::schema::Schema;
use cachydb_codec::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A named set of documents with a unique `_id` index, secondary hash
/// indexes, and an optional schema.
///
/// The document map and the indexes live behind a single reader-writer lock;
/// every mutation holds the write lock for the whole operation so the
/// invariant "documents and indexes agree" is never observable as broken.
pub struct Collection {
    name: String,
    schema: Option<Schema>,
    state: RwLock<CollectionState>,
}

/// The lock-guarded interior of a collection.
pub(crate) struct CollectionState {
    name: String,
    pub(crate) documents: BTreeMap<String, Document>,
    pub(crate) indexes: BTreeMap<String, Index>,
}

impl Collection {
    /// Creates an empty collection with the implicit `_id` index.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Option<Schema>) -> Self {
        let name = name.into();
        let mut indexes = BTreeMap::new();
        indexes.insert(ID_FIELD.to_string(), Index::primary());
        Self {
            schema,
            state: RwLock::new(CollectionState {
                name: name.clone(),
                documents: BTreeMap::new(),
                indexes,
            }),
            name,
        }
    }

    /// Reconstructs a collection from loaded state.
    ///
    /// Ensures the `_id` index exists, rebuilding it by scan when the
    /// persisted copy is missing.
    pub(crate) fn from_parts(
        name: impl Into<String>,
        schema: Option<Schema>,
        documents: BTreeMap<String, Document>,
        mut indexes: BTreeMap<String, Index>,
    ) -> Self {
        let name = name.into();
        let primary = indexes
            .entry(ID_FIELD.to_string())
            .or_insert_with(Index::primary);
        if primary.len() != documents.len() {
            primary.rebuild(documents.values());
        }
        Self {
            schema,
            state: RwLock::new(CollectionState {
                name: name.clone(),
                documents,
                indexes,
            }),
            name,
        }
    }

    /// The collection's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection's schema, if any.
    #[must_use]
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// The guarded interior, for callers that must hold the write lock
    /// across more than one step (the mutation-then-log path).
    pub(crate) fn state(&self) -> &RwLock<CollectionState> {
        &self.state
    }

    /// Looks up a document by primary key.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<Document> {
        self.state.read().find_by_id(id)
    }

    /// Runs a query.
    #[must_use]
    pub fn find(&self, query: &Query) -> Vec<Document> {
        self.state.read().find(query)
    }

    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    /// Whether the collection holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all documents, in key order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Document> {
        self.state.read().documents.values().cloned().collect()
    }

    /// Snapshot of all indexes.
    pub(crate) fn index_snapshot(&self) -> Vec<Index> {
        self.state.read().indexes.values().cloned().collect()
    }

    /// Index name to indexed field, for collection metadata.
    #[must_use]
    pub fn index_fields(&self) -> BTreeMap<String, String> {
        self.state
            .read()
            .indexes
            .values()
            .map(|i| (i.name.clone(), i.field_name.clone()))
            .collect()
    }
}

impl CollectionState {
    /// Inserts a document, assigning a UUID-v4 primary key when absent.
    pub(crate) fn insert(
        &mut self,
        mut doc: Document,
        schema: Option<&Schema>,
    ) -> Result<Document> {
        if doc.id().is_empty() {
            doc.set_id(Uuid::new_v4().to_string());
        }
        if self.documents.contains_key(doc.id()) {
            return Err(DbError::conflict(format!(
                "document '{}' already exists in collection '{}'",
                doc.id(),
                self.name
            )));
        }
        if let Some(schema) = schema {
            schema.validate(&doc)?;
        }

        for index in self.indexes.values_mut() {
            index.add(&doc);
        }
        self.documents.insert(doc.id().to_string(), doc.clone());
        Ok(doc)
    }

    /// Applies a field-level patch to an existing document.
    pub(crate) fn update(
        &mut self,
        id: &str,
        patch: &BTreeMap<String, Value>,
        schema: Option<&Schema>,
    ) -> Result<Document> {
        let Some(existing) = self.documents.get(id) else {
            return Err(DbError::not_found(format!(
                "document '{id}' in collection '{}'",
                self.name
            )));
        };

        let mut updated = existing.clone();
        updated.apply_patch(patch);
        if let Some(schema) = schema {
            schema.validate(&updated)?;
        }

        let old = self.documents.insert(id.to_string(), updated.clone());
        if let Some(old) = old {
            for index in self.indexes.values_mut() {
                index.remove(&old);
                index.add(&updated);
            }
        }
        Ok(updated)
    }

    /// Removes a document and all of its index entries.
    pub(crate) fn delete(&mut self, id: &str) -> Result<Document> {
        let Some(doc) = self.documents.remove(id) else {
            return Err(DbError::not_found(format!(
                "document '{id}' in collection '{}'",
                self.name
            )));
        };
        for index in self.indexes.values_mut() {
            index.remove(&doc);
        }
        Ok(doc)
    }

    /// Unconditionally installs a document, replacing any existing one.
    ///
    /// WAL replay applies inserts and updates through this path: a
    /// background flush may already have persisted the very state a
    /// replayed entry describes, so replay must be idempotent.
    pub(crate) fn replace(&mut self, doc: Document) {
        if let Some(old) = self.documents.remove(doc.id()) {
            for index in self.indexes.values_mut() {
                index.remove(&old);
            }
        }
        for index in self.indexes.values_mut() {
            index.add(&doc);
        }
        self.documents.insert(doc.id().to_string(), doc);
    }

    /// Creates a named index over a field and builds it by scan.
    pub(crate) fn create_index(&mut self, name: &str, field_name: &str) -> Result<()> {
        if self.indexes.contains_key(name) {
            return Err(DbError::conflict(format!(
                "index '{name}' already exists in collection '{}'",
                self.name
            )));
        }
        let mut index = Index::new(name, field_name);
        index.rebuild(self.documents.values());
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    /// Looks up a document by primary key via the `_id` index.
    pub(crate) fn find_by_id(&self, id: &str) -> Option<Document> {
        let id = self.indexes.get(ID_FIELD)?.lookup(id)?;
        self.documents.get(id).cloned()
    }

    /// Runs a query, seeding candidates from a hash index when the first
    /// filter is an equality test on an indexed field.
    ///
    /// Non-scalar equality operands cannot be answered by a hash index and
    /// fall back to the scan path.
    pub(crate) fn find(&self, query: &Query) -> Vec<Document> {
        if let Some(first) = query.filters.first() {
            if first.op == FilterOp::Eq {
                if let Some(key) = first.value.index_key() {
                    if let Some(index) = self
                        .indexes
                        .values()
                        .find(|i| i.field_name == first.field)
                    {
                        let candidate = index
                            .lookup(&key)
                            .and_then(|id| self.documents.get(id));
                        return query.evaluate(candidate);
                    }
                }
            }
        }
        query.evaluate(self.documents.values())
    }
}
