//! WAL entry types and serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation recorded by a WAL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalOp {
    /// Document insert; `data` holds the full document JSON.
    Insert,
    /// Document update; `data` holds the full post-image document JSON.
    Update,
    /// Document delete.
    Delete,
    /// Database creation.
    CreateDatabase,
    /// Database deletion.
    DeleteDatabase,
    /// Collection creation; `data` holds the schema JSON, or is empty.
    CreateCollection,
    /// Collection deletion.
    DeleteCollection,
    /// Index creation; `data` holds an [`IndexSpecPayload`].
    CreateIndex,
}

/// A single write-ahead log entry.
///
/// Serialized as JSON and framed by the binary codec. The `data` field is
/// opaque bytes (base64 in the JSON form); its meaning depends on the
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonic sequence number, assigned at append.
    pub offset: u64,
    /// Append time.
    pub timestamp: DateTime<Utc>,
    /// Database the operation targets.
    pub database: String,
    /// Collection the operation targets, when collection-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// The recorded operation.
    pub operation: WalOp,
    /// Document the operation targets, when document-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Operation payload.
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
}

impl WalEntry {
    /// Creates an entry for a database-scoped operation. Offset and
    /// timestamp are assigned by the manager at append time.
    #[must_use]
    pub fn new(operation: WalOp, database: impl Into<String>) -> Self {
        Self {
            offset: 0,
            timestamp: Utc::now(),
            database: database.into(),
            collection: None,
            operation,
            document_id: None,
            data: Vec::new(),
        }
    }

    /// Scopes the entry to a collection.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Scopes the entry to a document.
    #[must_use]
    pub fn document(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    /// Attaches the operation payload.
    #[must_use]
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

/// Payload of a [`WalOp::CreateIndex`] entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpecPayload {
    /// Name of the index.
    pub index_name: String,
    /// Field the index covers.
    pub field_name: String,
}

/// The persisted checkpoint: all entries with `offset ≤ offset` are durably
/// reflected in collection files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalCheckpoint {
    /// Highest durably-reflected offset.
    pub offset: u64,
    /// When the checkpoint was taken.
    pub timestamp: DateTime<Utc>,
}

impl Default for WalCheckpoint {
    fn default() -> Self {
        Self {
            offset: 0,
            timestamp: Utc::now(),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_are_stable() {
        // These strings are the on-disk WAL vocabulary
        let cases = [
            (WalOp::Insert, "\"insert\""),
            (WalOp::Update, "\"update\""),
            (WalOp::Delete, "\"delete\""),
            (WalOp::CreateDatabase, "\"create_database\""),
            (WalOp::DeleteDatabase, "\"delete_database\""),
            (WalOp::CreateCollection, "\"create_collection\""),
            (WalOp::DeleteCollection, "\"delete_collection\""),
            (WalOp::CreateIndex, "\"create_index\""),
        ];
        for (op, expected) in cases {
            assert_eq!(serde_json::to_string(&op).unwrap(), expected);
        }
    }

    #[test]
    fn entry_roundtrip() {
        let entry = WalEntry::new(WalOp::Insert, "t")
            .collection("users")
            .document("abc")
            .data(b"{\"_id\":\"abc\"}".to_vec());
        let json = serde_json::to_vec(&entry).unwrap();
        let decoded: WalEntry = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn data_travels_as_base64() {
        let entry = WalEntry::new(WalOp::Insert, "t").data(vec![0xDE, 0xAD]);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"data\":\"3q0=\""));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let entry = WalEntry::new(WalOp::CreateDatabase, "t");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("collection"));
        assert!(!json.contains("document_id"));
        assert!(!json.contains("data"));

        let decoded: WalEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.collection, None);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn checkpoint_roundtrip() {
        let cp = WalCheckpoint {
            offset: 42,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&cp).unwrap();
        let decoded: WalCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.offset, 42);
    }

    #[test]
    fn index_payload_shape() {
        let payload = IndexSpecPayload {
            index_name: "by_email".into(),
            field_name: "email".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["index_name"], "by_email");
        assert_eq!(json["field_name"], "email");
    }
}
