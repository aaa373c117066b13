//! Documents: primary-keyed JSON-like records.

use cachydb_codec::Value;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Field name under which the primary key travels in serialized form.
pub const ID_FIELD: &str = "_id";

/// A document: a string primary key plus a field-to-value mapping.
///
/// The key is held outside the mapping; serialization promotes it to a
/// top-level `_id` key and deserialization strips it back out, so the wire
/// form is a single flat JSON object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    id: String,
    data: BTreeMap<String, Value>,
}

impl Document {
    /// Creates a document without an ID; the collection assigns one on
    /// insert.
    #[must_use]
    pub fn new(data: BTreeMap<String, Value>) -> Self {
        Self {
            id: String::new(),
            data,
        }
    }

    /// Creates a document with an explicit ID.
    #[must_use]
    pub fn with_id(id: impl Into<String>, data: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// The document's primary key. Empty until assigned.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Assigns the primary key.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// The field mapping, excluding `_id`.
    #[must_use]
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Looks up a field by name. `_id` resolves to the primary key.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == ID_FIELD {
            return Some(Value::String(self.id.clone()));
        }
        self.data.get(field).cloned()
    }

    /// Assigns each field of `patch` onto this document.
    ///
    /// A null value in the patch assigns null; it does not remove the field.
    pub fn apply_patch(&mut self, patch: &BTreeMap<String, Value>) {
        for (field, value) in patch {
            if field == ID_FIELD {
                continue;
            }
            self.data.insert(field.clone(), value.clone());
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.data.len() + 1))?;
        map.serialize_entry(ID_FIELD, &self.id)?;
        for (field, value) in &self.data {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = Document;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object with an optional string _id")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Document, A::Error> {
                let mut id = String::new();
                let mut data = BTreeMap::new();
                while let Some((field, value)) = access.next_entry::<String, Value>()? {
                    if field == ID_FIELD {
                        if let Value::String(s) = value {
                            id = s;
                        }
                    } else {
                        data.insert(field, value);
                    }
                }
                Ok(Document { id, data })
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        Document::new(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn id_is_promoted_on_serialize() {
        let mut d = doc(&[("name", Value::from("Alice"))]);
        d.set_id("abc");
        let json: serde_json::Value = serde_json::to_value(&d).unwrap();
        assert_eq!(json["_id"], "abc");
        assert_eq!(json["name"], "Alice");
    }

    #[test]
    fn id_is_stripped_on_deserialize() {
        let d: Document = serde_json::from_str(r#"{"_id":"xyz","n":1}"#).unwrap();
        assert_eq!(d.id(), "xyz");
        assert!(!d.data().contains_key("_id"));
        assert_eq!(d.get("n"), Some(Value::from(1.0)));
    }

    #[test]
    fn non_string_id_is_ignored() {
        let d: Document = serde_json::from_str(r#"{"_id":42,"n":1}"#).unwrap();
        assert_eq!(d.id(), "");
    }

    #[test]
    fn serde_roundtrip() {
        let mut d = doc(&[
            ("name", Value::from("Bob")),
            ("age", Value::from(25)),
            ("note", Value::Null),
        ]);
        d.set_id("id-1");
        let bytes = serde_json::to_vec(&d).unwrap();
        let restored: Document = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored, d);
    }

    #[test]
    fn get_resolves_id_field() {
        let mut d = doc(&[]);
        d.set_id("k");
        assert_eq!(d.get("_id"), Some(Value::from("k")));
        assert_eq!(d.get("missing"), None);
    }

    #[test]
    fn patch_assigns_null_without_deleting() {
        let mut d = doc(&[("city", Value::from("NY"))]);
        let patch = BTreeMap::from([("city".to_string(), Value::Null)]);
        d.apply_patch(&patch);
        assert_eq!(d.get("city"), Some(Value::Null));
        assert!(d.data().contains_key("city"));
    }

    #[test]
    fn patch_cannot_overwrite_id() {
        let mut d = doc(&[]);
        d.set_id("stable");
        let patch = BTreeMap::from([("_id".to_string(), Value::from("evil"))]);
        d.apply_patch(&patch);
        assert_eq!(d.id(), "stable");
        assert!(!d.data().contains_key("_id"));
    }
}
