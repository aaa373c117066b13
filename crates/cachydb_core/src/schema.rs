//! Optional per-collection schemas.

use crate::document::Document;
use crate::error::{DbError, Result};
use cachydb_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// IEEE-754 double.
    Number,
    /// Boolean.
    Boolean,
    /// Nested object.
    Object,
    /// List of values.
    Array,
    /// ISO-8601 string or numeric timestamp.
    Date,
}

impl FieldType {
    /// Whether `value` conforms to this type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => matches!(value, Value::String(_)),
            FieldType::Number => matches!(value, Value::Number(_)),
            FieldType::Boolean => matches!(value, Value::Bool(_)),
            FieldType::Object => matches!(value, Value::Object(_)),
            FieldType::Array => matches!(value, Value::Array(_)),
            FieldType::Date => matches!(value, Value::String(_) | Value::Number(_)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Date => "date",
        }
    }
}

/// A single field rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field must be present.
    #[serde(default)]
    pub required: bool,
}

impl Field {
    /// A required field of the given type.
    #[must_use]
    pub const fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
        }
    }

    /// An optional field of the given type.
    #[must_use]
    pub const fn optional(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
        }
    }
}

/// A collection schema: rules for declared fields.
///
/// Only declared fields are checked; documents may carry any number of
/// additional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schema {
    /// Field name to rule.
    pub fields: BTreeMap<String, Field>,
}

impl Schema {
    /// Creates a schema from field rules.
    #[must_use]
    pub fn new(fields: BTreeMap<String, Field>) -> Self {
        Self { fields }
    }

    /// Validates a document against this schema.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::SchemaViolation`] when a required field is missing
    /// or a declared field has the wrong type. An explicit null is a type
    /// mismatch for every declared type: declared fields are either absent
    /// (allowed when optional) or hold a value of their declared type.
    pub fn validate(&self, doc: &Document) -> Result<()> {
        for (name, rule) in &self.fields {
            match doc.data().get(name) {
                None => {
                    if rule.required {
                        return Err(DbError::schema_violation(format!(
                            "required field '{name}' is missing"
                        )));
                    }
                }
                Some(value) => {
                    if !rule.field_type.accepts(value) {
                        return Err(DbError::schema_violation(format!(
                            "field '{name}' expects {} but got {}",
                            rule.field_type.name(),
                            value.type_name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(fields: &[(&str, Field)]) -> Schema {
        Schema::new(
            fields
                .iter()
                .map(|(name, field)| ((*name).to_string(), *field))
                .collect(),
        )
    }

    fn doc(pairs: &[(&str, Value)]) -> Document {
        Document::new(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn missing_required_field() {
        let s = schema(&[("name", Field::required(FieldType::String))]);
        let err = s.validate(&doc(&[])).unwrap_err();
        assert!(matches!(err, DbError::SchemaViolation { .. }));
    }

    #[test]
    fn wrong_type() {
        let s = schema(&[("name", Field::required(FieldType::String))]);
        let err = s.validate(&doc(&[("name", Value::from(123))])).unwrap_err();
        assert!(matches!(err, DbError::SchemaViolation { .. }));
    }

    #[test]
    fn valid_document() {
        let s = schema(&[
            ("name", Field::required(FieldType::String)),
            ("age", Field::optional(FieldType::Number)),
        ]);
        s.validate(&doc(&[("name", Value::from("Alice"))])).unwrap();
        s.validate(&doc(&[
            ("name", Value::from("Bob")),
            ("age", Value::from(30)),
        ]))
        .unwrap();
    }

    #[test]
    fn explicit_null_is_a_type_mismatch() {
        let s = schema(&[
            ("name", Field::required(FieldType::String)),
            ("age", Field::optional(FieldType::Number)),
        ]);

        // Null never satisfies a declared type, required or not
        let err = s.validate(&doc(&[("name", Value::Null)])).unwrap_err();
        assert!(matches!(err, DbError::SchemaViolation { .. }));

        let err = s
            .validate(&doc(&[("name", Value::from("A")), ("age", Value::Null)]))
            .unwrap_err();
        assert!(matches!(err, DbError::SchemaViolation { .. }));
    }

    #[test]
    fn null_in_undeclared_field_passes() {
        let s = schema(&[("name", Field::required(FieldType::String))]);
        s.validate(&doc(&[
            ("name", Value::from("A")),
            ("note", Value::Null),
        ]))
        .unwrap();
    }

    #[test]
    fn undeclared_fields_pass() {
        let s = schema(&[("name", Field::required(FieldType::String))]);
        s.validate(&doc(&[
            ("name", Value::from("A")),
            ("anything", Value::Bool(true)),
        ]))
        .unwrap();
    }

    #[test]
    fn date_accepts_string_and_number() {
        let s = schema(&[("at", Field::required(FieldType::Date))]);
        s.validate(&doc(&[("at", Value::from("2024-01-01T00:00:00Z"))]))
            .unwrap();
        s.validate(&doc(&[("at", Value::from(1_700_000_000.0))]))
            .unwrap();
        assert!(s.validate(&doc(&[("at", Value::Bool(true))])).is_err());
    }

    #[test]
    fn serde_shape_matches_disk_format() {
        let s = schema(&[("name", Field::required(FieldType::String))]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["fields"]["name"]["type"], "string");
        assert_eq!(json["fields"]["name"]["required"], true);

        let parsed: Schema =
            serde_json::from_str(r#"{"fields":{"age":{"type":"number"}}}"#).unwrap();
        assert!(!parsed.fields["age"].required);
    }
}
