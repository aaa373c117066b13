//! Query filters and their evaluation.

use crate::document::Document;
use cachydb_codec::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Deep equality.
    Eq,
    /// Deep inequality.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Gte,
    /// Less than or equal.
    Lte,
    /// Membership in a list.
    In,
}

/// A single field filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field to test; `_id` addresses the primary key.
    pub field: String,
    /// Comparison operator.
    #[serde(rename = "operator")]
    pub op: FilterOp,
    /// Comparison operand.
    pub value: Value,
}

impl Filter {
    /// Creates a filter.
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Whether `doc` satisfies this filter.
    ///
    /// Equality is deep JSON equality; a missing field equals nothing, so
    /// `eq` fails and `ne` succeeds. The ordering operators compare numbers
    /// numerically and strings lexicographically, and are false on a missing
    /// field or a type mismatch. `in` requires the operand to be a list and
    /// tests membership by equality.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        let field_value = doc.get(&self.field);

        match self.op {
            FilterOp::Eq => field_value.as_ref() == Some(&self.value),
            FilterOp::Ne => field_value.as_ref() != Some(&self.value),
            FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
                let Some(field_value) = field_value else {
                    return false;
                };
                match field_value.compare_order(&self.value) {
                    Some(ord) => match self.op {
                        FilterOp::Gt => ord == Ordering::Greater,
                        FilterOp::Lt => ord == Ordering::Less,
                        FilterOp::Gte => ord != Ordering::Less,
                        FilterOp::Lte => ord != Ordering::Greater,
                        _ => unreachable!(),
                    },
                    None => false,
                }
            }
            FilterOp::In => {
                let (Some(field_value), Some(candidates)) = (field_value, self.value.as_array())
                else {
                    return false;
                };
                candidates.contains(&field_value)
            }
        }
    }
}

/// A query: an AND-ed filter list plus pagination.
///
/// `limit` of 0 means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Query {
    /// Filters, all of which must match.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Number of matching documents to skip.
    #[serde(default)]
    pub skip: usize,
    /// Maximum number of documents to return (0 = unlimited).
    #[serde(default)]
    pub limit: usize,
}

impl Query {
    /// An empty query matching every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::new(field, op, value));
        self
    }

    /// Sets the number of matches to skip.
    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the maximum number of matches returned.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether `doc` satisfies every filter.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Runs the query over a candidate iterator, applying filters and then
    /// skip/limit in encounter order.
    pub fn evaluate<'a, I>(&self, candidates: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let matching = candidates.into_iter().filter(|doc| self.matches(doc));
        let skipped = matching.skip(self.skip);
        if self.limit == 0 {
            skipped.cloned().collect()
        } else {
            skipped.take(self.limit).cloned().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(id: &str, pairs: &[(&str, Value)]) -> Document {
        Document::with_id(
            id,
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn eq_and_ne() {
        let d = doc("a", &[("name", Value::from("Alice"))]);
        assert!(Filter::new("name", FilterOp::Eq, "Alice").matches(&d));
        assert!(!Filter::new("name", FilterOp::Eq, "Bob").matches(&d));
        assert!(Filter::new("name", FilterOp::Ne, "Bob").matches(&d));
        // Missing field: never equal, always not-equal
        assert!(!Filter::new("ghost", FilterOp::Eq, "x").matches(&d));
        assert!(Filter::new("ghost", FilterOp::Ne, "x").matches(&d));
    }

    #[test]
    fn eq_on_id_field() {
        let d = doc("a1", &[]);
        assert!(Filter::new("_id", FilterOp::Eq, "a1").matches(&d));
    }

    #[test]
    fn deep_equality_on_nested_values() {
        let nested = Value::Object(BTreeMap::from([
            ("x".to_string(), Value::from(1.0)),
            ("y".to_string(), Value::from(vec![1.0, 2.0])),
        ]));
        let d = doc("a", &[("pos", nested.clone())]);
        assert!(Filter::new("pos", FilterOp::Eq, nested).matches(&d));
    }

    #[test]
    fn numeric_ordering() {
        let d = doc("a", &[("age", Value::from(30))]);
        assert!(Filter::new("age", FilterOp::Gt, 20).matches(&d));
        assert!(Filter::new("age", FilterOp::Gte, 30).matches(&d));
        assert!(Filter::new("age", FilterOp::Lte, 30).matches(&d));
        assert!(!Filter::new("age", FilterOp::Lt, 30).matches(&d));
    }

    #[test]
    fn string_ordering_is_lexicographic() {
        let d = doc("a", &[("name", Value::from("bob"))]);
        assert!(Filter::new("name", FilterOp::Gt, "alice").matches(&d));
        assert!(Filter::new("name", FilterOp::Lt, "carol").matches(&d));
    }

    #[test]
    fn ordering_false_on_mismatch_or_missing() {
        let d = doc("a", &[("age", Value::from(30))]);
        assert!(!Filter::new("age", FilterOp::Gt, "20").matches(&d));
        assert!(!Filter::new("ghost", FilterOp::Gt, 1).matches(&d));
    }

    #[test]
    fn in_membership() {
        let d = doc("a", &[("color", Value::from("red"))]);
        let list = Value::from(vec!["green", "red"]);
        assert!(Filter::new("color", FilterOp::In, list).matches(&d));
        assert!(!Filter::new("color", FilterOp::In, Value::from(vec!["blue"])).matches(&d));
        // Non-list operand never matches
        assert!(!Filter::new("color", FilterOp::In, "red").matches(&d));
    }

    #[test]
    fn conjunction_skip_limit() {
        let docs: Vec<Document> = (0..10)
            .map(|i| doc(&format!("d{i}"), &[("age", Value::from(f64::from(i)))]))
            .collect();

        let q = Query::new()
            .filter("age", FilterOp::Gte, 5)
            .skip(1)
            .limit(2);
        let result = q.evaluate(docs.iter());
        assert_eq!(result.len(), 2);
        for d in &result {
            let age = d.get("age").and_then(|v| v.as_f64()).unwrap();
            assert!(age >= 5.0);
        }
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let docs: Vec<Document> = (0..4)
            .map(|i| doc(&format!("d{i}"), &[("n", Value::from(f64::from(i)))]))
            .collect();
        let q = Query::new();
        assert_eq!(q.evaluate(docs.iter()).len(), 4);
    }

    #[test]
    fn serde_wire_shape() {
        let q: Query = serde_json::from_str(
            r#"{"filters":[{"field":"name","operator":"eq","value":"Alice"}],"skip":0,"limit":0}"#,
        )
        .unwrap();
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.filters[0].op, FilterOp::Eq);
        assert_eq!(q.filters[0].value, Value::from("Alice"));
    }
}
