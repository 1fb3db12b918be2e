//! Query descriptors and their evaluation.
//!
//! A query filters the collection by type and, optionally, by a full-text
//! prefix over the indexed fields, then sorts by one field. Ties are broken
//! by document id so that results are fully deterministic.

use crate::{store::ReadView, DocType, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Immutable description of a (live) query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    /// Only documents of this type; all types when `None`
    pub doc_type: Option<DocType>,
    /// Full-text prefix filter over the indexed fields
    pub text: Option<String>,
    /// Field to order by (document field or `id`/`createdAt`/`updatedAt`/`revision`)
    pub order_field: String,
    /// Sort direction
    pub direction: Direction,
}

impl QueryDescriptor {
    /// Query every document of a type, ordered by id.
    pub fn new(doc_type: impl Into<DocType>) -> Self {
        Self {
            doc_type: Some(doc_type.into()),
            text: None,
            order_field: "id".to_string(),
            direction: Direction::Ascending,
        }
    }

    /// Query every document regardless of type.
    pub fn all() -> Self {
        Self {
            doc_type: None,
            text: None,
            order_field: "id".to_string(),
            direction: Direction::Ascending,
        }
    }

    /// Restrict results to a full-text prefix match. Blank text means no
    /// filter.
    pub fn matching(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.text = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
        self
    }

    /// Set the ordering.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_field = field.into();
        self.direction = direction;
        self
    }

    /// Whether writes to documents of `doc_type` can affect this query.
    pub fn matches_type(&self, doc_type: &str) -> bool {
        self.doc_type.as_deref().map_or(true, |t| t == doc_type)
    }

    /// Compute the ordered result set against a consistent view.
    pub fn evaluate(&self, view: &ReadView<'_>) -> Vec<Document> {
        let hits = self.text.as_deref().map(|text| view.search(text));

        let mut results: Vec<Document> = view
            .scan(self.doc_type.as_deref())
            .filter(|d| d.is_active())
            .filter(|d| hits.as_ref().map_or(true, |ids| ids.contains(&d.id)))
            .cloned()
            .collect();

        results.sort_by(|a, b| self.compare(a, b));
        results
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let by_field = compare_values(
            &a.sort_value(&self.order_field),
            &b.sort_value(&self.order_field),
        );
        let by_field = match self.direction {
            Direction::Ascending => by_field,
            Direction::Descending => by_field.reverse(),
        };
        // Ties always ascend by id
        by_field.then_with(|| a.id.cmp(&b.id))
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over scalar values: null < bool < number < string.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
