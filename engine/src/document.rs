//! Document types for storing data.

use crate::{error::Result, DocType, Error, RecordId, Revision, Seq, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered mapping of field name to scalar value.
pub type Fields = serde_json::Map<String, Value>;

/// Origin of a document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written by this node
    Local,
    /// Received from the remote endpoint
    Remote,
}

/// Metadata associated with a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// When the document was first created (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the document was last written (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Whether the last write happened locally or came from the remote
    pub origin: Origin,
    /// Store-wide write sequence of the last write, assigned by the store
    #[serde(default)]
    pub seq: Seq,
}

impl Metadata {
    /// Create new metadata for a locally created document.
    pub fn new_local(timestamp: Timestamp) -> Self {
        Self {
            created_at: timestamp,
            updated_at: timestamp,
            origin: Origin::Local,
            seq: 0,
        }
    }

    /// Create new metadata for a document received from the remote.
    pub fn new_remote(created_at: Timestamp, updated_at: Timestamp) -> Self {
        Self {
            created_at,
            updated_at,
            origin: Origin::Remote,
            seq: 0,
        }
    }

    /// Update metadata for a modification.
    pub fn touch(&mut self, timestamp: Timestamp, origin: Origin) {
        self.updated_at = timestamp;
        self.origin = origin;
    }
}

/// A versioned, typed document in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Unique, immutable identifier
    pub id: RecordId,
    /// Type discriminator
    #[serde(rename = "type")]
    pub doc_type: DocType,
    /// Scalar fields
    pub fields: Fields,
    /// Revision, incremented by the store on each write
    pub revision: Revision,
    /// Document metadata
    pub metadata: Metadata,
    /// Soft delete flag (tombstone)
    pub deleted: bool,
}

impl Document {
    /// Create a new local document. The store assigns the revision on `put`.
    pub fn new(
        id: impl Into<RecordId>,
        doc_type: impl Into<DocType>,
        fields: Fields,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            fields,
            revision: 0,
            metadata: Metadata::new_local(timestamp),
            deleted: false,
        }
    }

    /// Builder-style method to set a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Check if document is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Get a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Get a string field value.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Value used to order this document by `field`.
    ///
    /// Document fields take precedence; `id`, `createdAt`, `updatedAt` and
    /// `revision` fall back to metadata. Missing fields order as null.
    pub fn sort_value(&self, field: &str) -> Value {
        if let Some(value) = self.fields.get(field) {
            return value.clone();
        }
        match field {
            "id" => Value::from(self.id.clone()),
            "createdAt" => Value::from(self.metadata.created_at),
            "updatedAt" => Value::from(self.metadata.updated_at),
            "revision" => Value::from(self.revision),
            _ => Value::Null,
        }
    }

    /// Replace all fields, stamping the write time.
    pub fn update_fields(&mut self, fields: Fields, timestamp: Timestamp, origin: Origin) {
        self.fields = fields;
        self.deleted = false;
        self.metadata.touch(timestamp, origin);
    }

    /// Mark document as deleted (tombstone).
    pub fn mark_deleted(&mut self, timestamp: Timestamp, origin: Origin) {
        self.deleted = true;
        self.metadata.touch(timestamp, origin);
    }

    /// Whether two documents carry the same replicated content.
    ///
    /// Revisions, sequence numbers and origin are local bookkeeping and are
    /// not compared.
    pub fn same_content(&self, other: &Document) -> bool {
        self.doc_type == other.doc_type
            && self.deleted == other.deleted
            && self.metadata.updated_at == other.metadata.updated_at
            && self.fields == other.fields
    }

    /// Reject non-scalar field values.
    pub fn validate_scalars(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidDocument("id must not be empty".into()));
        }
        if self.doc_type.is_empty() {
            return Err(Error::InvalidDocument(format!(
                "document {} has an empty type",
                self.id
            )));
        }
        for (name, value) in &self.fields {
            if value.is_array() || value.is_object() {
                return Err(Error::InvalidDocument(format!(
                    "field '{}' of document {} is not a scalar",
                    name, self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(id: &str, title: &str) -> Document {
        Document::new(id, "note", Fields::new(), 1000)
            .with_field("title", title)
            .with_field("content", "body")
    }

    #[test]
    fn create_document() {
        let doc = note("note-1", "Groceries");

        assert_eq!(doc.id, "note-1");
        assert_eq!(doc.doc_type, "note");
        assert_eq!(doc.revision, 0);
        assert_eq!(doc.str_field("title"), Some("Groceries"));
        assert_eq!(doc.metadata.origin, Origin::Local);
        assert!(doc.is_active());
    }

    #[test]
    fn update_document() {
        let mut doc = note("note-1", "Groceries");
        let mut fields = Fields::new();
        fields.insert("title".into(), json!("Hardware"));

        doc.update_fields(fields, 2000, Origin::Remote);

        assert_eq!(doc.str_field("title"), Some("Hardware"));
        assert_eq!(doc.field("content"), None);
        assert_eq!(doc.metadata.updated_at, 2000);
        assert_eq!(doc.metadata.created_at, 1000);
        assert_eq!(doc.metadata.origin, Origin::Remote);
    }

    #[test]
    fn delete_document() {
        let mut doc = note("note-1", "Groceries");
        doc.mark_deleted(2000, Origin::Local);

        assert!(doc.deleted);
        assert!(!doc.is_active());
        assert_eq!(doc.metadata.updated_at, 2000);
        // Fields survive on the tombstone
        assert_eq!(doc.str_field("title"), Some("Groceries"));
    }

    #[test]
    fn sort_value_falls_back_to_metadata() {
        let doc = note("note-1", "Groceries");

        assert_eq!(doc.sort_value("title"), json!("Groceries"));
        assert_eq!(doc.sort_value("createdAt"), json!(1000));
        assert_eq!(doc.sort_value("id"), json!("note-1"));
        assert_eq!(doc.sort_value("missing"), Value::Null);

        let shadowed = doc.with_field("createdAt", 5);
        assert_eq!(shadowed.sort_value("createdAt"), json!(5));
    }

    #[test]
    fn same_content_ignores_bookkeeping() {
        let a = note("note-1", "Groceries");
        let mut b = a.clone();
        b.revision = 7;
        b.metadata.seq = 42;
        b.metadata.origin = Origin::Remote;
        assert!(a.same_content(&b));

        b.metadata.updated_at = 1001;
        assert!(!a.same_content(&b));
    }

    #[test]
    fn rejects_non_scalar_fields() {
        let doc = note("note-1", "Groceries").with_field("tags", json!(["a", "b"]));
        assert!(matches!(
            doc.validate_scalars(),
            Err(Error::InvalidDocument(_))
        ));

        let doc = Document::new("", "note", Fields::new(), 1000);
        assert!(doc.validate_scalars().is_err());
    }

    #[test]
    fn serialization_roundtrip() {
        let doc = note("note-1", "Groceries");
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains(r#""type":"note""#));

        let parsed: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, parsed);
    }
}
