//! Schema definition and validation.
//!
//! Schemas declare the fields of document types and enable validation of
//! documents before they are written. Types without a declaration are
//! accepted as long as every field is a scalar.

use crate::{error::Result, DocType, Document, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Scalar field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since epoch
    Timestamp,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
        }
    }
}

/// Definition of a field in a document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Schema for one document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSchema {
    /// Type discriminator
    pub name: DocType,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl TypeSchema {
    /// Create a new type schema.
    pub fn new(name: impl Into<DocType>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Validate a document's fields against this schema.
    pub fn validate_fields(&self, document: &Document) -> Result<()> {
        for field in &self.fields {
            field.validate(document.field(&field.name))?;
        }
        Ok(())
    }
}

/// Schema for the entire store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version for migrations
    pub version: SchemaVersion,
    /// Declared types by name
    pub types: HashMap<DocType, TypeSchema>,
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            types: HashMap::new(),
        }
    }

    /// Add a type to the schema.
    pub fn add_type(&mut self, schema: TypeSchema) -> &mut Self {
        self.types.insert(schema.name.clone(), schema);
        self
    }

    /// Builder-style method to add a type.
    pub fn with_type(mut self, schema: TypeSchema) -> Self {
        self.add_type(schema);
        self
    }

    /// Get a type schema by name.
    pub fn get_type(&self, name: &str) -> Option<&TypeSchema> {
        self.types.get(name)
    }

    /// Validate a document before it is written.
    ///
    /// Tombstones only need a valid id and type.
    pub fn validate_document(&self, document: &Document) -> Result<()> {
        document.validate_scalars()?;
        if document.deleted {
            return Ok(());
        }
        if let Some(schema) = self.types.get(&document.doc_type) {
            schema.validate_fields(document)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fields;
    use serde_json::json;

    fn test_schema() -> Schema {
        Schema::new(1).with_type(TypeSchema::new(
            "note",
            vec![
                FieldDef::required("title", FieldType::String),
                FieldDef::required("content", FieldType::String),
                FieldDef::optional("pinned", FieldType::Bool),
            ],
        ))
    }

    fn doc(doc_type: &str, fields: Value) -> Document {
        let fields: Fields = serde_json::from_value(fields).unwrap();
        Document::new("doc-1", doc_type, fields, 1000)
    }

    #[test]
    fn validate_valid_document() {
        let schema = test_schema();

        let document = doc("note", json!({"title": "A", "content": "x"}));
        assert!(schema.validate_document(&document).is_ok());

        let with_optional = doc("note", json!({"title": "A", "content": "x", "pinned": true}));
        assert!(schema.validate_document(&with_optional).is_ok());
    }

    #[test]
    fn validate_missing_required_field() {
        let schema = test_schema();
        let document = doc("note", json!({"title": "A"}));

        let result = schema.validate_document(&document);
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "content"));
    }

    #[test]
    fn validate_wrong_type() {
        let schema = test_schema();
        let document = doc("note", json!({"title": 42, "content": "x"}));

        let result = schema.validate_document(&document);
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "title"));
    }

    #[test]
    fn validate_null_required_field() {
        let schema = test_schema();
        let document = doc("note", json!({"title": null, "content": "x"}));

        let result = schema.validate_document(&document);
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "title"));
    }

    #[test]
    fn undeclared_types_only_need_scalars() {
        let schema = test_schema();

        let document = doc("label", json!({"name": "work", "color": 3}));
        assert!(schema.validate_document(&document).is_ok());

        let document = doc("label", json!({"name": {"nested": true}}));
        assert!(matches!(
            schema.validate_document(&document),
            Err(Error::InvalidDocument(_))
        ));
    }

    #[test]
    fn tombstones_skip_field_validation() {
        let schema = test_schema();
        let mut document = doc("note", json!({}));
        document.deleted = true;

        assert!(schema.validate_document(&document).is_ok());
    }

    #[test]
    fn field_type_display() {
        assert_eq!(FieldType::String.to_string(), "String");
        assert_eq!(FieldType::Timestamp.to_string(), "Timestamp");
    }

    #[test]
    fn schema_serialization() {
        let schema = test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
