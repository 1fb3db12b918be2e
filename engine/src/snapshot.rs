//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are what a durable backend compacts its journal into, and what
//! `RecordStore::export_state` hands out. Documents live in a `BTreeMap` so
//! the serialized form is deterministic.

use crate::{error::Result, Document, Error, NodeId, RecordId, Schema, SchemaVersion, Seq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of every document, tombstones included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// Node ID of the store
    pub node_id: NodeId,
    /// Highest write sequence contained in the snapshot
    #[serde(default)]
    pub last_seq: Seq,
    pub documents: BTreeMap<RecordId, Document>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema_version: SchemaVersion, node_id: impl Into<NodeId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            node_id: node_id.into(),
            last_seq: 0,
            documents: BTreeMap::new(),
        }
    }

    /// Add or replace a document.
    pub fn add_document(&mut self, document: Document) {
        self.last_seq = self.last_seq.max(document.metadata.seq);
        self.documents.insert(document.id.clone(), document);
    }

    pub fn get_document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// Count every document, tombstones included.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Count live documents.
    pub fn active_document_count(&self) -> usize {
        self.documents.values().filter(|d| d.is_active()).count()
    }

    /// Consume the snapshot, yielding documents in id order.
    pub fn into_documents(self) -> Vec<Document> {
        self.documents.into_values().collect()
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::InvalidSnapshot(format!(
                "schema version mismatch: expected {}, got {}",
                schema.version, self.schema_version
            )));
        }

        for (id, document) in &self.documents {
            if id != &document.id {
                return Err(Error::InvalidSnapshot(format!(
                    "document keyed as {id} carries id {}",
                    document.id
                )));
            }
            schema.validate_document(document)?;
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub schema_version: SchemaVersion,
    pub node_id: NodeId,
    pub last_seq: Seq,
    /// Documents including tombstones
    pub document_count: usize,
    /// Live documents
    pub active_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            schema_version: snapshot.schema_version,
            node_id: snapshot.node_id.clone(),
            last_seq: snapshot.last_seq,
            document_count: snapshot.document_count(),
            active_count: snapshot.active_document_count(),
        }
    }
}
