//! # Tideline Engine
//!
//! The synchronous core of an embedded, local-first document store.
//!
//! This crate owns documents, their revisions, the full-text index, query
//! evaluation and the conflict policy used by replication. It performs no
//! network IO and spawns no tasks; the client crate builds live queries and
//! the replicator on top of it.
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! A [`Document`] has:
//! - A unique, immutable id
//! - A type discriminator
//! - Ordered scalar fields
//! - A revision that strictly increases on every write
//! - Metadata (timestamps, origin, store write sequence)
//! - A soft delete flag (tombstone)
//!
//! ### Record store
//!
//! [`RecordStore`] serializes writes behind one `RwLock`, persists through a
//! [`Backend`] before a write becomes visible, keeps the [`FullTextIndex`]
//! consistent, and notifies every [`WriteListener`] before `put` returns.
//!
//! ### Queries
//!
//! A [`QueryDescriptor`] filters by type and title prefix, then orders by one
//! field with ties broken by id.
//!
//! ### Reconciliation
//!
//! [`reconcile::apply_remote`] applies a remote change with last-writer-wins
//! on `updatedAt`, remote winning ties.
//!
//! ## Quick Start
//!
//! ```rust
//! use tideline_engine::{
//!     Document, Fields, FieldDef, FieldType, QueryDescriptor, RecordStore, Schema,
//!     TypeSchema,
//! };
//!
//! // 1. Declare the note type
//! let schema = Schema::new(1).with_type(TypeSchema::new(
//!     "note",
//!     vec![
//!         FieldDef::required("title", FieldType::String),
//!         FieldDef::required("content", FieldType::String),
//!     ],
//! ));
//!
//! // 2. Open an in-memory store
//! let store = RecordStore::in_memory(schema, "device_1");
//!
//! // 3. Write a document
//! let note = Document::new("note_1", "note", Fields::new(), 1706745600000)
//!     .with_field("title", "Ångström Notes")
//!     .with_field("content", "units");
//! assert_eq!(store.put(note, None).unwrap(), 1);
//!
//! // 4. Query by title prefix
//! let view = store.read().unwrap();
//! let hits = QueryDescriptor::new("note").matching("ang").evaluate(&view);
//! assert_eq!(hits.len(), 1);
//! ```

pub mod document;
pub mod error;
pub mod index;
pub mod protocol;
pub mod query;
pub mod reconcile;
pub mod schema;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use document::{Document, Fields, Metadata, Origin};
pub use error::Error;
pub use index::{tokenize, FullTextIndex};
pub use protocol::{
    Change, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    RejectedChange,
};
pub use query::{Direction, QueryDescriptor};
pub use reconcile::{apply_remote, resolve, Conflict, RemoteApply, Resolution};
pub use schema::{FieldDef, FieldType, Schema, TypeSchema};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{
    Backend, Collection, MemoryBackend, ReadView, RecordStore, WriteEvent, WriteKind,
    WriteListener,
};

/// Type aliases for clarity
pub type RecordId = String;
pub type DocType = String;
pub type NodeId = String;
pub type Revision = u64;
pub type Seq = u64;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
