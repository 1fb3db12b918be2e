//! # tideline-client
//!
//! Local-first notebook built on [`tideline_engine`].
//!
//! ## Features
//!
//! - **Durable storage**: snapshot plus journal in a store directory
//! - **Live queries**: ordered result sets pushed to subscribers on every
//!   relevant write
//! - **Replication**: resumable push/pull against a sync endpoint, with a pure
//!   state machine driving retries and backoff
//! - **Transport abstraction**: HTTP for real endpoints, mock for tests
//!
//! ## Example
//!
//! ```ignore
//! use tideline_client::{Direction, Notebook, SyncConfig};
//!
//! let notebook = Notebook::open("notes.tideline")?;
//! let mut notes = notebook.notes(Direction::Ascending, None)?;
//!
//! notebook.create("Groceries", "milk, eggs")?;
//! let snapshot = notes.next().await?;
//!
//! notebook
//!     .start_sync(SyncConfig::new("https://sync.example.com", "alice", "secret")?)
//!     .await?;
//! ```

pub mod config;
pub mod errors;
pub mod live;
pub mod notebook;
pub mod replication;
pub mod storage;
pub mod transport;

pub use config::{ReplicationOptions, SyncConfig, SyncDirection};
pub use errors::{ErrorEntry, ErrorQueue};
pub use live::{LiveQuery, LiveQueryEngine, Snapshot};
pub use notebook::{notes_schema, Note, Notebook, NOTE_TYPE};
pub use replication::{
    FailureCause, ReplicationState, ReplicationStatus, Replicator, SyncFailure,
};
pub use storage::{Checkpoint, CheckpointStore, FileBackend, FileCheckpoints, MemoryCheckpoints};
pub use transport::{HttpTransport, MockTransport, Transport, TransportError};

pub use tideline_engine;
pub use tideline_engine::{Direction, Document, Error, QueryDescriptor, RecordStore};

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
