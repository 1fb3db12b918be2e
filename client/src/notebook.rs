//! The notebook: the one entry point an application talks to.
//!
//! A [`Notebook`] owns the record store, the live query worker and, while
//! syncing, the replication task. Notes are documents of type `note` with
//! required `title` and `content` strings.

use crate::config::{ReplicationOptions, SyncConfig};
use crate::errors::{ErrorEntry, ErrorQueue};
use crate::live::{LiveQuery, LiveQueryEngine};
use crate::replication::{Replicator, ReplicationStatus, StatusPublisher, SyncContext};
use crate::storage::{CheckpointStore, FileBackend, MemoryCheckpoints};
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tideline_engine::{
    Direction, Document, FieldDef, FieldType, Fields, Origin, QueryDescriptor, RecordId,
    RecordStore, Revision, Schema, SchemaVersion, Timestamp, TypeSchema, WriteEvent,
};
use tokio::sync::{broadcast, watch, Mutex, Notify};

/// Document type of notes.
pub const NOTE_TYPE: &str = "note";

/// Version of [`notes_schema`].
pub const NOTES_SCHEMA_VERSION: SchemaVersion = 1;

/// Schema declaring the `note` type.
pub fn notes_schema() -> Schema {
    Schema::new(NOTES_SCHEMA_VERSION).with_type(TypeSchema::new(
        NOTE_TYPE,
        vec![
            FieldDef::required("title", FieldType::String),
            FieldDef::required("content", FieldType::String),
        ],
    ))
}

/// A note as the application sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: RecordId,
    pub title: String,
    pub content: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub revision: Revision,
}

impl Note {
    /// Read a live note document. Other documents yield `None`.
    pub fn from_document(document: &Document) -> Option<Self> {
        if document.doc_type != NOTE_TYPE || document.deleted {
            return None;
        }
        Some(Self {
            id: document.id.clone(),
            title: document.str_field("title")?.to_string(),
            content: document.str_field("content")?.to_string(),
            created_at: document.metadata.created_at,
            updated_at: document.metadata.updated_at,
            revision: document.revision,
        })
    }
}

type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

fn system_clock() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Reject blank text; returns the text unchanged otherwise.
fn require_text<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{name} must not be empty")));
    }
    Ok(value)
}

/// Local-first notes with live queries and optional replication.
pub struct Notebook {
    store: Arc<RecordStore>,
    live: Arc<LiveQueryEngine>,
    checkpoints: Arc<dyn CheckpointStore>,
    errors: Arc<ErrorQueue>,
    status: Arc<StatusPublisher>,
    wake: Arc<Notify>,
    clock: Clock,
    reachability: Option<watch::Receiver<bool>>,
    replicator: Mutex<Option<Replicator>>,
}

impl fmt::Debug for Notebook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notebook")
            .field("store", &self.store)
            .field("sync", &self.status.current().state)
            .finish_non_exhaustive()
    }
}

impl Notebook {
    /// A notebook kept in memory only.
    pub fn in_memory() -> Result<Self> {
        let store = RecordStore::in_memory(notes_schema(), uuid::Uuid::new_v4().to_string());
        Self::with_store(Arc::new(store), Arc::new(MemoryCheckpoints::new()))
    }

    /// A notebook persisted in `dir`, created if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let backend = FileBackend::open(dir, NOTES_SCHEMA_VERSION)?;
        let checkpoints = Arc::new(backend.checkpoints());
        let node_id = backend.node_id().clone();
        let store = RecordStore::open(notes_schema(), node_id, backend)?;
        tracing::info!(node_id = %store.node_id(), "notebook opened");
        Self::with_store(Arc::new(store), checkpoints)
    }

    /// A notebook over an existing store. Must run inside a tokio runtime.
    pub fn with_store(
        store: Arc<RecordStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        let live = LiveQueryEngine::start(store.clone())?;

        let wake = Arc::new(Notify::new());
        let on_local_write = wake.clone();
        store.add_listener(Arc::new(move |event: &WriteEvent| {
            if event.origin == Origin::Local {
                on_local_write.notify_one();
            }
        }))?;

        let errors = Arc::new(ErrorQueue::new());
        Ok(Self {
            status: Arc::new(StatusPublisher::new(errors.clone())),
            store,
            live,
            checkpoints,
            errors,
            wake,
            clock: Arc::new(system_clock),
            reachability: None,
            replicator: Mutex::new(None),
        })
    }

    /// Replace the wall clock used to stamp writes.
    pub fn with_clock(mut self, clock: impl Fn() -> Timestamp + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Hold retries while the feed reports `false`.
    pub fn with_reachability(mut self, reachability: watch::Receiver<bool>) -> Self {
        self.reachability = Some(reachability);
        self
    }

    /// Write time for a change to `previous`: now, but never before the
    /// previous write so the change wins last-writer-wins.
    fn stamp_after(&self, previous: &Document) -> Timestamp {
        (self.clock)().max(previous.metadata.updated_at.saturating_add(1))
    }

    /// Create a note and return its id.
    pub fn create(&self, title: &str, content: &str) -> Result<RecordId> {
        let title = require_text("title", title)?;
        let content = require_text("content", content)?;

        let id = uuid::Uuid::new_v4().to_string();
        let document = Document::new(id.clone(), NOTE_TYPE, Fields::new(), (self.clock)())
            .with_field("title", title)
            .with_field("content", content);
        self.store.put(document, Some(0))?;

        tracing::debug!(%id, "note created");
        Ok(id)
    }

    /// Replace the title and content of a note.
    pub fn update(&self, id: &str, title: &str, content: &str) -> Result<Revision> {
        let title = require_text("title", title)?;
        let content = require_text("content", content)?;

        let previous = self.note_document(id)?;
        let mut fields = previous.fields.clone();
        fields.insert("title".into(), title.into());
        fields.insert("content".into(), content.into());

        let timestamp = self.stamp_after(&previous);
        let mut document = previous;
        document.update_fields(fields, timestamp, Origin::Local);
        self.store.put(document, None)
    }

    /// Delete a note.
    pub fn delete(&self, id: &str) -> Result<Revision> {
        let previous = self.note_document(id)?;
        self.store.delete(id, self.stamp_after(&previous))
    }

    /// Delete every note titled exactly `title`; returns how many.
    pub fn delete_by_title(&self, title: &str) -> Result<usize> {
        let matching: Vec<Document> = {
            let view = self.store.read()?;
            view.scan(Some(NOTE_TYPE))
                .filter(|d| d.is_active() && d.str_field("title") == Some(title))
                .cloned()
                .collect()
        };

        let mut deleted = 0;
        for document in &matching {
            match self.store.delete(&document.id, self.stamp_after(document)) {
                Ok(_) => deleted += 1,
                // Deleted concurrently
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(title, deleted, "notes deleted by title");
        Ok(deleted)
    }

    /// Read a note.
    pub fn get(&self, id: &str) -> Result<Note> {
        let document = self.note_document(id)?;
        Note::from_document(&document).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn note_document(&self, id: &str) -> Result<Document> {
        let document = self.store.get(id)?;
        if document.doc_type != NOTE_TYPE {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(document)
    }

    /// Subscribe to an arbitrary query.
    pub fn subscribe(&self, query: QueryDescriptor) -> Result<LiveQuery> {
        self.live.subscribe(query)
    }

    /// Notes ordered by creation time, optionally filtered by title prefix.
    pub fn notes(&self, direction: Direction, text: Option<&str>) -> Result<LiveQuery> {
        let mut query = QueryDescriptor::new(NOTE_TYPE).order_by("createdAt", direction);
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            query = query.matching(text);
        }
        self.subscribe(query)
    }

    /// Start replicating over HTTP. A running session is replaced.
    pub async fn start_sync(&self, config: SyncConfig) -> Result<()> {
        let transport = HttpTransport::new(&config)
            .map_err(|e| Error::ConfigInvalid(e.to_string()))?;
        self.start_sync_with(Arc::new(transport), config.options)
            .await
    }

    /// Load the configuration from a TOML file, then start. Configuration
    /// errors are also queued for the user.
    pub async fn start_sync_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let config = self.queue_config_error(SyncConfig::load(path))?;
        self.start_sync(config).await
    }

    /// Load the configuration from `TIDELINE_*` variables, then start.
    pub async fn start_sync_from_env(&self) -> Result<()> {
        let config = self.queue_config_error(SyncConfig::from_env())?;
        self.start_sync(config).await
    }

    fn queue_config_error(&self, config: Result<SyncConfig>) -> Result<SyncConfig> {
        config.map_err(|e| {
            tracing::warn!(error = %e, "sync not started");
            self.errors.push(ErrorEntry::config(&e));
            e
        })
    }

    /// Start replicating over any transport.
    pub async fn start_sync_with(
        &self,
        transport: Arc<dyn Transport>,
        options: ReplicationOptions,
    ) -> Result<()> {
        let mut running = self.replicator.lock().await;
        if let Some(previous) = running.take() {
            previous.stop().await;
        }

        let context = SyncContext {
            store: self.store.clone(),
            checkpoints: self.checkpoints.clone(),
            status: self.status.clone(),
            wake: self.wake.clone(),
            reachability: self.reachability.clone(),
        };
        *running = Some(Replicator::spawn(context, transport, options));
        Ok(())
    }

    /// Stop replicating. Safe in any state.
    pub async fn stop_sync(&self) {
        if let Some(replicator) = self.replicator.lock().await.take() {
            replicator.stop().await;
        }
    }

    pub fn sync_status(&self) -> ReplicationStatus {
        self.status.current()
    }

    /// Follow the latest replication status.
    pub fn watch_sync_status(&self) -> watch::Receiver<ReplicationStatus> {
        self.status.watch()
    }

    /// Every replication status transition.
    pub fn sync_events(&self) -> broadcast::Receiver<ReplicationStatus> {
        self.status.subscribe()
    }

    /// Errors waiting to be shown.
    pub fn errors(&self) -> &Arc<ErrorQueue> {
        &self.errors
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Stop replication and the live query worker.
    pub async fn shutdown(&self) {
        self.stop_sync().await;
        self.live.shutdown().await;
    }
}
