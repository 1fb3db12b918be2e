//! Record store - durable keyed storage of documents.
//!
//! The store owns the collection and its full-text index behind a single
//! `RwLock`: writes are serialized, reads run concurrently and block only
//! behind an in-flight write. Every successful write is persisted through the
//! [`Backend`] before it becomes visible, and a [`WriteEvent`] is emitted to
//! the registered listeners while the write lock is still held, so listeners
//! observe events in exactly the order writes were applied.

use crate::{
    error::Result, index::FullTextIndex, snapshot::SnapshotMetadata, snapshot::StoreSnapshot,
    DocType, Document, Error, NodeId, Origin, RecordId, Revision, Schema, Seq, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Kind of change a write made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    /// No live document existed before
    Insert,
    /// A live document was replaced
    Update,
    /// The document is now a tombstone
    Delete,
}

/// Emitted synchronously for every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteEvent {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub doc_type: DocType,
    pub kind: WriteKind,
    pub revision: Revision,
    pub seq: Seq,
    pub origin: Origin,
}

/// Observer of store writes.
///
/// Called with the write lock held; implementations must not block and must
/// not write to the store.
pub trait WriteListener: Send + Sync {
    fn on_write(&self, event: &WriteEvent);
}

impl<F> WriteListener for F
where
    F: Fn(&WriteEvent) + Send + Sync,
{
    fn on_write(&self, event: &WriteEvent) {
        self(event)
    }
}

/// Persistence seam of the store.
pub trait Backend: Send + Sync {
    /// Load every stored document, tombstones included.
    fn load(&self) -> Result<Vec<Document>>;

    /// Durably persist one document version.
    fn persist(&self, document: &Document) -> Result<()>;
}

/// Backend keeping documents in memory.
///
/// Writes can be made to fail on demand to exercise storage faults.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    documents: Mutex<BTreeMap<RecordId, Document>>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with documents.
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let backend = Self::new();
        if let Ok(mut stored) = backend.documents.lock() {
            for document in documents {
                stored.insert(document.id.clone(), document);
            }
        }
        backend
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Backend for MemoryBackend {
    fn load(&self) -> Result<Vec<Document>> {
        let stored = self
            .documents
            .lock()
            .map_err(|_| Error::StorageFault("memory backend poisoned".into()))?;
        Ok(stored.values().cloned().collect())
    }

    fn persist(&self, document: &Document) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::StorageFault("simulated write failure".into()));
        }
        let mut stored = self
            .documents
            .lock()
            .map_err(|_| Error::StorageFault("memory backend poisoned".into()))?;
        stored.insert(document.id.clone(), document.clone());
        Ok(())
    }
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn load(&self) -> Result<Vec<Document>> {
        (**self).load()
    }

    fn persist(&self, document: &Document) -> Result<()> {
        (**self).persist(document)
    }
}

/// A collection of documents of mixed type.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    documents: HashMap<RecordId, Document>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            documents: HashMap::new(),
        }
    }

    /// Get a document by ID, tombstones included.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// Insert or replace a document.
    pub fn insert(&mut self, document: Document) {
        self.documents.insert(document.id.clone(), document);
    }

    /// Check if a document exists (including deleted).
    pub fn contains(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }

    /// Get all active (non-deleted) documents.
    pub fn active_documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values().filter(|d| d.is_active())
    }

    /// Get all documents including deleted.
    pub fn all_documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Count of active documents.
    pub fn len(&self) -> usize {
        self.active_documents().count()
    }

    /// Check if collection has no active documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct StoreState {
    collection: Collection,
    index: FullTextIndex,
    last_seq: Seq,
}

/// Consistent read-only view of the store.
///
/// Holds the read lock for its lifetime; scans are lazy over the locked
/// state, so scan and search results always agree with each other.
pub struct ReadView<'a> {
    state: RwLockReadGuard<'a, StoreState>,
}

impl<'a> ReadView<'a> {
    /// Get an active document.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.state.collection.get(id).filter(|d| d.is_active())
    }

    /// Get a document including tombstones.
    pub fn get_including_deleted(&self, id: &str) -> Option<&Document> {
        self.state.collection.get(id)
    }

    /// Lazily iterate documents of a type (all types when `None`),
    /// tombstones included.
    pub fn scan<'s>(&'s self, doc_type: Option<&'s str>) -> impl Iterator<Item = &'s Document> {
        self.state
            .collection
            .all_documents()
            .filter(move |d| doc_type.map_or(true, |t| d.doc_type == t))
    }

    /// IDs of documents whose indexed text has terms with the given prefixes.
    pub fn search(&self, query: &str) -> BTreeSet<RecordId> {
        self.state.index.search(query)
    }

    /// Local-origin documents written after `since`, in write order.
    pub fn changes_since(&self, since: Seq) -> Vec<&Document> {
        let mut changes: Vec<&Document> = self
            .state
            .collection
            .all_documents()
            .filter(|d| d.metadata.origin == Origin::Local && d.metadata.seq > since)
            .collect();
        changes.sort_by_key(|d| d.metadata.seq);
        changes
    }

    /// Sequence number of the latest write.
    pub fn last_seq(&self) -> Seq {
        self.state.last_seq
    }

    /// Number of active documents.
    pub fn len(&self) -> usize {
        self.state.collection.len()
    }

    /// Whether there are no active documents.
    pub fn is_empty(&self) -> bool {
        self.state.collection.is_empty()
    }
}

/// The record store.
pub struct RecordStore {
    node_id: NodeId,
    schema: Schema,
    backend: Box<dyn Backend>,
    state: RwLock<StoreState>,
    listeners: RwLock<Vec<Arc<dyn WriteListener>>>,
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("node_id", &self.node_id)
            .field("schema_version", &self.schema.version)
            .finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Open a store over a backend, rebuilding the collection and the index
    /// from its contents.
    ///
    /// A failing backend load is fatal: the store cannot function without
    /// its data.
    pub fn open(
        schema: Schema,
        node_id: impl Into<NodeId>,
        backend: impl Backend + 'static,
    ) -> Result<Self> {
        let documents = backend.load()?;

        let mut state = StoreState::default();
        for document in documents {
            state.last_seq = state.last_seq.max(document.metadata.seq);
            state.collection.insert(document);
        }
        let StoreState {
            collection, index, ..
        } = &mut state;
        index.rebuild(collection.all_documents());

        Ok(Self {
            node_id: node_id.into(),
            schema,
            backend: Box::new(backend),
            state: RwLock::new(state),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Create a store backed by memory only.
    pub fn in_memory(schema: Schema, node_id: impl Into<NodeId>) -> Self {
        let node_id = node_id.into();
        Self {
            node_id,
            schema,
            backend: Box::new(MemoryBackend::new()),
            state: RwLock::new(StoreState::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Get the node ID.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Register a listener for write events.
    pub fn add_listener(&self, listener: Arc<dyn WriteListener>) -> Result<()> {
        let mut listeners = self
            .listeners
            .write()
            .map_err(|_| Error::StorageFault("listener registry poisoned".into()))?;
        listeners.push(listener);
        Ok(())
    }

    /// Write a document.
    ///
    /// With `expected == None` this is a blind overwrite. Otherwise the
    /// expected revision must equal the stored one (0 when absent). The store
    /// assigns the new revision and sequence number; every other field of
    /// `document` is stored as given.
    pub fn put(&self, document: Document, expected: Option<Revision>) -> Result<Revision> {
        self.schema.validate_document(&document)?;

        let mut state = self.write_state()?;
        let (current, was_active) = match state.collection.get(&document.id) {
            Some(stored) => (stored.revision, stored.is_active()),
            None => (0, false),
        };

        if let Some(expected) = expected {
            if expected != current {
                return Err(Error::Conflict {
                    expected,
                    actual: current,
                });
            }
        }

        self.commit(&mut state, document, current, was_active)
    }

    /// Tombstone an active document as a local write.
    pub fn delete(&self, id: &str, timestamp: Timestamp) -> Result<Revision> {
        let mut state = self.write_state()?;
        let mut tombstone = state
            .collection
            .get(id)
            .filter(|d| d.is_active())
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let current = tombstone.revision;
        tombstone.mark_deleted(timestamp, Origin::Local);
        self.commit(&mut state, tombstone, current, true)
    }

    fn commit(
        &self,
        state: &mut StoreState,
        mut document: Document,
        current: Revision,
        was_active: bool,
    ) -> Result<Revision> {
        document.revision = current + 1;
        document.metadata.seq = state.last_seq + 1;

        // Persist first: a failed write must leave memory untouched
        self.backend.persist(&document)?;

        let kind = match (was_active, document.deleted) {
            (_, true) => WriteKind::Delete,
            (false, false) => WriteKind::Insert,
            (true, false) => WriteKind::Update,
        };
        let event = WriteEvent {
            id: document.id.clone(),
            doc_type: document.doc_type.clone(),
            kind,
            revision: document.revision,
            seq: document.metadata.seq,
            origin: document.metadata.origin,
        };

        state.last_seq = document.metadata.seq;
        state.index.reindex(&document);
        state.collection.insert(document);

        self.emit(&event);
        Ok(event.revision)
    }

    fn emit(&self, event: &WriteEvent) {
        // A poisoned registry still holds valid listeners
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        for listener in listeners.iter() {
            listener.on_write(event);
        }
    }

    /// Get an active document.
    pub fn get(&self, id: &str) -> Result<Document> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Get a document including tombstones.
    pub fn get_including_deleted(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.get_including_deleted(id).cloned())
    }

    /// Take a consistent read view.
    pub fn read(&self) -> Result<ReadView<'_>> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::StorageFault("store lock poisoned".into()))?;
        Ok(ReadView { state })
    }

    /// IDs matching a full-text prefix query.
    pub fn search(&self, query: &str) -> Result<BTreeSet<RecordId>> {
        Ok(self.read()?.search(query))
    }

    /// Up to `limit` local-origin documents written after `since`.
    pub fn changes_since(&self, since: Seq, limit: usize) -> Result<Vec<Document>> {
        Ok(self
            .read()?
            .changes_since(since)
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| Error::StorageFault("store lock poisoned".into()))
    }

    /// Export the current store state as a snapshot.
    pub fn export_state(&self) -> Result<StoreSnapshot> {
        let view = self.read()?;
        let mut snapshot = StoreSnapshot::new(self.schema.version, self.node_id.clone());
        snapshot.last_seq = view.last_seq();
        for document in view.scan(None) {
            snapshot.add_document(document.clone());
        }
        Ok(snapshot)
    }

    /// Get snapshot metadata without full export.
    pub fn snapshot_metadata(&self) -> Result<SnapshotMetadata> {
        let view = self.read()?;
        let total = view.scan(None).count();
        Ok(SnapshotMetadata {
            format_version: crate::snapshot::SNAPSHOT_FORMAT_VERSION,
            schema_version: self.schema.version,
            node_id: self.node_id.clone(),
            last_seq: view.last_seq(),
            document_count: total,
            active_count: view.len(),
        })
    }
}
