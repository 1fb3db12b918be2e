//! Durable local storage.
//!
//! [`FileBackend`] keeps a store directory:
//!
//! ```text
//! <dir>/snapshot.json     compacted StoreSnapshot
//! <dir>/journal.jsonl     one document per line, appended on every write
//! <dir>/checkpoint.json   replication checkpoint
//! ```
//!
//! Opening replays the journal over the snapshot (highest revision per id
//! wins), writes the result as a fresh snapshot through a temp file and
//! rename, then truncates the journal. A torn last journal line from a crash
//! mid-append is ignored.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tideline_engine::{
    Backend, Document, NodeId, RecordId, SchemaVersion, Seq, StoreSnapshot,
};

const SNAPSHOT_FILE: &str = "snapshot.json";
const JOURNAL_FILE: &str = "journal.jsonl";
const CHECKPOINT_FILE: &str = "checkpoint.json";

fn io_fault(context: &str, path: &Path, err: std::io::Error) -> Error {
    Error::StorageFault(format!("{context} {}: {err}", path.display()))
}

/// Write `contents` to `path` atomically.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp).map_err(|e| io_fault("create", &tmp, e))?;
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .map_err(|e| io_fault("write", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_fault("rename", path, e))
}

/// Snapshot plus journal backend for a [`tideline_engine::RecordStore`].
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    node_id: NodeId,
    journal: Mutex<File>,
}

impl FileBackend {
    /// Open (creating if needed) a store directory and compact it.
    ///
    /// A new directory gets a fresh random node id; an existing one keeps the
    /// id recorded in its snapshot.
    pub fn open(dir: impl AsRef<Path>, schema_version: SchemaVersion) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_fault("create", &dir, e))?;

        let mut snapshot = read_snapshot(&dir)?.unwrap_or_else(|| {
            StoreSnapshot::new(schema_version, uuid::Uuid::new_v4().to_string())
        });
        let replayed = replay_journal(&dir.join(JOURNAL_FILE))?;
        let replayed_count = replayed.len();
        for document in replayed {
            let newer = snapshot
                .get_document(&document.id)
                .map_or(true, |stored| document.revision >= stored.revision);
            if newer {
                snapshot.add_document(document);
            }
        }
        snapshot.schema_version = schema_version;

        write_atomic(&dir.join(SNAPSHOT_FILE), snapshot.to_json()?.as_bytes())?;
        let journal_path = dir.join(JOURNAL_FILE);
        let journal = File::create(&journal_path).map_err(|e| io_fault("truncate", &journal_path, e))?;

        tracing::debug!(
            dir = %dir.display(),
            documents = snapshot.document_count(),
            replayed = replayed_count,
            "store directory compacted"
        );

        Ok(Self {
            dir,
            node_id: snapshot.node_id,
            journal: Mutex::new(journal),
        })
    }

    /// Node id persisted for this directory.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoint store living beside the data.
    pub fn checkpoints(&self) -> FileCheckpoints {
        FileCheckpoints::new(self.dir.join(CHECKPOINT_FILE))
    }
}

fn read_snapshot(dir: &Path) -> Result<Option<StoreSnapshot>> {
    let path = dir.join(SNAPSHOT_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => StoreSnapshot::from_json(&text).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_fault("read", &path, e)),
    }
}

fn replay_journal(path: &Path) -> Result<Vec<Document>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_fault("open", path, e)),
    };

    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<_>>()
        .map_err(|e| io_fault("read", path, e))?;

    let mut documents = Vec::with_capacity(lines.len());
    let last = lines.len().saturating_sub(1);
    for (n, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Document>(line) {
            Ok(document) => documents.push(document),
            Err(e) if n == last => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring torn journal tail");
            }
            Err(e) => {
                return Err(Error::StorageFault(format!(
                    "corrupt journal {} line {}: {e}",
                    path.display(),
                    n + 1
                )))
            }
        }
    }
    Ok(documents)
}

impl Backend for FileBackend {
    fn load(&self) -> Result<Vec<Document>> {
        let mut latest: BTreeMap<RecordId, Document> = read_snapshot(&self.dir)?
            .map(|s| s.documents)
            .unwrap_or_default();
        for document in replay_journal(&self.dir.join(JOURNAL_FILE))? {
            match latest.get(&document.id) {
                Some(stored) if stored.revision > document.revision => {}
                _ => {
                    latest.insert(document.id.clone(), document);
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    fn persist(&self, document: &Document) -> Result<()> {
        let mut line = serde_json::to_vec(document)
            .map_err(|e| Error::StorageFault(format!("encode {}: {e}", document.id)))?;
        line.push(b'\n');

        let path = self.dir.join(JOURNAL_FILE);
        let mut journal = self
            .journal
            .lock()
            .map_err(|_| Error::StorageFault("journal lock poisoned".into()))?;
        journal
            .write_all(&line)
            .and_then(|_| journal.sync_data())
            .map_err(|e| io_fault("append", &path, e))
    }
}

/// Replication progress in both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Highest local write sequence acknowledged by the endpoint
    pub pushed_seq: Seq,
    /// Endpoint checkpoint of the last applied pull page
    pub pulled: Seq,
}

/// Persistence of the replication [`Checkpoint`].
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<Checkpoint>;
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Checkpoints held in memory, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCheckpoints {
    current: Mutex<Checkpoint>,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpoints {
    fn load(&self) -> Result<Checkpoint> {
        self.current
            .lock()
            .map(|c| *c)
            .map_err(|_| Error::StorageFault("checkpoint lock poisoned".into()))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::StorageFault("checkpoint lock poisoned".into()))?;
        *current = *checkpoint;
        Ok(())
    }
}

/// Checkpoints in a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileCheckpoints {
    path: PathBuf,
}

impl FileCheckpoints {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CheckpointStore for FileCheckpoints {
    fn load(&self) -> Result<Checkpoint> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::StorageFault(format!("corrupt checkpoint {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Checkpoint::default()),
            Err(e) => Err(io_fault("read", &self.path, e)),
        }
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = serde_json::to_vec(checkpoint)
            .map_err(|e| Error::StorageFault(format!("encode checkpoint: {e}")))?;
        write_atomic(&self.path, &bytes)
    }
}
