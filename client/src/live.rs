//! Live queries.
//!
//! A [`LiveQueryEngine`] listens to store writes and keeps every registered
//! [`QueryDescriptor`] evaluated. All work happens on one worker task fed by
//! an unbounded queue:
//!
//! ```text
//! RecordStore ──write event──▶ queue ──▶ worker ──watch──▶ LiveQuery
//!   subscribe ──register─────▶   (same queue, same order)
//! ```
//!
//! The store's listener only enqueues, so writers never wait on subscribers.
//! Each subscription has a single-slot `watch` channel: a slow consumer skips
//! intermediate states and always sees the newest one. Snapshots carry a
//! per-subscription sequence number that strictly increases.

use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tideline_engine::{
    Document, QueryDescriptor, RecordId, RecordStore, Revision, WriteEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Ordered result of a live query at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Delivery number within the subscription, starting at 1
    pub seq: u64,
    pub records: Vec<Document>,
}

impl Snapshot {
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

type SnapshotSender = watch::Sender<Option<Arc<Snapshot>>>;

enum Command {
    Register {
        id: u64,
        query: QueryDescriptor,
        sender: SnapshotSender,
    },
    Write(WriteEvent),
    Unregister(u64),
    Shutdown,
}

struct Subscription {
    query: QueryDescriptor,
    sender: SnapshotSender,
    delivered: u64,
    last: Option<Vec<(RecordId, Revision)>>,
}

impl Subscription {
    /// Recompute and deliver if the result changed.
    fn refresh(&mut self, store: &RecordStore) {
        let records = match store.read() {
            Ok(view) => self.query.evaluate(&view),
            Err(e) => {
                tracing::warn!(error = %e, "live query evaluation skipped");
                return;
            }
        };

        let fingerprint: Vec<(RecordId, Revision)> =
            records.iter().map(|d| (d.id.clone(), d.revision)).collect();
        if self.last.as_ref() == Some(&fingerprint) {
            return;
        }

        self.delivered += 1;
        self.last = Some(fingerprint);
        self.sender.send_replace(Some(Arc::new(Snapshot {
            seq: self.delivered,
            records,
        })));
    }
}

/// Owner of the notification worker.
pub struct LiveQueryEngine {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LiveQueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQueryEngine")
            .field("subscriptions_created", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LiveQueryEngine {
    /// Attach to a store and start the worker on the current tokio runtime.
    pub fn start(store: Arc<RecordStore>) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::InvalidInput("live queries need a tokio runtime".into()))?;

        let (commands, queue) = mpsc::unbounded_channel();
        let forward = commands.clone();
        store.add_listener(Arc::new(move |event: &WriteEvent| {
            // Fails only once the worker is gone
            let _ = forward.send(Command::Write(event.clone()));
        }))?;

        let worker = runtime.spawn(run_worker(store, queue));
        Ok(Arc::new(Self {
            commands,
            next_id: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Register a query. The first snapshot reflects every write made before
    /// this call.
    pub fn subscribe(&self, query: QueryDescriptor) -> Result<LiveQuery> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = watch::channel(None);
        self.commands
            .send(Command::Register { id, query, sender })
            .map_err(|_| Error::Closed)?;

        Ok(LiveQuery {
            id,
            receiver,
            commands: self.commands.clone(),
            active: true,
        })
    }

    /// Stop the worker and wait for it. Open subscriptions end with
    /// [`Error::Closed`].
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "live query worker ended abnormally");
            }
        }
    }
}

impl Drop for LiveQueryEngine {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

async fn run_worker(store: Arc<RecordStore>, mut queue: mpsc::UnboundedReceiver<Command>) {
    let mut subscriptions: HashMap<u64, Subscription> = HashMap::new();
    let mut dirty: BTreeSet<u64> = BTreeSet::new();

    while let Some(first) = queue.recv().await {
        // Drain what is already queued so a burst of writes costs one
        // evaluation per subscription
        let mut next = Some(first);
        while let Some(command) = next.take() {
            match command {
                Command::Register { id, query, sender } => {
                    let mut subscription = Subscription {
                        query,
                        sender,
                        delivered: 0,
                        last: None,
                    };
                    subscription.refresh(&store);
                    subscriptions.insert(id, subscription);
                }
                Command::Write(event) => {
                    dirty.extend(
                        subscriptions
                            .iter()
                            .filter(|(_, s)| s.query.matches_type(&event.doc_type))
                            .map(|(id, _)| *id),
                    );
                }
                Command::Unregister(id) => {
                    subscriptions.remove(&id);
                    dirty.remove(&id);
                }
                Command::Shutdown => {
                    tracing::debug!(subscriptions = subscriptions.len(), "live query worker stopped");
                    return;
                }
            }
            next = queue.try_recv().ok();
        }

        for id in std::mem::take(&mut dirty) {
            if let Some(subscription) = subscriptions.get_mut(&id) {
                subscription.refresh(&store);
            }
        }
    }
}

/// Handle on a registered query.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct LiveQuery {
    id: u64,
    receiver: watch::Receiver<Option<Arc<Snapshot>>>,
    commands: mpsc::UnboundedSender<Command>,
    active: bool,
}

impl LiveQuery {
    /// Wait for a snapshot newer than the last one returned.
    pub async fn next(&mut self) -> Result<Arc<Snapshot>> {
        loop {
            self.receiver.changed().await.map_err(|_| Error::Closed)?;
            if let Some(snapshot) = self.receiver.borrow_and_update().clone() {
                return Ok(snapshot);
            }
        }
    }

    /// The newest snapshot delivered so far.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.receiver.borrow().clone()
    }

    /// Stop receiving updates.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.active, false) {
            let _ = self.commands.send(Command::Unregister(self.id));
        }
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.release();
    }
}
