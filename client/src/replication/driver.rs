//! The replication task.
//!
//! A [`Replicator`] owns one spawned session. The session feeds
//! [`ReplicationMachine`] with the outcome of every network call and performs
//! the action it answers with. Stop is observed around each network call and
//! timer; a pulled page is always applied in full, one atomic `put` per
//! document.

use super::machine::{Action, Event, ReplicationMachine, ReplicationState, RetryPolicy};
use super::{FailureCause, ReplicationStatus, StatusPublisher, SyncFailure};
use crate::config::ReplicationOptions;
use crate::storage::CheckpointStore;
use crate::transport::Transport;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tideline_engine::{
    apply_remote, Change, Error, PullRequest, PushRequest, RecordStore, RemoteApply,
};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Everything a session shares with the rest of the notebook.
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<RecordStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub status: Arc<StatusPublisher>,
    /// Notified on every local write
    pub wake: Arc<Notify>,
    /// Optional reachability feed gating retries
    pub reachability: Option<watch::Receiver<bool>>,
}

/// Handle on a running replication session.
#[derive(Debug)]
pub struct Replicator {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    status: Arc<StatusPublisher>,
}

impl Replicator {
    /// Spawn a session on the current tokio runtime.
    pub fn spawn(
        context: SyncContext,
        transport: Arc<dyn Transport>,
        options: ReplicationOptions,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let status = context.status.clone();
        let session = Session::new(context, transport, options, stop_rx);
        let task = tokio::spawn(session.run());

        Self { stop, task, status }
    }

    /// Whether the session ended on its own (one-shot done or gave up).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session and wait for it to end.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "replication task ended abnormally");
        }

        let current = self.status.current();
        if current.state != ReplicationState::Stopped {
            self.status.publish(ReplicationStatus {
                state: ReplicationState::Stopped,
                retry_in: None,
                ..current
            });
        }
    }
}

/// Why an exchange ended early.
enum Interrupt {
    Stopped,
    Failed(SyncFailure),
}

impl From<Error> for Interrupt {
    fn from(err: Error) -> Self {
        Interrupt::Failed(SyncFailure::from(err))
    }
}

struct Session {
    machine: ReplicationMachine,
    store: Arc<RecordStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    status: Arc<StatusPublisher>,
    wake: Arc<Notify>,
    reachability: Option<watch::Receiver<bool>>,
    transport: Arc<dyn Transport>,
    options: ReplicationOptions,
    stop: watch::Receiver<bool>,
    last_contact: Instant,
}

/// Resolves once stop is requested or the handle is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Run `future` unless stop is requested first.
async fn guarded<F: Future>(stop: &mut watch::Receiver<bool>, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = stop_requested(stop) => None,
        output = future => Some(output),
    }
}

impl Session {
    fn new(
        context: SyncContext,
        transport: Arc<dyn Transport>,
        options: ReplicationOptions,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            machine: ReplicationMachine::new(
                RetryPolicy::from_options(&options),
                options.continuous,
            ),
            store: context.store,
            checkpoints: context.checkpoints,
            status: context.status,
            wake: context.wake,
            reachability: context.reachability,
            transport,
            options,
            stop,
            last_contact: Instant::now(),
        }
    }

    async fn run(mut self) {
        tracing::info!(
            direction = ?self.options.direction,
            continuous = self.options.continuous,
            "replication starting"
        );
        let mut action = self.handle(Event::Start);

        loop {
            let event = match action {
                Action::Connect => match self.connect().await {
                    Some(event) => event,
                    None => break,
                },
                Action::Exchange => match self.exchange().await {
                    Ok(()) => Event::ExchangeCompleted,
                    Err(Interrupt::Failed(failure)) => Event::Failed(failure),
                    Err(Interrupt::Stopped) => break,
                },
                Action::Wait(delay) => match self.wait(delay).await {
                    Some(event) => event,
                    None => break,
                },
                Action::Idle => match self.idle().await {
                    Some(event) => event,
                    None => break,
                },
                Action::Halt => {
                    tracing::info!(state = ?self.machine.state(), "replication session ended");
                    return;
                }
                Action::Ignore => {
                    self.fault();
                    return;
                }
            };
            action = self.handle(event);
        }

        self.handle(Event::Stop);
        tracing::info!("replication stopped");
    }

    /// Feed the machine and publish a status when anything observable moved.
    fn handle(&mut self, event: Event) -> Action {
        let before = (self.machine.state(), self.machine.failures());
        let failed = matches!(event, Event::Failed(_));
        let action = self.machine.on_event(event);

        let retry_in = match action {
            Action::Wait(delay) => Some(delay),
            _ => None,
        };
        if let Some(failure) = self.machine.last_error().filter(|_| failed) {
            tracing::warn!(
                attempt = self.machine.failures(),
                retry_in = ?retry_in,
                error = %failure,
                "replication attempt failed"
            );
        }
        if failed || before != (self.machine.state(), self.machine.failures()) {
            self.status
                .publish(ReplicationStatus::from_machine(&self.machine, retry_in));
        }
        action
    }

    /// The machine rejected an event the session produced itself.
    fn fault(&mut self) {
        let state = self.machine.state();
        tracing::warn!(?state, "replication machine ignored a session event");
        self.machine.fault(SyncFailure::new(
            FailureCause::Protocol,
            format!("internal error: unexpected event in state {state:?}"),
        ));
        self.status
            .publish(ReplicationStatus::from_machine(&self.machine, None));
    }

    async fn connect(&mut self) -> Option<Event> {
        let result = guarded(&mut self.stop, self.transport.handshake()).await?;
        Some(match result {
            Ok(handshake) => {
                self.last_contact = Instant::now();
                tracing::info!(endpoint = %handshake.node_id, "connected to sync endpoint");
                Event::HandshakeSucceeded
            }
            Err(e) => Event::Failed(SyncFailure::from(Error::from(e))),
        })
    }

    async fn wait(&mut self, delay: Duration) -> Option<Event> {
        guarded(&mut self.stop, time::sleep(delay)).await?;

        if let Some(reachability) = self.reachability.as_mut() {
            let reachable = async {
                // A dropped feed no longer gates anything
                let _ = reachability.wait_for(|up| *up).await;
            };
            guarded(&mut self.stop, reachable).await?;
        }
        Some(Event::RetryElapsed)
    }

    async fn idle(&mut self) -> Option<Event> {
        loop {
            let heartbeat_at = self.last_contact + self.options.heartbeat;
            let poll = self.options.poll_interval;
            let pulls = self.options.direction.pulls();

            tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => return None,
                _ = self.wake.notified() => return Some(Event::Woken),
                _ = time::sleep(poll), if pulls => return Some(Event::Woken),
                _ = time::sleep_until(heartbeat_at) => {}
            }

            let result = guarded(&mut self.stop, self.transport.heartbeat()).await?;
            match result {
                Ok(()) => {
                    self.last_contact = Instant::now();
                    tracing::debug!("heartbeat");
                }
                Err(e) => return Some(Event::Failed(SyncFailure::from(Error::from(e)))),
            }
        }
    }

    async fn exchange(&mut self) -> Result<(), Interrupt> {
        let mut checkpoint = self.checkpoints.load()?;
        let batch_size = self.options.batch_size.max(1);

        if self.options.direction.pushes() {
            loop {
                let batch = self.store.changes_since(checkpoint.pushed_seq, batch_size)?;
                let Some(last_seq) = batch.last().map(|d| d.metadata.seq) else {
                    break;
                };
                let full = batch.len() == batch_size;
                let request = PushRequest {
                    node_id: self.store.node_id().clone(),
                    changes: batch.iter().map(Change::from).collect(),
                };

                let response = guarded(&mut self.stop, self.transport.push(&request))
                    .await
                    .ok_or(Interrupt::Stopped)?
                    .map_err(Error::from)?;
                self.last_contact = Instant::now();

                tracing::debug!(
                    sent = request.changes.len(),
                    accepted = response.accepted.len(),
                    rejected = response.rejected.len(),
                    "pushed batch"
                );
                for rejected in &response.rejected {
                    tracing::debug!(
                        id = %rejected.id,
                        winning_updated_at = rejected.winning_updated_at,
                        reason = %rejected.reason,
                        "endpoint kept its copy"
                    );
                }

                checkpoint.pushed_seq = last_seq;
                self.checkpoints.save(&checkpoint)?;
                if !full {
                    break;
                }
            }
        }

        if self.options.direction.pulls() {
            loop {
                let request = PullRequest::new(checkpoint.pulled, batch_size);
                let page = guarded(&mut self.stop, self.transport.pull(request))
                    .await
                    .ok_or(Interrupt::Stopped)?
                    .map_err(Error::from)?;
                self.last_contact = Instant::now();

                let mut applied = 0usize;
                let mut kept = 0usize;
                for change in page.changes.iter().cloned() {
                    let id = change.id.clone();
                    match apply_remote(&self.store, &change.into_document()) {
                        Ok(RemoteApply::Applied { .. }) => applied += 1,
                        Ok(RemoteApply::LocalKept(_)) => kept += 1,
                        Ok(RemoteApply::Unchanged) => {}
                        Err(e @ Error::StorageFault(_)) => return Err(e.into()),
                        Err(e) => {
                            tracing::warn!(%id, error = %e, "skipping remote change");
                        }
                    }
                }
                tracing::debug!(
                    received = page.changes.len(),
                    applied,
                    kept_local = kept,
                    checkpoint = page.checkpoint,
                    "pulled page"
                );

                if page.has_more && page.checkpoint <= request.since {
                    return Err(Interrupt::Failed(SyncFailure::new(
                        FailureCause::Protocol,
                        format!("pull checkpoint stuck at {}", page.checkpoint),
                    )));
                }
                checkpoint.pulled = page.checkpoint;
                self.checkpoints.save(&checkpoint)?;
                if !page.has_more {
                    break;
                }
            }
        }

        Ok(())
    }
}
