//! Replication with a remote endpoint.
//!
//! - [`machine`]: the pure state machine and retry policy
//! - [`driver`]: the tokio task executing the machine's actions against a
//!   [`Transport`](crate::transport::Transport)
//!
//! Progress is published through a [`StatusPublisher`]: a broadcast channel
//! carries every transition, a watch channel the latest status, and failures
//! are queued for the user on the [`ErrorQueue`].

pub mod driver;
pub mod machine;

pub use driver::{Replicator, SyncContext};
pub use machine::{Action, Event, ReplicationMachine, ReplicationState, RetryPolicy};

use crate::errors::{ErrorEntry, ErrorQueue};
use crate::Error;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Capacity of the transition broadcast; slow receivers lag, never block.
const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Category of a replication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCause {
    Transport,
    Auth,
    Storage,
    Protocol,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transport => "transport",
            Self::Auth => "auth",
            Self::Storage => "storage",
            Self::Protocol => "protocol",
        })
    }
}

/// Why the last attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{cause} failure: {message}")]
pub struct SyncFailure {
    pub message: String,
    pub cause: FailureCause,
}

impl SyncFailure {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }
}

impl From<&Error> for SyncFailure {
    fn from(err: &Error) -> Self {
        let cause = match err {
            Error::Transport(_) => FailureCause::Transport,
            Error::Auth(_) => FailureCause::Auth,
            Error::StorageFault(_) => FailureCause::Storage,
            _ => FailureCause::Protocol,
        };
        Self::new(cause, err.to_string())
    }
}

impl From<Error> for SyncFailure {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

/// Observable status of replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationStatus {
    pub state: ReplicationState,
    /// Consecutive failed attempts
    pub attempt: u32,
    pub last_error: Option<SyncFailure>,
    /// Wait before the next attempt while `Retrying`
    #[serde(skip)]
    pub retry_in: Option<Duration>,
}

impl ReplicationStatus {
    pub fn stopped() -> Self {
        Self {
            state: ReplicationState::Stopped,
            attempt: 0,
            last_error: None,
            retry_in: None,
        }
    }

    fn from_machine(machine: &ReplicationMachine, retry_in: Option<Duration>) -> Self {
        Self {
            state: machine.state(),
            attempt: machine.failures(),
            last_error: machine.last_error().cloned(),
            retry_in,
        }
    }
}

impl Default for ReplicationStatus {
    fn default() -> Self {
        Self::stopped()
    }
}

/// Fan-out of status changes.
#[derive(Debug)]
pub struct StatusPublisher {
    events: broadcast::Sender<ReplicationStatus>,
    latest: watch::Sender<ReplicationStatus>,
    errors: Arc<ErrorQueue>,
}

impl StatusPublisher {
    pub fn new(errors: Arc<ErrorQueue>) -> Self {
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (latest, _) = watch::channel(ReplicationStatus::stopped());
        Self {
            events,
            latest,
            errors,
        }
    }

    /// Publish a status. Failure states are also queued for the user.
    pub fn publish(&self, status: ReplicationStatus) {
        if matches!(
            status.state,
            ReplicationState::Retrying | ReplicationState::PermanentlyFailed
        ) {
            if let Some(failure) = &status.last_error {
                self.errors.push(ErrorEntry::sync(failure));
            }
        }
        self.latest.send_replace(status.clone());
        // No receivers is fine
        let _ = self.events.send(status);
    }

    pub fn current(&self) -> ReplicationStatus {
        self.latest.borrow().clone()
    }

    /// Every transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicationStatus> {
        self.events.subscribe()
    }

    /// The latest status.
    pub fn watch(&self) -> watch::Receiver<ReplicationStatus> {
        self.latest.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_causes() {
        assert_eq!(
            SyncFailure::from(&Error::Auth("401".into())).cause,
            FailureCause::Auth
        );
        assert_eq!(
            SyncFailure::from(Error::StorageFault("disk".into())).cause,
            FailureCause::Storage
        );
        assert_eq!(
            SyncFailure::from(Error::InvalidDocument("x".into())).cause,
            FailureCause::Protocol
        );

        let failure = SyncFailure::from(&Error::Transport("reset".into()));
        assert_eq!(failure.to_string(), "transport failure: transport error: reset");
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = ReplicationStatus {
            state: ReplicationState::PermanentlyFailed,
            attempt: 15,
            last_error: Some(SyncFailure::new(FailureCause::Auth, "denied")),
            retry_in: None,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "permanentlyFailed");
        assert_eq!(value["lastError"]["cause"], "auth");
    }

    #[tokio::test]
    async fn publisher_fans_out_and_queues_failures() {
        let errors = Arc::new(ErrorQueue::new());
        let publisher = StatusPublisher::new(errors.clone());
        let mut events = publisher.subscribe();

        publisher.publish(ReplicationStatus {
            state: ReplicationState::Connecting,
            ..ReplicationStatus::stopped()
        });
        publisher.publish(ReplicationStatus {
            state: ReplicationState::Retrying,
            attempt: 1,
            last_error: Some(SyncFailure::new(FailureCause::Transport, "offline")),
            retry_in: Some(Duration::from_secs(1)),
        });

        assert_eq!(events.recv().await.unwrap().state, ReplicationState::Connecting);
        assert_eq!(events.recv().await.unwrap().state, ReplicationState::Retrying);
        assert_eq!(publisher.current().attempt, 1);

        assert_eq!(errors.len(), 1);
        let entry = errors.current().unwrap();
        assert_eq!(entry.title, "Sync Error");
        assert_eq!(entry.message, "transport failure: offline");
    }
}
