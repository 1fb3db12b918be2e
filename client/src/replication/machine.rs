//! Replication state machine.
//!
//! Pure and side-effect free: the machine takes events and answers with the
//! next [`Action`] for the driver to perform. Timers, network calls and store
//! writes all live in the driver, so every transition is testable without a
//! runtime.
//!
//! ```text
//! Stopped ─Start─▶ Connecting ─HandshakeSucceeded─▶ Syncing ─┐
//!                      ▲                              │  ▲   │ ExchangeCompleted
//!                      │ RetryElapsed        Failed   │  └───┘ (continuous)
//!                      └──────── Retrying ◀───────────┘
//!                                   │ failures >= max_attempts
//!                                   ▼
//!                           PermanentlyFailed
//! ```

use super::SyncFailure;
use crate::config::ReplicationOptions;
use serde::Serialize;
use std::time::Duration;

/// Base delay of the first retry.
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle state of a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplicationState {
    Stopped,
    Connecting,
    Syncing,
    Retrying,
    /// Gave up; terminal until restarted
    PermanentlyFailed,
}

impl ReplicationState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Syncing | Self::Retrying)
    }
}

/// Exponential backoff without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_wait: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_options(options: &ReplicationOptions) -> Self {
        Self {
            base: BASE_RETRY_DELAY,
            max_wait: options.max_attempt_wait,
            max_attempts: options.max_attempts.max(1),
        }
    }

    /// Wait before the retry following the `attempt`-th consecutive failure.
    ///
    /// `min(max_wait, base * 2^(attempt - 1))`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max_wait, |wait| wait.min(self.max_wait))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&ReplicationOptions::default())
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    HandshakeSucceeded,
    ExchangeCompleted,
    /// Local write or poll timer while idle
    Woken,
    Failed(SyncFailure),
    RetryElapsed,
    Stop,
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Handshake with the endpoint
    Connect,
    /// Push then pull until caught up
    Exchange,
    /// Sleep, then report `RetryElapsed`
    Wait(Duration),
    /// Wait for a local write, the poll timer or the heartbeat
    Idle,
    /// End the session
    Halt,
    /// Event not valid in this state; nothing to do
    Ignore,
}

/// The state machine of one replication session.
#[derive(Debug, Clone)]
pub struct ReplicationMachine {
    state: ReplicationState,
    failures: u32,
    last_error: Option<SyncFailure>,
    policy: RetryPolicy,
    continuous: bool,
}

impl ReplicationMachine {
    pub fn new(policy: RetryPolicy, continuous: bool) -> Self {
        Self {
            state: ReplicationState::Stopped,
            failures: 0,
            last_error: None,
            policy,
            continuous,
        }
    }

    pub fn state(&self) -> ReplicationState {
        self.state
    }

    /// Consecutive failed attempts in the current episode.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_error(&self) -> Option<&SyncFailure> {
        self.last_error.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Give up on an internal error; terminal until restarted.
    pub fn fault(&mut self, failure: SyncFailure) {
        self.state = ReplicationState::PermanentlyFailed;
        self.last_error = Some(failure);
    }

    /// Apply an event and return the action to perform.
    pub fn on_event(&mut self, event: Event) -> Action {
        use ReplicationState::*;

        match (self.state, event) {
            (_, Event::Stop) => {
                self.state = Stopped;
                Action::Halt
            }

            (Stopped | PermanentlyFailed, Event::Start) => {
                self.state = Connecting;
                self.failures = 0;
                self.last_error = None;
                Action::Connect
            }

            // Only a completed exchange ends a failure episode
            (Connecting, Event::HandshakeSucceeded) => {
                self.state = Syncing;
                Action::Exchange
            }

            (Syncing, Event::ExchangeCompleted) => {
                self.last_error = None;
                if self.continuous {
                    self.failures = 0;
                    Action::Idle
                } else {
                    self.state = Stopped;
                    Action::Halt
                }
            }
            (Syncing, Event::Woken) => Action::Exchange,

            (Connecting | Syncing, Event::Failed(failure)) => {
                self.failures = self.failures.saturating_add(1);
                self.last_error = Some(failure);
                if self.failures >= self.policy.max_attempts {
                    self.state = PermanentlyFailed;
                    Action::Halt
                } else {
                    self.state = Retrying;
                    Action::Wait(self.policy.backoff(self.failures))
                }
            }

            (Retrying, Event::RetryElapsed) => {
                self.state = Connecting;
                Action::Connect
            }

            _ => Action::Ignore,
        }
    }
}
