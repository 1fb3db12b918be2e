//! Replication against the mock endpoint, on paused time so backoff
//! schedules run instantly.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tideline_client::tideline_engine::protocol::PROTOCOL_VERSION;
use tideline_client::tideline_engine::{
    Change, Fields, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
};
use tideline_client::{
    Direction, FailureCause, MockTransport, Notebook, ReplicationOptions, ReplicationState,
    ReplicationStatus, Transport, TransportError,
};
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout};

fn offline() -> TransportError {
    TransportError::Unreachable("connection refused".into())
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(3600), async {
        while !check() {
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Collect transitions up to and including the first one in `state`.
async fn until_state(
    events: &mut broadcast::Receiver<ReplicationStatus>,
    state: ReplicationState,
) -> Vec<ReplicationStatus> {
    let mut seen = Vec::new();
    loop {
        let status = events.recv().await.expect("status channel closed");
        let done = status.state == state;
        seen.push(status);
        if done {
            return seen;
        }
    }
}

/// Collect transitions until an exchange has completed cleanly.
async fn until_synced(
    events: &mut broadcast::Receiver<ReplicationStatus>,
) -> Vec<ReplicationStatus> {
    let mut seen = Vec::new();
    loop {
        let status = events.recv().await.expect("status channel closed");
        let done = status.state == ReplicationState::Syncing && status.attempt == 0;
        seen.push(status);
        if done {
            return seen;
        }
    }
}

fn handshake() -> HandshakeResponse {
    HandshakeResponse {
        node_id: "endpoint".into(),
        protocol_version: PROTOCOL_VERSION,
    }
}

/// Accepts the handshake, then fails every push and pull with a 500.
#[derive(Default)]
struct BrokenExchange {
    handshakes: AtomicUsize,
}

#[async_trait]
impl Transport for BrokenExchange {
    async fn handshake(&self) -> Result<HandshakeResponse, TransportError> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        Ok(handshake())
    }

    async fn push(&self, _request: &PushRequest) -> Result<PushResponse, TransportError> {
        Err(TransportError::Status {
            status: 500,
            message: "push failed".into(),
        })
    }

    async fn pull(&self, _request: PullRequest) -> Result<PullResponse, TransportError> {
        Err(TransportError::Status {
            status: 500,
            message: "pull failed".into(),
        })
    }

    async fn heartbeat(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Accepts everything except pulls, which never answer.
#[derive(Default)]
struct StalledPull {
    pulls: AtomicUsize,
}

#[async_trait]
impl Transport for StalledPull {
    async fn handshake(&self) -> Result<HandshakeResponse, TransportError> {
        Ok(handshake())
    }

    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        Ok(PushResponse {
            accepted: request.changes.iter().map(|c| c.id.clone()).collect(),
            rejected: Vec::new(),
        })
    }

    async fn pull(&self, _request: PullRequest) -> Result<PullResponse, TransportError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn heartbeat(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

fn remote_note(id: &str, title: &str, updated_at: u64) -> Change {
    let mut fields = Fields::new();
    fields.insert("title".into(), json!(title));
    fields.insert("content".into(), json!("from elsewhere"));
    Change {
        id: id.into(),
        doc_type: "note".into(),
        fields,
        created_at: updated_at,
        updated_at,
        deleted: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_failures_below_limit_end_in_syncing() {
    for failures in [1usize, 3, 14] {
        let notebook = Notebook::in_memory().unwrap();
        let mock = MockTransport::new();
        mock.fail_times(failures, offline());

        let mut events = notebook.sync_events();
        notebook
            .start_sync_with(std::sync::Arc::new(mock.clone()), ReplicationOptions::default())
            .await
            .unwrap();

        let seen = until_state(&mut events, ReplicationState::Syncing).await;
        let retries: Vec<&ReplicationStatus> = seen
            .iter()
            .filter(|s| s.state == ReplicationState::Retrying)
            .collect();
        assert_eq!(retries.len(), failures);

        let mut last_wait = Duration::ZERO;
        for (n, status) in retries.iter().enumerate() {
            assert_eq!(status.attempt as usize, n + 1);
            assert_eq!(
                status.last_error.as_ref().map(|e| e.cause),
                Some(FailureCause::Transport)
            );
            let wait = status.retry_in.expect("retrying without a wait");
            assert!(wait >= last_wait, "backoff shrank at attempt {}", n + 1);
            assert!(wait <= Duration::from_secs(180));
            last_wait = wait;
        }

        // Connecting again does not end the episode; the exchange does
        let syncing = seen.last().unwrap();
        assert_eq!(syncing.attempt as usize, failures);
        assert_eq!(mock.calls().handshakes, failures + 1);
        until_synced(&mut events).await;

        notebook.stop_sync().await;
        assert_eq!(notebook.sync_status().state, ReplicationState::Stopped);
        notebook.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_attempts_fail_permanently() {
    let notebook = Notebook::in_memory().unwrap();
    let mock = MockTransport::new();
    mock.fail_always(Some(offline()));

    let mut status = notebook.watch_sync_status();
    notebook
        .start_sync_with(std::sync::Arc::new(mock.clone()), ReplicationOptions::default())
        .await
        .unwrap();

    let failed = status
        .wait_for(|s| s.state == ReplicationState::PermanentlyFailed)
        .await
        .unwrap()
        .clone();
    assert_eq!(failed.attempt, 15);
    assert_eq!(mock.calls().handshakes, 15);

    // Every failed attempt was queued for the user
    assert_eq!(notebook.errors().len(), 15);
    assert_eq!(notebook.errors().current().unwrap().title, "Sync Error");

    // No further attempts once given up
    sleep(Duration::from_secs(3600)).await;
    assert_eq!(mock.calls().handshakes, 15);

    notebook.stop_sync().await;
    notebook.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failure_count_resets_after_syncing() {
    let notebook = Notebook::in_memory().unwrap();
    let mock = MockTransport::new();
    mock.fail_times(4, offline());

    let mut events = notebook.sync_events();
    notebook
        .start_sync_with(std::sync::Arc::new(mock.clone()), ReplicationOptions::default())
        .await
        .unwrap();
    until_synced(&mut events).await;

    // The next poll or heartbeat fails: a fresh episode starts at 1
    mock.fail_next(offline());
    let seen = until_state(&mut events, ReplicationState::Retrying).await;
    let retrying = seen.last().unwrap();
    assert_eq!(retrying.attempt, 1);
    assert_eq!(retrying.retry_in, Some(Duration::from_secs(1)));

    until_state(&mut events, ReplicationState::Syncing).await;
    notebook.stop_sync().await;
    notebook.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_local_and_remote_notes_flow_both_ways() {
    let notebook = Notebook::in_memory().unwrap();
    let mock = MockTransport::new();
    let id = notebook.create("Local", "typed here").unwrap();

    notebook
        .start_sync_with(std::sync::Arc::new(mock.clone()), ReplicationOptions::default())
        .await
        .unwrap();
    eventually(|| mock.remote_document(&id).is_some()).await;
    assert_eq!(mock.remote_document(&id).unwrap().fields["title"], "Local");

    // A later local write wakes the session without waiting for the poll
    notebook.update(&id, "Local, edited", "typed here").unwrap();
    eventually(|| {
        mock.remote_document(&id)
            .is_some_and(|c| c.fields["title"] == "Local, edited")
    })
    .await;

    let mut notes = notebook.notes(Direction::Ascending, None).unwrap();
    notes.next().await.unwrap();
    mock.insert_remote(remote_note("remote-1", "Remote", 1));

    let snapshot = loop {
        let snapshot = notes.next().await.unwrap();
        if snapshot.len() == 2 {
            break snapshot;
        }
    };
    assert!(snapshot.ids().contains(&"remote-1"));
    assert_eq!(notebook.get("remote-1").unwrap().title, "Remote");

    notebook.stop_sync().await;
    notebook.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_newer_remote_copy_wins() {
    let notebook = Notebook::in_memory().unwrap().with_clock(|| 1_000);
    let mock = MockTransport::new();
    let id = notebook.create("Mine", "old").unwrap();
    mock.insert_remote(remote_note(&id, "Theirs", 5_000));

    let options = ReplicationOptions {
        continuous: false,
        ..ReplicationOptions::default()
    };
    let mut events = notebook.sync_events();
    notebook
        .start_sync_with(std::sync::Arc::new(mock.clone()), options)
        .await
        .unwrap();
    until_state(&mut events, ReplicationState::Syncing).await;
    until_state(&mut events, ReplicationState::Stopped).await;

    // The endpoint kept its newer copy and the pull brought it here
    assert_eq!(mock.remote_document(&id).unwrap().fields["title"], "Theirs");
    assert_eq!(notebook.get(&id).unwrap().title, "Theirs");
    assert_eq!(mock.calls().pushes, 1);

    notebook.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retries_wait_for_reachability() {
    let (reachable, feed) = watch::channel(false);
    let notebook = Notebook::in_memory().unwrap().with_reachability(feed);
    let mock = MockTransport::new();
    mock.fail_next(offline());

    let mut events = notebook.sync_events();
    notebook
        .start_sync_with(std::sync::Arc::new(mock.clone()), ReplicationOptions::default())
        .await
        .unwrap();
    until_state(&mut events, ReplicationState::Retrying).await;

    sleep(Duration::from_secs(600)).await;
    assert_eq!(mock.calls().handshakes, 1);

    reachable.send(true).unwrap();
    until_state(&mut events, ReplicationState::Syncing).await;
    assert_eq!(mock.calls().handshakes, 2);

    notebook.stop_sync().await;
    notebook.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_exchange_backs_off_until_permanently_failed() {
    let notebook = Notebook::in_memory().unwrap();
    notebook.create("Local", "never leaves").unwrap();
    let endpoint = Arc::new(BrokenExchange::default());

    let mut events = notebook.sync_events();
    notebook
        .start_sync_with(endpoint.clone(), ReplicationOptions::default())
        .await
        .unwrap();

    let seen = until_state(&mut events, ReplicationState::PermanentlyFailed).await;
    let failed = seen.last().unwrap();
    assert_eq!(failed.attempt, 15);
    assert_eq!(
        failed.last_error.as_ref().map(|e| e.cause),
        Some(FailureCause::Transport)
    );

    let waits: Vec<Duration> = seen
        .iter()
        .filter(|s| s.state == ReplicationState::Retrying)
        .map(|s| s.retry_in.expect("retrying without a wait"))
        .collect();
    assert_eq!(waits.len(), 14);
    assert!(waits.windows(2).all(|w| w[0] <= w[1]), "backoff shrank: {waits:?}");
    assert_eq!(waits.last(), Some(&Duration::from_secs(180)));

    // Each handshake succeeded, yet the count kept climbing
    assert_eq!(endpoint.handshakes.load(Ordering::SeqCst), 15);
    assert_eq!(notebook.errors().len(), 15);

    notebook.stop_sync().await;
    notebook.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_a_pull_in_flight() {
    let notebook = Notebook::in_memory().unwrap();
    let endpoint = Arc::new(StalledPull::default());
    let before = notebook.store().read().unwrap().last_seq();

    notebook
        .start_sync_with(endpoint.clone(), ReplicationOptions::default())
        .await
        .unwrap();
    eventually(|| endpoint.pulls.load(Ordering::SeqCst) > 0).await;

    timeout(Duration::from_secs(5), notebook.stop_sync())
        .await
        .expect("stop waited on the pull");
    assert_eq!(notebook.sync_status().state, ReplicationState::Stopped);

    let view = notebook.store().read().unwrap();
    assert_eq!(view.last_seq(), before);
    assert!(view.is_empty());
    drop(view);

    notebook.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_retrying_cancels_the_timer() {
    let notebook = Notebook::in_memory().unwrap();
    let mock = MockTransport::new();
    mock.fail_always(Some(offline()));

    let mut events = notebook.sync_events();
    notebook
        .start_sync_with(Arc::new(mock.clone()), ReplicationOptions::default())
        .await
        .unwrap();
    until_state(&mut events, ReplicationState::Retrying).await;

    notebook.stop_sync().await;
    let status = notebook.sync_status();
    assert_eq!(status.state, ReplicationState::Stopped);
    assert_eq!(status.retry_in, None);

    let handshakes = mock.calls().handshakes;
    sleep(Duration::from_secs(3600)).await;
    assert_eq!(mock.calls().handshakes, handshakes);

    notebook.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_permanent_failure() {
    let notebook = Notebook::in_memory().unwrap();
    let mock = MockTransport::new();
    mock.fail_always(Some(offline()));

    let options = ReplicationOptions {
        max_attempts: 2,
        ..ReplicationOptions::default()
    };
    let mut status = notebook.watch_sync_status();
    notebook
        .start_sync_with(Arc::new(mock.clone()), options)
        .await
        .unwrap();
    status
        .wait_for(|s| s.state == ReplicationState::PermanentlyFailed)
        .await
        .unwrap();

    notebook.stop_sync().await;
    let stopped = notebook.sync_status();
    assert_eq!(stopped.state, ReplicationState::Stopped);
    assert_eq!(stopped.attempt, 2);
    // Stopping is not itself an error
    assert_eq!(notebook.errors().len(), 2);

    // A second stop has nothing left to do
    notebook.stop_sync().await;
    assert_eq!(notebook.sync_status().state, ReplicationState::Stopped);
    assert_eq!(mock.calls().handshakes, 2);

    notebook.shutdown().await;
}
