//! Mock transport for testing.
//!
//! Holds an in-process endpoint: a change log with last-writer-wins on push
//! (the stored copy winning ties), paged pulls, and injectable failures.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tideline_engine::protocol::PROTOCOL_VERSION;
use tideline_engine::{
    resolve, Change, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    RecordId, RejectedChange, Resolution, Seq,
};

/// Mock transport for testing.
///
/// Clones share one endpoint.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    documents: BTreeMap<RecordId, (Seq, Change)>,
    last_seq: Seq,
    fail_queue: VecDeque<TransportError>,
    fail_always: Option<TransportError>,
    calls: CallCounts,
    pushed: Vec<PushRequest>,
}

/// Number of calls per operation, failed ones included.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub handshakes: usize,
    pub pushes: usize,
    pub pulls: usize,
    pub heartbeats: usize,
}

impl MockTransport {
    /// Create a mock endpoint with no documents.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cause the next call to fail with the given error.
    pub fn fail_next(&self, error: TransportError) {
        self.lock().fail_queue.push_back(error);
    }

    /// Fail the next `count` calls.
    pub fn fail_times(&self, count: usize, error: TransportError) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.fail_queue.push_back(error.clone());
        }
    }

    /// Fail every call until cleared with `None`.
    pub fn fail_always(&self, error: Option<TransportError>) {
        self.lock().fail_always = error;
    }

    /// Store a change as if another client had pushed it.
    pub fn insert_remote(&self, change: Change) {
        let mut inner = self.lock();
        inner.last_seq += 1;
        let seq = inner.last_seq;
        inner.documents.insert(change.id.clone(), (seq, change));
    }

    /// The endpoint's copy of a document.
    pub fn remote_document(&self, id: &str) -> Option<Change> {
        self.lock().documents.get(id).map(|(_, change)| change.clone())
    }

    /// Number of documents on the endpoint, tombstones included.
    pub fn remote_len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Every push request received, failed ones excluded.
    pub fn pushed(&self) -> Vec<PushRequest> {
        self.lock().pushed.clone()
    }

    /// Clear all state (documents, failures, counters).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

impl MockTransportInner {
    fn check_failure(&mut self) -> Result<(), TransportError> {
        if let Some(error) = self.fail_queue.pop_front() {
            return Err(error);
        }
        match &self.fail_always {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn accept(&mut self, change: &Change, response: &mut PushResponse) {
        let resolution = match self.documents.get(&change.id) {
            None => Resolution::LocalWins,
            Some((_, stored)) => resolve(
                Some(&change.clone().into_document()),
                &stored.clone().into_document(),
            ),
        };

        match resolution {
            Resolution::LocalWins => {
                self.last_seq += 1;
                self.documents
                    .insert(change.id.clone(), (self.last_seq, change.clone()));
                response.accepted.push(change.id.clone());
            }
            Resolution::AlreadyCurrent => response.accepted.push(change.id.clone()),
            Resolution::RemoteWins => {
                let winning_updated_at = self
                    .documents
                    .get(&change.id)
                    .map_or(change.updated_at, |(_, stored)| stored.updated_at);
                response.rejected.push(RejectedChange {
                    id: change.id.clone(),
                    reason: "newer copy stored".into(),
                    winning_updated_at,
                });
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn handshake(&self) -> Result<HandshakeResponse, TransportError> {
        let mut inner = self.lock();
        inner.calls.handshakes += 1;
        inner.check_failure()?;
        Ok(HandshakeResponse {
            node_id: "mock-endpoint".into(),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        let mut inner = self.lock();
        inner.calls.pushes += 1;
        inner.check_failure()?;

        let mut response = PushResponse::default();
        for change in &request.changes {
            inner.accept(change, &mut response);
        }
        inner.pushed.push(request.clone());
        Ok(response)
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, TransportError> {
        let mut inner = self.lock();
        inner.calls.pulls += 1;
        inner.check_failure()?;

        let mut newer: Vec<&(Seq, Change)> = inner
            .documents
            .values()
            .filter(|(seq, _)| *seq > request.since)
            .collect();
        newer.sort_by_key(|(seq, _)| *seq);

        let limit = request.effective_limit();
        let has_more = newer.len() > limit;
        let page: Vec<&(Seq, Change)> = newer.into_iter().take(limit).collect();
        let checkpoint = page.last().map_or(request.since, |(seq, _)| *seq);

        Ok(PullResponse {
            changes: page.into_iter().map(|(_, change)| change.clone()).collect(),
            checkpoint,
            has_more,
        })
    }

    async fn heartbeat(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.calls.heartbeats += 1;
        inner.check_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideline_engine::Fields;

    fn change(id: &str, title: &str, updated_at: u64) -> Change {
        let mut fields = Fields::new();
        fields.insert("title".into(), title.into());
        fields.insert("content".into(), "body".into());
        Change {
            id: id.into(),
            doc_type: "note".into(),
            fields,
            created_at: 1000,
            updated_at,
            deleted: false,
        }
    }

    fn push(changes: Vec<Change>) -> PushRequest {
        PushRequest {
            node_id: "client".into(),
            changes,
        }
    }

    #[tokio::test]
    async fn push_then_pull() {
        let transport = MockTransport::new();
        let response = transport
            .push(&push(vec![change("a", "A", 1000), change("b", "B", 1000)]))
            .await
            .unwrap();
        assert_eq!(response.accepted, vec!["a", "b"]);

        let page = transport.pull(PullRequest::new(0, 1)).await.unwrap();
        assert_eq!(page.changes[0].id, "a");
        assert!(page.has_more);

        let page = transport
            .pull(PullRequest::new(page.checkpoint, 10))
            .await
            .unwrap();
        assert_eq!(page.changes[0].id, "b");
        assert!(!page.has_more);

        let empty = transport
            .pull(PullRequest::new(page.checkpoint, 10))
            .await
            .unwrap();
        assert!(empty.changes.is_empty());
        assert_eq!(empty.checkpoint, page.checkpoint);
    }

    #[tokio::test]
    async fn stored_copy_wins_ties_and_newer() {
        let transport = MockTransport::new();
        transport.insert_remote(change("a", "stored", 2000));

        let response = transport
            .push(&push(vec![change("a", "older", 1000), change("a", "tie", 2000)]))
            .await
            .unwrap();
        assert!(response.accepted.is_empty());
        assert_eq!(response.rejected.len(), 2);
        assert_eq!(response.rejected[0].winning_updated_at, 2000);
        assert_eq!(
            transport.remote_document("a").unwrap().fields["title"],
            "stored"
        );

        let response = transport
            .push(&push(vec![change("a", "newer", 3000)]))
            .await
            .unwrap();
        assert_eq!(response.accepted, vec!["a"]);
        assert_eq!(transport.remote_document("a").unwrap().fields["title"], "newer");
    }

    #[tokio::test]
    async fn identical_push_is_accepted_without_new_seq() {
        let transport = MockTransport::new();
        transport.insert_remote(change("a", "A", 1000));

        let response = transport.push(&push(vec![change("a", "A", 1000)])).await.unwrap();
        assert_eq!(response.accepted, vec!["a"]);

        let page = transport.pull(PullRequest::new(1, 10)).await.unwrap();
        assert!(page.changes.is_empty());
    }

    #[tokio::test]
    async fn injected_failures() {
        let transport = MockTransport::new();
        transport.fail_times(2, TransportError::Timeout);

        assert_eq!(transport.handshake().await, Err(TransportError::Timeout));
        assert_eq!(transport.heartbeat().await, Err(TransportError::Timeout));
        assert!(transport.handshake().await.is_ok());

        transport.fail_always(Some(TransportError::Unreachable("offline".into())));
        assert!(transport.pull(PullRequest::default()).await.is_err());
        transport.fail_always(None);
        assert!(transport.pull(PullRequest::default()).await.is_ok());

        let calls = transport.calls();
        assert_eq!(calls.handshakes, 2);
        assert_eq!(calls.heartbeats, 1);
        assert_eq!(calls.pulls, 2);
    }
}
