//! Wire types shared by the replication client and the sync endpoint.
//!
//! Everything here is plain serde data in camelCase. Transports decide how
//! the messages travel; the HTTP mapping is:
//!
//! | Route                       | Request         | Response            |
//! |-----------------------------|-----------------|---------------------|
//! | `GET /sync/handshake`       |                 | [`HandshakeResponse`] |
//! | `POST /sync/push`           | [`PushRequest`] | [`PushResponse`]    |
//! | `GET /sync/pull?since&limit`| [`PullRequest`] | [`PullResponse`]    |
//! | `GET /health`               |                 | heartbeat           |

use crate::{DocType, Document, Fields, Metadata, NodeId, RecordId, Seq, Timestamp};
use serde::{Deserialize, Serialize};

/// Version of the wire protocol spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default page size for pulls.
pub const DEFAULT_PULL_LIMIT: usize = 100;

/// Largest page a pull may request.
pub const MAX_PULL_LIMIT: usize = 1000;

/// The replicated content of one document.
///
/// Revisions and sequence numbers are local to each store and never cross
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub doc_type: DocType,
    #[serde(default)]
    pub fields: Fields,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
}

impl Change {
    /// Convert into a remote-origin document ready for reconciliation.
    pub fn into_document(self) -> Document {
        Document {
            id: self.id,
            doc_type: self.doc_type,
            fields: self.fields,
            revision: 0,
            metadata: Metadata::new_remote(self.created_at, self.updated_at),
            deleted: self.deleted,
        }
    }
}

impl From<&Document> for Change {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            doc_type: document.doc_type.clone(),
            fields: document.fields.clone(),
            created_at: document.metadata.created_at,
            updated_at: document.metadata.updated_at,
            deleted: document.deleted,
        }
    }
}

impl From<Document> for Change {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            doc_type: document.doc_type,
            fields: document.fields,
            created_at: document.metadata.created_at,
            updated_at: document.metadata.updated_at,
            deleted: document.deleted,
        }
    }
}

/// Reply to a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    /// Node id of the endpoint
    pub node_id: NodeId,
    pub protocol_version: u32,
}

/// Outbound batch of local changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Node id of the pushing store
    pub node_id: NodeId,
    pub changes: Vec<Change>,
}

/// A pushed change the endpoint did not take because its copy is newer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedChange {
    pub id: RecordId,
    pub reason: String,
    /// `updatedAt` of the copy that won
    pub winning_updated_at: Timestamp,
}

/// Endpoint verdict on a [`PushRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Ids stored (or already present with identical content)
    pub accepted: Vec<RecordId>,
    pub rejected: Vec<RejectedChange>,
}

/// Page request for inbound changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Checkpoint returned by the previous pull, 0 for the first
    #[serde(default)]
    pub since: Seq,
    #[serde(default = "default_pull_limit")]
    pub limit: usize,
}

fn default_pull_limit() -> usize {
    DEFAULT_PULL_LIMIT
}

impl PullRequest {
    pub fn new(since: Seq, limit: usize) -> Self {
        Self { since, limit }
    }

    /// Limit clamped to `1..=MAX_PULL_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PULL_LIMIT)
    }
}

impl Default for PullRequest {
    fn default() -> Self {
        Self::new(0, DEFAULT_PULL_LIMIT)
    }
}

/// One page of inbound changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Changes in endpoint sequence order
    pub changes: Vec<Change>,
    /// Checkpoint to resume from; unchanged when the page is empty
    pub checkpoint: Seq,
    pub has_more: bool,
}
