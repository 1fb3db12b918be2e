//! Document persistence for the sync endpoint.
//!
//! The endpoint keeps only the latest state of each document plus a global
//! sequence number reassigned on every accepted write. Pulls page through
//! that sequence, so a client resuming from a checkpoint sees every document
//! whose latest write it has not seen yet.

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

use crate::error::Result;
use async_trait::async_trait;
use tideline_engine::{resolve, Change, Resolution, Seq, Timestamp};

/// What happened to one pushed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Written with a fresh sequence number
    Stored(Seq),
    /// The stored copy already has this content
    Unchanged,
    /// The stored copy wins; it carries this `updatedAt`
    Rejected { winning_updated_at: Timestamp },
}

/// Storage seam of the endpoint.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Apply a pushed batch under last-writer-wins.
    ///
    /// Batches are serialized: sequence numbers become visible to pulls in
    /// the order they were assigned.
    async fn apply(&self, changes: &[Change]) -> Result<Vec<PushOutcome>>;

    /// Up to `limit` documents written after `since`, in sequence order.
    async fn changes_since(&self, since: Seq, limit: usize) -> Result<Vec<(Seq, Change)>>;

    async fn get(&self, id: &str) -> Result<Option<Change>>;
}

/// Whether an incoming change should replace the stored one.
///
/// The incoming push plays the local side and the stored copy the remote
/// side, so the stored copy wins ties.
pub(crate) fn decide(incoming: &Change, stored: Option<&Change>) -> Decision {
    let Some(stored) = stored else {
        return Decision::Store;
    };
    let incoming_doc = incoming.clone().into_document();
    match resolve(Some(&incoming_doc), &stored.clone().into_document()) {
        Resolution::LocalWins => Decision::Store,
        Resolution::AlreadyCurrent => Decision::Unchanged,
        Resolution::RemoteWins => Decision::Keep(stored.updated_at),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Store,
    Unchanged,
    Keep(Timestamp),
}
