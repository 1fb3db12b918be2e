//! Conflict resolution for replicated writes.
//!
//! The policy is deterministic last-writer-wins on `updatedAt`: the document
//! with the later timestamp survives and, on an exact tie, the remote side
//! wins. A sync endpoint evaluates the very same function with the roles
//! mirrored (incoming push as "local", its stored copy as "remote"), which
//! makes the stored copy win ties there, so both ends converge on one
//! winner.
//!
//! # Applying remote changes
//!
//! [`apply_remote`] goes through the store's public optimistic `put`: it
//! reads the stored revision, resolves, and writes with that revision as the
//! expectation. A concurrent local write surfaces as [`Error::Conflict`], in
//! which case the document is re-read and the decision taken again.

use crate::{error::Result, Document, Error, Origin, RecordStore, Revision, Timestamp};
use serde::{Deserialize, Serialize};

/// How many times a remote change is re-resolved after losing a race with a
/// local write.
pub const MAX_APPLY_ATTEMPTS: usize = 8;

/// Outcome of comparing a local document with a remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// The local document is strictly newer and stays
    LocalWins,
    /// The remote document replaces the local one
    RemoteWins,
    /// Both carry the same content; nothing to do
    AlreadyCurrent,
}

/// Decide between the locally stored document (if any) and a remote one.
pub fn resolve(local: Option<&Document>, remote: &Document) -> Resolution {
    match local {
        None => Resolution::RemoteWins,
        Some(local) if local.same_content(remote) => Resolution::AlreadyCurrent,
        Some(local) if local.metadata.updated_at > remote.metadata.updated_at => {
            Resolution::LocalWins
        }
        Some(_) => Resolution::RemoteWins,
    }
}

/// Details of a resolved disagreement, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub local_updated_at: Timestamp,
    pub remote_updated_at: Timestamp,
    pub resolution: Resolution,
}

/// Result of applying one remote change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteApply {
    /// Written with the given local revision
    Applied {
        revision: Revision,
        conflict: Option<Conflict>,
    },
    /// The local document is newer
    LocalKept(Conflict),
    /// Content already present
    Unchanged,
}

/// Apply a remote document to the store under the last-writer-wins policy.
pub fn apply_remote(store: &RecordStore, remote: &Document) -> Result<RemoteApply> {
    let mut last_conflict = None;

    for _ in 0..MAX_APPLY_ATTEMPTS {
        let local = store.get_including_deleted(&remote.id)?;
        let resolution = resolve(local.as_ref(), remote);
        let conflict = local.as_ref().map(|l| Conflict {
            id: remote.id.clone(),
            local_updated_at: l.metadata.updated_at,
            remote_updated_at: remote.metadata.updated_at,
            resolution,
        });

        match (resolution, conflict) {
            (Resolution::AlreadyCurrent, _) => return Ok(RemoteApply::Unchanged),
            (Resolution::LocalWins, Some(conflict)) => {
                return Ok(RemoteApply::LocalKept(conflict))
            }
            (_, conflict) => {
                let expected = local.as_ref().map_or(0, |l| l.revision);
                let mut incoming = remote.clone();
                incoming.metadata.origin = Origin::Remote;

                match store.put(incoming, Some(expected)) {
                    Ok(revision) => return Ok(RemoteApply::Applied { revision, conflict }),
                    Err(err @ Error::Conflict { .. }) => last_conflict = Some(err),
                    Err(err) => return Err(err),
                }
            }
        }
    }

    Err(last_conflict.unwrap_or(Error::Conflict {
        expected: 0,
        actual: 0,
    }))
}
