//! Push handler - applies incoming changes from clients.

use crate::error::{AppError, Result};
use crate::repository::{PushOutcome, Repository};
use tideline_engine::{Change, PushRequest, PushResponse, RejectedChange};

const STALE_REASON: &str = "newer copy stored";

/// Process a push request from a client.
pub async fn handle_push(repo: &dyn Repository, request: PushRequest) -> Result<PushResponse> {
    if request.changes.is_empty() {
        return Ok(PushResponse::default());
    }
    for change in &request.changes {
        validate(change)?;
    }

    let outcomes = repo.apply(&request.changes).await?;

    let mut response = PushResponse::default();
    for (change, outcome) in request.changes.into_iter().zip(outcomes) {
        match outcome {
            PushOutcome::Stored(_) | PushOutcome::Unchanged => response.accepted.push(change.id),
            PushOutcome::Rejected { winning_updated_at } => {
                response.rejected.push(RejectedChange {
                    id: change.id,
                    reason: STALE_REASON.to_string(),
                    winning_updated_at,
                })
            }
        }
    }

    tracing::debug!(
        node = %request.node_id,
        accepted = response.accepted.len(),
        rejected = response.rejected.len(),
        "push applied"
    );
    Ok(response)
}

fn validate(change: &Change) -> Result<()> {
    if change.id.trim().is_empty() {
        return Err(AppError::BadRequest("change id must not be empty".into()));
    }
    if change.doc_type.trim().is_empty() {
        return Err(AppError::BadRequest(format!(
            "change {} has an empty type",
            change.id
        )));
    }
    // Timestamps are stored as signed 64-bit integers
    for (name, value) in [("createdAt", change.created_at), ("updatedAt", change.updated_at)] {
        if i64::try_from(value).is_err() {
            return Err(AppError::BadRequest(format!(
                "change {} has {name} {value} out of range",
                change.id
            )));
        }
    }
    Ok(())
}
