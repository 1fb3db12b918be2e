//! Pull handler - serves changed documents to clients.

use crate::error::Result;
use crate::repository::Repository;
use tideline_engine::{PullRequest, PullResponse};

/// Process a pull request from a client.
pub async fn handle_pull(repo: &dyn Repository, request: PullRequest) -> Result<PullResponse> {
    let limit = request.effective_limit();

    // Fetch one more than requested to check if there are more
    let mut page = repo.changes_since(request.since, limit + 1).await?;
    let has_more = page.len() > limit;
    page.truncate(limit);

    let checkpoint = page.last().map_or(request.since, |(seq, _)| *seq);
    let changes = page.into_iter().map(|(_, change)| change).collect();

    Ok(PullResponse {
        changes,
        checkpoint,
        has_more,
    })
}
