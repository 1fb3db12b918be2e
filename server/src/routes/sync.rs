//! Sync endpoint routes.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use tideline_engine::protocol::PROTOCOL_VERSION;
use tideline_engine::{HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_pull, handle_push};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/handshake", get(handshake_handler))
        .route("/sync/push", post(push_handler))
        .route("/sync/pull", get(pull_handler))
}

/// GET /sync/handshake - Check credentials and identify the endpoint.
async fn handshake_handler(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Json<HandshakeResponse> {
    tracing::info!(user = %auth.username, "client handshake");
    Json(HandshakeResponse {
        node_id: state.config.node_id.clone(),
        protocol_version: PROTOCOL_VERSION,
    })
}

/// POST /sync/push - Push changes to the server.
async fn push_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let response = handle_push(state.repository.as_ref(), request).await?;
    Ok(Json(response))
}

/// GET /sync/pull - Pull changes from the server.
async fn pull_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(request): Query<PullRequest>,
) -> Result<Json<PullResponse>> {
    let response = handle_pull(state.repository.as_ref(), request).await?;
    Ok(Json(response))
}
