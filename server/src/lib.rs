//! Tideline Server - reference sync endpoint for Tideline clients.
//!
//! Serves the replication wire protocol over HTTP:
//!
//! - `GET /sync/handshake`: check Basic credentials, report node id and
//!   protocol version
//! - `POST /sync/push`: apply a batch of changes under last-writer-wins
//! - `GET /sync/pull?since&limit`: page through documents written after a
//!   checkpoint
//! - `GET /health`: liveness, used as the client heartbeat
//!
//! Documents live in PostgreSQL ([`PgRepository`]) or, for tests and quick
//! local runs, in memory ([`MemoryRepository`]).

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod repository;
pub mod routes;

pub use config::{Config, ConfigError};
pub use error::AppError;
pub use repository::{MemoryRepository, PgRepository, PushOutcome, Repository};

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn Repository>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(repository: Arc<dyn Repository>, config: Config) -> Self {
        Self {
            repository,
            config: Arc::new(config),
        }
    }

    /// State backed by a fresh [`MemoryRepository`].
    pub fn in_memory(config: Config) -> Self {
        Self::new(Arc::new(MemoryRepository::new()), config)
    }
}

/// Build the router with tracing and CORS layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

/// Serve `state` on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, app(state)).await
}
