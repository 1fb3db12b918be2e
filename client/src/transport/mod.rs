//! Transport abstraction for replication.
//!
//! The replicator speaks the request/response protocol of
//! [`tideline_engine::protocol`] through a [`Transport`]; how the messages
//! travel is up to the implementation:
//!
//! - [`HttpTransport`] talks JSON over HTTP(S) with basic auth
//! - [`MockTransport`] keeps an in-process endpoint for tests, with failure
//!   injection
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.fail_next(TransportError::Unreachable("offline".into()));
//! assert!(transport.handshake().await.is_err());
//! assert!(transport.handshake().await.is_ok());
//! ```

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::{CallCounts, MockTransport};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tideline_engine::{
    Error, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
};

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// Credentials were refused.
    #[error("credentials rejected: {0}")]
    Auth(String),

    /// The endpoint answered with an error status.
    #[error("endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The reply could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No reply in time.
    #[error("request timed out")]
    Timeout,
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Auth(message) => Error::Auth(message),
            other => Error::Transport(other.to_string()),
        }
    }
}

/// Request/response channel to a sync endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Verify reachability and credentials.
    async fn handshake(&self) -> Result<HandshakeResponse, TransportError>;

    /// Offer a batch of local changes.
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError>;

    /// Fetch one page of changes after a checkpoint.
    async fn pull(&self, request: PullRequest) -> Result<PullResponse, TransportError>;

    /// Keep the session alive while idle.
    async fn heartbeat(&self) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn handshake(&self) -> Result<HandshakeResponse, TransportError> {
        (**self).handshake().await
    }

    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        (**self).push(request).await
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, TransportError> {
        (**self).pull(request).await
    }

    async fn heartbeat(&self) -> Result<(), TransportError> {
        (**self).heartbeat().await
    }
}
