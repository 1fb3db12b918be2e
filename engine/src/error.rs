//! Error types for the Tideline engine.

use crate::{RecordId, Revision};
use thiserror::Error;

/// All possible errors from the Tideline engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("sync configuration is missing")]
    ConfigMissing,

    #[error("sync configuration is invalid: {0}")]
    ConfigInvalid(String),

    // Store errors
    #[error("document not found: {0}")]
    NotFound(RecordId),

    #[error("revision conflict: expected {expected}, stored {actual}")]
    Conflict { expected: Revision, actual: Revision },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage fault: {0}")]
    StorageFault(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    // Replication errors
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("channel closed")]
    Closed,
}

impl Error {
    /// Whether the replication state machine should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Auth(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
