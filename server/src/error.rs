//! Unified error handling for the server.

use axum::{
    http::{header::WWW_AUTHENTICATE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] tideline_engine::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Engine(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Engine(tideline_engine::Error::StorageFault(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Engine(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, details) = match &self {
            AppError::Database(e) => {
                tracing::error!(error = ?e, "database error");
                ("Database error".to_string(), None)
            }
            AppError::Engine(e) => {
                tracing::warn!(error = %e, "engine error");
                (e.to_string(), None)
            }
            AppError::BadRequest(msg) => (msg.clone(), None),
            AppError::Unauthorized(reason) => {
                tracing::debug!(%reason, "rejected credentials");
                ("Unauthorized".to_string(), Some(reason.clone()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("Internal server error".to_string(), Some(msg.clone()))
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        if status == StatusCode::UNAUTHORIZED {
            return (
                status,
                [(WWW_AUTHENTICATE, r#"Basic realm="tideline""#)],
                body,
            )
                .into_response();
        }
        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(
            AppError::BadRequest("empty id".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("bad password".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Engine(tideline_engine::Error::StorageFault("disk".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Engine(tideline_engine::Error::InvalidDocument("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn unauthorized_challenges_for_basic() {
        let response = AppError::Unauthorized("missing header".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[WWW_AUTHENTICATE],
            r#"Basic realm="tideline""#
        );
    }
}
