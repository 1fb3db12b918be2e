//! Request extractor enforcing the configured credentials.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::parse_basic_auth_header;
use crate::error::AppError;
use crate::AppState;

/// The authenticated caller of a sync route.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::Unauthorized("missing authorization header".into()))?
            .to_str()
            .map_err(|_| AppError::Unauthorized("authorization header is not ASCII".into()))?;

        let (username, password) = parse_basic_auth_header(header)?;
        if username != state.config.auth_username || password != state.config.auth_password {
            return Err(AppError::Unauthorized(format!(
                "invalid credentials for '{username}'"
            )));
        }

        Ok(AuthUser { username })
    }
}
