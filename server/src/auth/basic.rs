//! `Authorization: Basic` header parsing.

use crate::error::{AppError, Result};
use base64::prelude::*;

/// Parse an HTTP Basic header value into `(username, password)`.
///
/// The password may itself contain `:`; only the first colon separates.
pub fn parse_basic_auth_header(header: &str) -> Result<(String, String)> {
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| malformed("authorization header must start with 'Basic '"))?;

    let decoded = BASE64_STANDARD
        .decode(encoded.trim().as_bytes())
        .map_err(|e| malformed(format!("invalid base64 encoding: {e}")))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| malformed("credentials are not UTF-8"))?;

    let mut parts = decoded.splitn(2, ':');
    let username = parts.next().unwrap_or_default();
    let password = parts
        .next()
        .ok_or_else(|| malformed("credentials must be 'username:password'"))?;

    Ok((username.to_string(), password.to_string()))
}

fn malformed(reason: impl Into<String>) -> AppError {
    AppError::Unauthorized(reason.into())
}
