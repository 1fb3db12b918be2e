//! HTTP Basic authentication.

mod basic;
mod middleware;

pub use basic::parse_basic_auth_header;
pub use middleware::AuthUser;
