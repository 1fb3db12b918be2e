//! Request handlers for sync operations.

mod pull;
mod push;

pub use pull::handle_pull;
pub use push::handle_push;
