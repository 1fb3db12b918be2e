//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; without one the server keeps documents in memory
    pub database_url: Option<String>,
    /// Basic auth username every client must present
    pub auth_username: String,
    /// Basic auth password every client must present
    pub auth_password: String,
    /// Node id reported by the handshake
    pub node_id: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let auth_username = required("AUTH_USERNAME")?;
        let auth_password = required("AUTH_PASSWORD")?;

        let node_id = env::var("NODE_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generated_node_id);

        Ok(Self {
            host,
            port,
            database_url,
            auth_username,
            auth_password,
            node_id,
        })
    }

    /// Configuration with the given credentials and defaults for the rest.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: None,
            auth_username: username.into(),
            auth_password: password.into(),
            node_id: generated_node_id(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn generated_node_id() -> String {
    format!("server-{}", uuid::Uuid::new_v4())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid PORT value")]
    InvalidPort,
}
