//! Replication configuration loading.
//!
//! Configuration comes from a TOML file or from `TIDELINE_*` environment
//! variables (a `.env` file is honoured through `dotenvy`). Both sources end
//! in [`SyncConfig::new`], which validates the endpoint and credentials.
//!
//! ```toml
//! [endpoint]
//! url = "https://sync.example.com"
//!
//! [auth]
//! username = "alice"
//! password = "secret"
//!
//! [replication]
//! direction = "push_and_pull"
//! continuous = true
//! heartbeat_secs = 60
//! ```

use crate::{Error, Result};
use reqwest::Url;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default interval between heartbeats while idle.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);

/// Default number of consecutive failed attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;

/// Default cap on the wait between attempts.
pub const DEFAULT_MAX_ATTEMPT_WAIT: Duration = Duration::from_secs(180);

/// Default interval between pulls while idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Which way changes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Push,
    Pull,
    #[default]
    PushAndPull,
}

impl SyncDirection {
    pub fn pushes(self) -> bool {
        matches!(self, Self::Push | Self::PushAndPull)
    }

    pub fn pulls(self) -> bool {
        matches!(self, Self::Pull | Self::PushAndPull)
    }
}

/// Tuning of a replication session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationOptions {
    pub direction: SyncDirection,
    /// Keep syncing after the first exchange
    pub continuous: bool,
    pub heartbeat: Duration,
    pub max_attempts: u32,
    pub max_attempt_wait: Duration,
    pub poll_interval: Duration,
    /// Page size for pulls and pushes
    pub batch_size: usize,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::PushAndPull,
            continuous: true,
            heartbeat: DEFAULT_HEARTBEAT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_attempt_wait: DEFAULT_MAX_ATTEMPT_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: tideline_engine::protocol::DEFAULT_PULL_LIMIT,
        }
    }
}

/// Validated endpoint, credentials and tuning.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub endpoint_url: Url,
    pub username: String,
    pub password: String,
    pub options: ReplicationOptions,
}

// The password never reaches logs
impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("endpoint_url", &self.endpoint_url.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl SyncConfig {
    /// Validate raw settings.
    pub fn new(endpoint_url: &str, username: &str, password: &str) -> Result<Self> {
        let url = Url::parse(endpoint_url.trim())
            .map_err(|e| Error::ConfigInvalid(format!("endpoint url {endpoint_url:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::ConfigInvalid(format!(
                "endpoint url must use http or https, got {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::ConfigInvalid("endpoint url has no host".into()));
        }
        if username.is_empty() {
            return Err(Error::ConfigInvalid("username is empty".into()));
        }
        if password.is_empty() {
            return Err(Error::ConfigInvalid("password is empty".into()));
        }

        Ok(Self {
            endpoint_url: url,
            username: username.to_string(),
            password: password.to_string(),
            options: ReplicationOptions::default(),
        })
    }

    /// Replace the tuning.
    pub fn with_options(mut self, options: ReplicationOptions) -> Self {
        self.options = options;
        self
    }

    /// Load from a TOML file. A missing file is `ConfigMissing`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::ConfigMissing),
            Err(e) => {
                return Err(Error::ConfigInvalid(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        Self::from_toml_str(&text)
    }

    /// Parse TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| Error::ConfigInvalid(e.to_string()))?;

        let url = file.endpoint.url.ok_or(Error::ConfigMissing)?;
        let auth = file
            .auth
            .ok_or_else(|| Error::ConfigInvalid("missing [auth] section".into()))?;
        let username = auth.username.unwrap_or_default();
        let password = auth.password.unwrap_or_default();

        Ok(Self::new(&url, &username, &password)?.with_options(file.replication.into()))
    }

    /// Load from `TIDELINE_*` environment variables, reading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// `TIDELINE_ENDPOINT_URL` absent means no configuration at all; any
    /// other missing or malformed variable is invalid configuration.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("TIDELINE_ENDPOINT_URL").ok_or(Error::ConfigMissing)?;
        let username = lookup("TIDELINE_USERNAME").unwrap_or_default();
        let password = lookup("TIDELINE_PASSWORD").unwrap_or_default();

        let mut options = ReplicationOptions::default();
        if let Some(direction) = lookup("TIDELINE_DIRECTION") {
            options.direction = match direction.trim() {
                "push" => SyncDirection::Push,
                "pull" => SyncDirection::Pull,
                "push_and_pull" => SyncDirection::PushAndPull,
                other => {
                    return Err(Error::ConfigInvalid(format!(
                        "TIDELINE_DIRECTION: unknown direction {other:?}"
                    )))
                }
            };
        }
        if let Some(continuous) = lookup("TIDELINE_CONTINUOUS") {
            options.continuous = parse_var("TIDELINE_CONTINUOUS", &continuous)?;
        }
        if let Some(secs) = lookup("TIDELINE_HEARTBEAT_SECS") {
            options.heartbeat = Duration::from_secs(parse_var("TIDELINE_HEARTBEAT_SECS", &secs)?);
        }
        if let Some(attempts) = lookup("TIDELINE_MAX_ATTEMPTS") {
            options.max_attempts = parse_var("TIDELINE_MAX_ATTEMPTS", &attempts)?;
        }

        Ok(Self::new(&url, &username, &password)?.with_options(options))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::ConfigInvalid(format!("{name}: cannot parse {value:?}")))
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    endpoint: EndpointSection,
    auth: Option<AuthSection>,
    #[serde(default)]
    replication: ReplicationSection,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointSection {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthSection {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ReplicationSection {
    direction: SyncDirection,
    continuous: bool,
    heartbeat_secs: u64,
    max_attempts: u32,
    max_attempt_wait_secs: u64,
    poll_interval_secs: u64,
    batch_size: usize,
}

impl Default for ReplicationSection {
    fn default() -> Self {
        let defaults = ReplicationOptions::default();
        Self {
            direction: defaults.direction,
            continuous: defaults.continuous,
            heartbeat_secs: defaults.heartbeat.as_secs(),
            max_attempts: defaults.max_attempts,
            max_attempt_wait_secs: defaults.max_attempt_wait.as_secs(),
            poll_interval_secs: defaults.poll_interval.as_secs(),
            batch_size: defaults.batch_size,
        }
    }
}

impl From<ReplicationSection> for ReplicationOptions {
    fn from(section: ReplicationSection) -> Self {
        Self {
            direction: section.direction,
            continuous: section.continuous,
            heartbeat: Duration::from_secs(section.heartbeat_secs),
            max_attempts: section.max_attempts.max(1),
            max_attempt_wait: Duration::from_secs(section.max_attempt_wait_secs),
            poll_interval: Duration::from_secs(section.poll_interval_secs.max(1)),
            batch_size: section.batch_size.max(1),
        }
    }
}
