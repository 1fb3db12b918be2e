//! JSON over HTTP(S) transport.

use super::{Transport, TransportError};
use crate::config::SyncConfig;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tideline_engine::{
    HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport talking to a sync endpoint over HTTP with basic auth.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    username: String,
    password: String,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Protocol(format!("cannot build http client: {e}")))?;

        // Url::join drops the last path segment unless it ends in '/'
        let mut base = config.endpoint_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            base,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, route: &str) -> Result<Url, TransportError> {
        self.base
            .join(route)
            .map_err(|e| TransportError::Protocol(format!("bad route {route}: {e}")))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, TransportError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                TransportError::Auth(format!("{status}"))
            }
            _ => TransportError::Status {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn handshake(&self) -> Result<HandshakeResponse, TransportError> {
        let url = self.url("sync/handshake")?;
        tracing::debug!(%url, "handshake");
        self.json(self.client.get(url)).await
    }

    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        let url = self.url("sync/push")?;
        self.json(self.client.post(url).json(request)).await
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, TransportError> {
        let url = self.url("sync/pull")?;
        self.json(
            self.client
                .get(url)
                .query(&[("since", request.since), ("limit", request.limit as u64)]),
        )
        .await
    }

    async fn heartbeat(&self) -> Result<(), TransportError> {
        let url = self.url("health")?;
        self.send(self.client.get(url)).await.map(|_| ())
    }
}
