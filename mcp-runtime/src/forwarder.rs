//! Byte-transparent relay of JSON-RPC frames to the backend MCP endpoint.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use requirements_mcp_core::config::ValidatedConfig;
use requirements_mcp_core::redact::mask_sensitive;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const MCP_ENDPOINT_PATH: &str = "api/v1/mcp";

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("authentication failed: invalid PAT token")]
    AuthenticationFailed,

    #[error("backend API error: {status}")]
    Backend { status: u16 },

    #[error("failed to reach backend: {}", mask_sensitive(&.0.to_string()))]
    Transport(#[source] reqwest::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid backend endpoint: {}", mask_sensitive(.0))]
    InvalidEndpoint(String),
}

pub struct HttpForwarder {
    http: reqwest::Client,
    endpoint: Url,
    token: String,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(config: &ValidatedConfig) -> Result<Self, ForwardError> {
        let endpoint = mcp_endpoint(&config.backend_api_url)?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ForwardError::Transport)?;
        Ok(Self {
            http,
            endpoint,
            token: config.pat_token.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST the frame as-is and hand back the raw reply body. Aborts as soon
    /// as `cancel` fires.
    pub async fn forward(
        &self,
        frame: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ForwardError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ForwardError::Cancelled),
            result = self.send(frame) => result,
        }
    }

    async fn send(&self, frame: Vec<u8>) -> Result<Vec<u8>, ForwardError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .body(frame)
            .send()
            .await
            .map_err(ForwardError::Transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ForwardError::AuthenticationFailed);
        }
        if !status.is_success() {
            return Err(ForwardError::Backend {
                status: status.as_u16(),
            });
        }
        if status != StatusCode::OK {
            tracing::debug!(status = status.as_u16(), "backend replied with non-200 success");
        }

        let body = response.bytes().await.map_err(ForwardError::Transport)?;
        Ok(body.to_vec())
    }
}

/// `{base}/api/v1/mcp`, tolerant of a trailing slash on the base.
pub fn mcp_endpoint(base: &Url) -> Result<Url, ForwardError> {
    let joined = format!(
        "{}/{MCP_ENDPOINT_PATH}",
        base.as_str().trim_end_matches('/')
    );
    Url::parse(&joined).map_err(|e| ForwardError::InvalidEndpoint(format!("{joined}: {e}")))
}
