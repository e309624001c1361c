use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::RemoteRequest;
use crate::error::{Result, WikinetError};

/// Failure of a single network attempt
#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    /// HTTP status, or None for connect/timeout/decode failures
    pub status: Option<u16>,
    pub detail: String,
    pub retryable: bool,
}

impl TransportError {
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            detail: detail.into(),
            retryable: is_retryable_status(status),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self {
            status: None,
            detail: detail.into(),
            retryable: true,
        }
    }
}

/// Rate-limit and server-fault classes are worth another attempt
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// The single seam between the crawl engine and the network.
///
/// Returns the raw response body on success.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &RemoteRequest) -> std::result::Result<String, TransportError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WikinetError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &RemoteRequest) -> std::result::Result<String, TransportError> {
        let mut builder = self
            .client
            .get(&request.endpoint)
            .query(&request.params)
            .header("User-Agent", &self.user_agent);

        if let Some(accept) = &request.accept {
            builder = builder.header("Accept", accept);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                TransportError {
                    status: None,
                    detail: format!("Invalid request: {}", e),
                    retryable: false,
                }
            } else {
                TransportError::network(format!("Network error: {}", e))
            }
        })?;

        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            let snippet: String = body.chars().take(200).collect();
            return Err(TransportError::from_status(status.as_u16(), snippet));
        }

        response
            .text()
            .await
            .map_err(|e| TransportError::network(format!("Failed to read response body: {}", e)))
    }
}
