//! HTTP transport seam for upstream statistics services
//!
//! Clients build an [`UpstreamRequest`] and hand it to an [`HttpTransport`].
//! Production uses [`ReqwestTransport`]; tests inject fakes that count calls
//! and return canned JSON.

use crate::error::UpstreamError;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("machi-report/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// One GET request against an upstream JSON API
#[derive(Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

// Credentials travel in query/header values; keep them out of logs
impl std::fmt::Debug for UpstreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.query.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("UpstreamRequest")
            .field("url", &self.url)
            .field("query_keys", &keys)
            .finish()
    }
}

/// Transport-level failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid JSON body: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<TransportError> for UpstreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => UpstreamError::retryable("request timed out"),
            TransportError::Connection(msg) => UpstreamError::retryable(msg),
            TransportError::Status { status, body } => UpstreamError::from_status(status, body),
            TransportError::Decode(msg) => {
                UpstreamError::permanent(format!("invalid JSON body: {}", msg))
            }
        }
    }
}

/// Performs upstream GET requests returning JSON
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get_json(&self, request: &UpstreamRequest) -> Result<serde_json::Value, TransportError>;
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport whose per-request timeout matches the upstream deadline
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self { client })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Connection(err.without_url().to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_json(&self, request: &UpstreamRequest) -> Result<serde_json::Value, TransportError> {
        tracing::debug!(url = %request.url, "Sending upstream request");

        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_credentials() {
        let request = UpstreamRequest::get("https://example.invalid/getStatsData")
            .query("appId", "secret-app-id")
            .header("Ocp-Apim-Subscription-Key", "secret-key");
        let rendered = format!("{:?}", request);
        assert!(rendered.contains("appId"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_transport_error_classification() {
        assert!(UpstreamError::from(TransportError::Timeout).retryable);
        assert!(UpstreamError::from(TransportError::Connection("reset".into())).retryable);
        assert!(!UpstreamError::from(TransportError::Decode("eof".into())).retryable);

        let err = UpstreamError::from(TransportError::Status {
            status: 404,
            body: String::new(),
        });
        assert!(!err.retryable);
        assert_eq!(err.status, Some(404));
    }
}
