//! Error types for machi-report
//!
//! Only configuration and validation errors abort a run. Upstream-facing
//! errors (`FetchError`) are absorbed into per-category data gaps unless no
//! indicator resolved at all.

use crate::models::Category;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Bad static configuration; fatal at startup
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Configuration error: {0}")]
pub struct ConfigurationError(pub String);

/// Caller supplied out-of-range input; rejected before any fetch
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid municipality code: {0:?} (expected 5 digits)")]
    InvalidCode(String),

    #[error("Unknown municipality: {0}")]
    UnknownMunicipality(String),

    #[error("Municipality requested more than once: {0}")]
    DuplicateMunicipality(String),

    #[error("Expected {min}-{max} municipalities, got {got}")]
    MunicipalityCount { got: usize, min: usize, max: usize },

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("No weighted category left after applying include flags")]
    NoCategories,
}

/// Network or upstream service failure
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("Upstream error{}: {message}", format_status(.status))]
pub struct UpstreamError {
    /// Timeouts, connection failures, 429 and 5xx are retryable
    pub retryable: bool,
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            retryable: status == 429 || (500..600).contains(&status),
            status: Some(status),
            message: body.into(),
        }
    }
}

fn format_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" {}", s)).unwrap_or_default()
}

fn join_categories(categories: &[Category]) -> String {
    categories
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Configured selector matched nothing in the upstream payload
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Selector {selector} ({code}) matched no record in {dataset} for {geography}")]
pub struct SelectorError {
    pub dataset: String,
    pub selector: String,
    pub code: String,
    pub geography: String,
}

/// Error from one upstream fetch
///
/// `Clone` because a single in-flight fetch result is shared by every waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Upstream(e) if e.retryable)
    }
}

/// Result annotation: categories with no data for any municipality in the run
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("No data available for categories: {}", join_categories(.unavailable_categories))]
pub struct PartialDataError {
    pub unavailable_categories: Vec<Category>,
}

/// Failure of a whole pipeline run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Nothing resolved for any municipality
    #[error(transparent)]
    Upstream(UpstreamError),

    #[error("Pipeline run cancelled")]
    Cancelled,
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upstream statistics services unusable (502)
    #[error("Upstream failure: {0}")]
    BadGateway(String),

    /// Run cancelled, e.g. during shutdown (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// machi-common error
    #[error("Common error: {0}")]
    Common(#[from] machi_common::Error),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(e) => ApiError::BadRequest(e.to_string()),
            PipelineError::Upstream(e) => ApiError::BadGateway(e.to_string()),
            PipelineError::Cancelled => ApiError::Unavailable("pipeline run cancelled".to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
