/// Unified error types for the Monalias resolver
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum MonaliasError {
    /// Malformed resolve request (missing fields, undecodable body)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Network is not one of the served networks
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Alias absent (or domain mismatch) and no catch-all configured
    #[error("Alias not found")]
    AliasNotFound,

    /// Per-source admission refused
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Duration },

    /// Identity watchdog (or an operator) locked the instance
    #[error("Instance locked")]
    InstanceLocked { reason: Option<String> },

    /// Stored administrative data violates an alias invariant
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Wallet bridge missing, misconfigured or failing
    #[error("Wallet bridge error: {0}")]
    WalletBridge(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or key provisioning errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Admin input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Admin lookups that found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate handle)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or wrong admin credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MonaliasError {
    /// Machine-readable code carried in the `error` field
    pub fn code(&self) -> &'static str {
        match self {
            MonaliasError::BadRequest(_) | MonaliasError::Validation(_) => "bad_request",
            MonaliasError::InvalidNetwork(_) => "invalid_network",
            MonaliasError::AliasNotFound => "alias_not_found",
            MonaliasError::RateLimited { .. } => "rate_limited",
            MonaliasError::InstanceLocked { .. } => "instance_locked",
            MonaliasError::NotFound(_) => "not_found",
            MonaliasError::Conflict(_) => "conflict",
            MonaliasError::Unauthorized => "unauthorized",
            MonaliasError::Integrity(_)
            | MonaliasError::WalletBridge(_)
            | MonaliasError::Database(_)
            | MonaliasError::Io(_)
            | MonaliasError::Config(_)
            | MonaliasError::Internal(_) => "server_error",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            MonaliasError::BadRequest(_)
            | MonaliasError::InvalidNetwork(_)
            | MonaliasError::Validation(_) => StatusCode::BAD_REQUEST,
            MonaliasError::AliasNotFound | MonaliasError::NotFound(_) => StatusCode::NOT_FOUND,
            MonaliasError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            MonaliasError::InstanceLocked { .. } => StatusCode::SERVICE_UNAVAILABLE,
            MonaliasError::Conflict(_) => StatusCode::CONFLICT,
            MonaliasError::Unauthorized => StatusCode::UNAUTHORIZED,
            MonaliasError::Integrity(_)
            | MonaliasError::WalletBridge(_)
            | MonaliasError::Database(_)
            | MonaliasError::Io(_)
            | MonaliasError::Config(_)
            | MonaliasError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error body: `{"error": code, ...}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Convert MonaliasError to HTTP response
impl IntoResponse for MonaliasError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ErrorResponse {
            error: self.code().to_string(),
            reason: None,
            retry_after_seconds: None,
            message: None,
        };

        match &self {
            MonaliasError::InstanceLocked { reason } => {
                body.reason = reason.clone();
            }
            MonaliasError::RateLimited { retry_after } => {
                body.retry_after_seconds = Some(retry_after.as_secs());
            }
            // Admin-facing errors carry a human message; resolve errors stay terse
            MonaliasError::Validation(msg)
            | MonaliasError::NotFound(msg)
            | MonaliasError::Conflict(msg) => {
                body.message = Some(msg.clone());
            }
            MonaliasError::Integrity(_)
            | MonaliasError::WalletBridge(_)
            | MonaliasError::Database(_)
            | MonaliasError::Io(_)
            | MonaliasError::Config(_)
            | MonaliasError::Internal(_) => {
                // Don't leak details to the caller
                tracing::error!(error = %self, code = "server_error", "request_failed");
            }
            MonaliasError::BadRequest(_)
            | MonaliasError::InvalidNetwork(_)
            | MonaliasError::AliasNotFound
            | MonaliasError::Unauthorized => {}
        }

        let mut response = (status, Json(body)).into_response();

        match &self {
            MonaliasError::RateLimited { retry_after } => {
                if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            MonaliasError::Unauthorized => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"Monalias\""),
                );
            }
            _ => {}
        }

        response
    }
}

/// Result type alias for service operations
pub type MonaliasResult<T> = Result<T, MonaliasError>;
