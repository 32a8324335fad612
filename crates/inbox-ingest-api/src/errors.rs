//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inbox_ingest_core::store::StoreError;
use queue_runtime::QueueError;
use tracing::{error, warn};

/// Webhook handler errors with HTTP status code mapping
///
/// Providers only ever see the status code and a short fixed body:
///
/// - `400 Bad Request`: verified body is not UTF-8 and cannot be kept as is
/// - `401 Unauthorized`: body signature did not verify
/// - `403 Forbidden`: path secret did not match
/// - `404 Not Found`: unknown raw event, or replay disabled
/// - `500 Internal Server Error`: the delivery could not be recorded or
///   queued; providers redeliver on 5xx
/// - `413 Payload Too Large`: body exceeds `server.max_body_size`
/// - `503 Service Unavailable`: the body could not be read in time
///
/// Error details are logged server-side and never returned.
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    /// Maps to: `401 Unauthorized`
    #[error("Invalid webhook signature for provider '{provider}'")]
    InvalidSignature { provider: String },

    /// Maps to: `403 Forbidden`
    #[error("Webhook path secret mismatch for provider '{provider}'")]
    SecretMismatch { provider: String },

    /// Maps to: `400 Bad Request`
    #[error("Webhook body for provider '{provider}' is not valid UTF-8")]
    InvalidBody { provider: String },

    /// Maps to: `413 Payload Too Large`
    #[error("Webhook body for provider '{provider}' exceeds the size limit")]
    BodyTooLarge { provider: String },

    /// Maps to: `503 Service Unavailable` (transient, provider redelivers)
    #[error("Failed to read webhook body: {message}")]
    BodyUnreadable { message: String },

    /// Maps to: `500 Internal Server Error` (transient, provider redelivers)
    #[error("Failed to enqueue webhook: {0}")]
    EnqueueFailed(#[from] QueueError),

    /// Maps to: `500 Internal Server Error` (transient, provider redelivers)
    #[error("Failed to store raw event: {0}")]
    RawEventStoreFailed(#[from] StoreError),

    /// Maps to: `404 Not Found`
    #[error("Raw event '{event_id}' not found")]
    ReplayNotFound { event_id: String },

    /// Maps to: `404 Not Found`
    #[error("Raw event replay is disabled")]
    ReplayDisabled,
}

impl WebhookHandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSignature { .. } => StatusCode::UNAUTHORIZED,
            Self::SecretMismatch { .. } => StatusCode::FORBIDDEN,
            Self::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BodyUnreadable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::EnqueueFailed(_) | Self::RawEventStoreFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ReplayNotFound { .. } | Self::ReplayDisabled => StatusCode::NOT_FOUND,
        }
    }

    /// Fixed response body
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidSignature { .. } => "unauthorized",
            Self::SecretMismatch { .. } => "forbidden",
            Self::InvalidBody { .. } => "bad request",
            Self::BodyTooLarge { .. } => "payload too large",
            Self::BodyUnreadable { .. } => "unavailable",
            Self::EnqueueFailed(_) => "queue error",
            Self::RawEventStoreFailed(_) => "internal error",
            Self::ReplayNotFound { .. } | Self::ReplayDisabled => "not found",
        }
    }

    /// Label used for the `outcome` metric dimension
    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::InvalidSignature { .. } => "unauthorized",
            Self::SecretMismatch { .. } => "forbidden",
            Self::InvalidBody { .. } => "invalid_body",
            Self::BodyTooLarge { .. } => "too_large",
            Self::BodyUnreadable { .. } => "body_unreadable",
            Self::EnqueueFailed(_) => "enqueue_failed",
            Self::RawEventStoreFailed(_) => "store_failed",
            Self::ReplayNotFound { .. } | Self::ReplayDisabled => "not_found",
        }
    }
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::InvalidSignature { .. }
            | Self::SecretMismatch { .. }
            | Self::InvalidBody { .. }
            | Self::BodyTooLarge { .. }
            | Self::BodyUnreadable { .. } => {
                warn!(error = %self, "Rejected webhook");
            }
            Self::EnqueueFailed(e) => {
                error!(error = %e, transient = e.is_transient(), "Webhook enqueue failed");
            }
            Self::RawEventStoreFailed(e) => {
                error!(error = %e, transient = e.is_transient(), "Raw event write failed");
            }
            Self::ReplayNotFound { .. } | Self::ReplayDisabled => {}
        }

        (status, self.public_message()).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}
