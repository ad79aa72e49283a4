//! Centralized error type for the homed bridge.
//!
//! Uses `thiserror` for ergonomic error definitions and provides an
//! `IntoResponse` impl so the fulfillment HTTP layer can return errors
//! directly. The gateway layer never serializes these to a client — it
//! only logs them and tears the connection down.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Core application error type used across the homed bridge.
#[derive(Debug, thiserror::Error)]
pub enum HomedError {
    // === Gateway wire protocol errors (fatal to the connection) ===
    #[error("framing error: {0}")]
    Framing(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("handshake/authorization timed out: {0}")]
    Timeout(String),

    #[error("receive buffer overflow (limit {limit} bytes)")]
    BufferOverflow { limit: usize },

    // === Gateway message errors (recoverable — message dropped, connection kept) ===
    #[error("schema validation failed: {0}")]
    Schema(String),

    #[error("unknown topic prefix: {0}")]
    UnknownTopic(String),

    // === Fulfillment errors ===
    #[error("invalid fulfillment request: {0}")]
    InvalidFulfillmentRequest(String),

    #[error("device offline")]
    DeviceOffline,

    // === Outbound Home Graph errors (logged, never surfaced to the caller) ===
    #[error("home graph error: {0}")]
    HomeGraph(String),

    // === Infrastructure ===
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body sent to fulfillment HTTP clients.
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
}

impl HomedError {
    /// Map error to HTTP status code for the fulfillment edge.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidFulfillmentRequest(_) => StatusCode::BAD_REQUEST,
            Self::DeviceOffline => StatusCode::OK, // reported per-command, never a request failure
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code string for programmatic handling.
    pub fn error_code(&self) -> &str {
        match self {
            Self::Framing(_) => "FRAMING_ERROR",
            Self::Crypto(_) => "CRYPTO_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Schema(_) => "SCHEMA_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::BufferOverflow { .. } => "BUFFER_OVERFLOW",
            Self::UnknownTopic(_) => "UNKNOWN_TOPIC",
            Self::InvalidFulfillmentRequest(_) => "INVALID_FULFILLMENT_REQUEST",
            Self::DeviceOffline => "DEVICE_OFFLINE",
            Self::HomeGraph(_) => "HOMEGRAPH_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True if this error kind is fatal to a gateway connection: framing,
    /// crypto, protocol, timeout and buffer overflow terminate the
    /// connection; schema and unknown-topic errors are recoverable and only
    /// drop the one message.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::Framing(_)
                | Self::Crypto(_)
                | Self::Protocol(_)
                | Self::Timeout(_)
                | Self::BufferOverflow { .. }
        )
    }
}

impl IntoResponse for HomedError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            HomedError::Config(e) => {
                tracing::error!("config error: {e}");
                "An internal error occurred".to_string()
            }
            HomedError::Io(e) => {
                tracing::error!("I/O error: {e}");
                "An internal error occurred".to_string()
            }
            HomedError::Internal(e) => {
                tracing::error!("internal error: {e}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.error_code().to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results using HomedError.
pub type HomedResult<T> = Result<T, HomedError>;
