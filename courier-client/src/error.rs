//! Client-side error types.
//!
//! This module provides [`ClientError`], the error type for every request,
//! refresh and interceptor operation of the client.

use std::time::Duration;

use courier_core::ErrorKind;
use http::StatusCode;
use serde_json::Value;

/// Client error variants.
///
/// `ClientError` is `Clone` so a single refresh outcome can be handed to every
/// caller awaiting it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// No response reached the client (connection refused, reset, DNS...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("{message}")]
    Status {
        status: StatusCode,
        /// Best-effort parsed response body.
        data: Option<Value>,
        message: String,
    },

    /// The per-attempt deadline elapsed before a response arrived.
    #[error("request {request_id} timed out after {}ms", timeout.as_millis())]
    Timeout {
        request_id: String,
        timeout: Duration,
    },

    /// The request was cancelled by the caller.
    #[error("request {request_id} was cancelled")]
    Canceled { request_id: String },

    /// A refresh was requested but no refresh token is stored.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The refresh operation itself failed.
    #[error("token refresh failed: {0}")]
    Refresh(String),

    /// Request body encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Response body decoding error.
    #[error("decode error: {0}")]
    Decode(String),

    /// The request could not be assembled (invalid URL, header, ...).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An interceptor failed or panicked.
    #[error("interceptor error: {0}")]
    Interceptor(String),
}

impl ClientError {
    /// Build an HTTP status failure, deriving the message from the body.
    ///
    /// A JSON body with a string `message` (or `error`) field supplies the
    /// message; otherwise the canonical reason phrase is used.
    pub fn http_status(status: StatusCode, data: Option<Value>) -> Self {
        let from_body = data.as_ref().and_then(|d| {
            d.get("message")
                .or_else(|| d.get("error"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        });
        let message = from_body.unwrap_or_else(|| {
            format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            )
        });
        ClientError::Status {
            status,
            data,
            message,
        }
    }

    /// Get the failure kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::Status { .. } => ErrorKind::HttpStatus,
            ClientError::Timeout { .. } => ErrorKind::Timeout,
            ClientError::Canceled { .. } => ErrorKind::Canceled,
            ClientError::NoRefreshToken | ClientError::Refresh(_) => ErrorKind::Refresh,
            ClientError::Encode(_) => ErrorKind::Encode,
            ClientError::Decode(_) => ErrorKind::Decode,
            ClientError::Protocol(_) => ErrorKind::Protocol,
            ClientError::Interceptor(_) => ErrorKind::Interceptor,
        }
    }

    /// The failure name (e.g. `"HttpStatusFailure"`).
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        match self {
            ClientError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// The response status, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The parsed response body, if a response was received.
    pub fn data(&self) -> Option<&Value> {
        match self {
            ClientError::Status { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// Returns true for explicit cancellations and timeouts.
    pub fn is_cancellation(&self) -> bool {
        self.kind().is_cancellation()
    }
}
