//! Realtime wire envelope.
//!
//! Every realtime message is a JSON text frame of the form:
//!
//! ```text
//! {"type": "<event type>", "data": <any JSON value>}
//! ```
//!
//! The `PING` and `PONG` types are reserved for the heartbeat and are never
//! delivered to subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved envelope types.
pub mod envelope_types {
    /// Heartbeat sent by the client.
    pub const PING: &str = "PING";
    /// Heartbeat reply sent by the server.
    pub const PONG: &str = "PONG";
}

/// Errors raised while encoding or decoding an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame was not valid JSON or lacked a `type` field.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

/// A typed realtime message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type used to route the message to subscribers.
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary payload. Missing `data` decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new<S: Into<String>>(kind: S, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// The heartbeat envelope sent by the client.
    pub fn ping() -> Self {
        Self::new(envelope_types::PING, Value::Null)
    }

    /// Returns true for the reserved `PING`/`PONG` types.
    pub fn is_heartbeat(&self) -> bool {
        self.kind == envelope_types::PING || self.kind == envelope_types::PONG
    }

    /// Returns true if this is the server's heartbeat reply.
    pub fn is_pong(&self) -> bool {
        self.kind == envelope_types::PONG
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}
