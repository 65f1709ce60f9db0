use std::fmt;
use std::time::Duration;

/// Connection state of a realtime channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }

    /// Returns true if `connect` may start a new connection cycle.
    pub fn accepts_connect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message of the terminal failure event.
pub const RECONNECT_FAILED_MESSAGE: &str = "Unable to reconnect to server";

/// Lifecycle notifications published by the channel manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// Reconnect attempt `attempt` (1-based) will start after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Reconnect attempts are exhausted; nothing further is scheduled.
    Failed { message: String },
}
