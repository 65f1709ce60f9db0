//! Realtime channel.
//!
//! A push channel carrying `{type, data}` envelopes. The
//! [`RealtimeManager`] keeps the connection alive with a PING heartbeat,
//! reconnects with exponential backoff after abnormal closes, queues outbound
//! messages while disconnected and fans inbound envelopes out to subscribers.

mod channel;
mod config;
mod manager;
mod state;

pub use channel::{
    ABNORMAL_CLOSURE, ChannelError, ChannelEvent, DuplexConnection, DuplexConnector,
    NORMAL_CLOSURE, OutboundFrame, WebSocketConnector,
};
pub use config::{RealtimeConfig, defaults};
pub use manager::{RealtimeManager, Subscription};
pub use state::{ConnectionState, LifecycleEvent, RECONNECT_FAILED_MESSAGE};
