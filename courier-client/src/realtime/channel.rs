//! Duplex channel boundary.
//!
//! The manager never touches a socket directly. A [`DuplexConnector`] opens a
//! connection and hands back a pair of queues: frames to send and events
//! received. [`WebSocketConnector`] backs the pair with tokio-tungstenite.

use courier_core::EnvelopeError;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::config::BoxFuture;

/// Normal closure close code.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Realtime channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("invalid realtime configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("realtime manager requires a Tokio runtime")]
    NoRuntime,

    #[error("realtime manager stopped")]
    Stopped,
}

/// A frame handed to the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// An event produced by the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text frame.
    Message(String),
    /// A transport error. A `Closed` event follows.
    Error(String),
    /// The connection closed. Always the last event.
    Closed { code: u16, reason: String },
}

/// An open duplex connection.
///
/// Dropping `outbound` closes the connection.
#[derive(Debug)]
pub struct DuplexConnection {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens duplex connections.
pub trait DuplexConnector: Send + Sync + 'static {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<DuplexConnection, ChannelError>>;
}

/// [`DuplexConnector`] over WebSocket text frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

impl DuplexConnector for WebSocketConnector {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<DuplexConnection, ChannelError>> {
        Box::pin(async move {
            let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| ChannelError::Connect(e.to_string()))?;
            let (mut sink, mut source) = stream.split();

            let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
            let (inbound_tx, inbound) = mpsc::unbounded_channel::<ChannelEvent>();

            tokio::spawn(async move {
                while let Some(frame) = outbound_rx.recv().await {
                    let (message, closing) = match frame {
                        OutboundFrame::Text(text) => (Message::Text(text.into()), false),
                        OutboundFrame::Close { code, reason } => (
                            Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            })),
                            true,
                        ),
                    };
                    if let Err(_e) = sink.send(message).await {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(error = %_e, "websocket write failed");
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                let mut close = None;
                while let Some(message) = source.next().await {
                    let event = match message {
                        Ok(Message::Text(text)) => ChannelEvent::Message(text.as_str().to_owned()),
                        Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                            Ok(text) => ChannelEvent::Message(text.to_owned()),
                            Err(_) => continue,
                        },
                        Ok(Message::Close(frame)) => {
                            close = Some(frame.map_or((1005, String::new()), |f| {
                                (u16::from(f.code), f.reason.as_str().to_owned())
                            }));
                            break;
                        }
                        // Protocol-level ping/pong is answered by tungstenite.
                        Ok(_) => continue,
                        Err(e) => {
                            let _ = inbound_tx.send(ChannelEvent::Error(e.to_string()));
                            break;
                        }
                    };
                    if inbound_tx.send(event).is_err() {
                        return;
                    }
                }
                let (code, reason) =
                    close.unwrap_or_else(|| (ABNORMAL_CLOSURE, "connection lost".to_owned()));
                let _ = inbound_tx.send(ChannelEvent::Closed { code, reason });
            });

            Ok(DuplexConnection { outbound, inbound })
        })
    }
}
