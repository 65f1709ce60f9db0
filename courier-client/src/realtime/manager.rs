//! Realtime channel manager.
//!
//! [`RealtimeManager`] is a handle to a background worker task that owns the
//! connection. The worker runs the state machine:
//!
//! ```text
//! Disconnected/Error --connect--> Connecting --open--> Connected
//!                                 Connecting --fail--> Error --> Reconnecting | failed
//! Connected --close 1000--> Disconnected
//! Connected --close other--> Reconnecting | failed
//! Reconnecting --base * 2^(n-1)--> Connecting
//! ```
//!
//! Outbound messages sent while not connected are queued and flushed in
//! order the moment the channel reaches `Connected`.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use courier_core::Envelope;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};

use super::channel::{
    ChannelError, ChannelEvent, DuplexConnection, DuplexConnector, NORMAL_CLOSURE, OutboundFrame,
    WebSocketConnector,
};
use super::config::RealtimeConfig;
use super::state::{ConnectionState, LifecycleEvent, RECONNECT_FAILED_MESSAGE};
use crate::config::BoxFuture;

const EVENT_CAPACITY: usize = 64;

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// State shared between the handle and the worker.
#[derive(Default)]
struct Shared {
    outbox: Mutex<Outbox>,
    subscribers: Mutex<HashMap<String, Vec<(u64, Handler)>>>,
    next_subscriber: AtomicU64,
}

/// Outbound path. `sender` is set exactly while the channel is connected.
#[derive(Default)]
struct Outbox {
    sender: Option<mpsc::UnboundedSender<OutboundFrame>>,
    queue: VecDeque<String>,
}

impl Shared {
    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<String, Vec<(u64, Handler)>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Command {
    Connect {
        site_id: String,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a realtime channel.
///
/// Clones control the same channel. The worker stops, closing any open
/// connection, once every handle is dropped.
///
/// # Example
///
/// ```ignore
/// use courier_client::realtime::{RealtimeConfig, RealtimeManager};
///
/// let channel = RealtimeManager::new(RealtimeConfig::new("wss://api.example.com/ws"))?;
///
/// let _orders = channel.on("order.created", |data| println!("new order: {data}"));
/// channel.send("subscribe", serde_json::json!({"topic": "orders"}))?;
/// channel.connect("site-42").await?;
/// ```
#[derive(Clone)]
pub struct RealtimeManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<LifecycleEvent>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RealtimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl RealtimeManager {
    /// Start a manager connecting over WebSocket.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: RealtimeConfig) -> Result<Self, ChannelError> {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Start a manager using `connector` to open connections.
    pub fn with_connector(
        config: RealtimeConfig,
        connector: Arc<dyn DuplexConnector>,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared::default());

        let worker = Worker {
            config,
            connector,
            commands: commands_rx,
            state: state_tx,
            events: events.clone(),
            shared: shared.clone(),
            url: None,
            attempts: 0,
            failed: false,
            connecting: None,
            link: None,
            heartbeat: None,
            reconnect: None,
        };
        runtime.spawn(worker.run());

        Ok(Self {
            commands,
            state,
            events,
            shared,
        })
    }

    /// Open the channel for `site_id`.
    ///
    /// Only starts a connection cycle from `Disconnected` or `Error`, and only
    /// when the channel is enabled. Returns once the worker has taken the
    /// request, not once the connection is open.
    pub async fn connect(&self, site_id: &str) -> Result<(), ChannelError> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                site_id: site_id.to_owned(),
                done,
            })
            .map_err(|_| ChannelError::Stopped)?;
        ack.await.map_err(|_| ChannelError::Stopped)
    }

    /// Close the channel intentionally.
    ///
    /// Sends a normal-closure frame, stops the heartbeat and any pending
    /// reconnect, clears subscribers and the outbound queue, and leaves the
    /// channel `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), ChannelError> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(Command::Disconnect { done })
            .map_err(|_| ChannelError::Stopped)?;
        ack.await.map_err(|_| ChannelError::Stopped)
    }

    /// Send a `{type, data}` envelope, queueing it while not connected.
    pub fn send(&self, event_type: &str, data: Value) -> Result<(), ChannelError> {
        let text = Envelope::new(event_type, data).encode()?;
        let mut outbox = self.shared.outbox();
        let text = match &outbox.sender {
            Some(sender) => match sender.send(OutboundFrame::Text(text)) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(OutboundFrame::Text(text))) => text,
                Err(_) => return Ok(()),
            },
            None => text,
        };
        // Not connected, or the link dropped before its close was handled.
        outbox.sender = None;
        outbox.queue.push_back(text);
        Ok(())
    }

    /// Subscribe `handler` to envelopes of `event_type`.
    ///
    /// A handler that panics is logged and skipped; other handlers still run.
    pub fn on<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.shared
            .subscribers()
            .entry(event_type.to_owned())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            event_type: event_type.to_owned(),
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns true if the channel is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of queued outbound messages.
    pub fn queued(&self) -> usize {
        self.shared.outbox().queue.len()
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Wait until the channel reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ChannelError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ChannelError::Stopped)
    }
}

/// Removes one subscriber.
///
/// Dropping the subscription leaves the handler subscribed.
#[derive(Debug)]
#[must_use = "dropping the subscription keeps the handler subscribed"]
pub struct Subscription {
    id: u64,
    event_type: String,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove the handler. Returns false if it was already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut subscribers = shared.subscribers();
        let Some(handlers) = subscribers.get_mut(&self.event_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != self.id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            subscribers.remove(&self.event_type);
        }
        removed
    }
}

struct Worker {
    config: RealtimeConfig,
    connector: Arc<dyn DuplexConnector>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<LifecycleEvent>,
    shared: Arc<Shared>,
    url: Option<String>,
    /// Reconnect attempts since the last successful connection.
    attempts: u32,
    /// Whether the terminal failure event was emitted this cycle.
    failed: bool,
    connecting: Option<BoxFuture<'static, Result<DuplexConnection, ChannelError>>>,
    link: Option<DuplexConnection>,
    heartbeat: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

async fn opened(
    slot: &mut Option<BoxFuture<'static, Result<DuplexConnection, ChannelError>>>,
) -> Result<DuplexConnection, ChannelError> {
    match slot {
        Some(connecting) => connecting.await,
        None => std::future::pending().await,
    }
}

async fn next_event(link: &mut Option<DuplexConnection>) -> Option<ChannelEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn elapsed(reconnect: &mut Option<Pin<Box<Sleep>>>) {
    match reconnect {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

impl Worker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                result = opened(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_open(result);
                }
                event = next_event(&mut self.link) => {
                    self.on_event(event.unwrap_or(ChannelEvent::Closed {
                        code: super::channel::ABNORMAL_CLOSURE,
                        reason: "connection dropped".to_owned(),
                    }));
                }
                _ = tick(&mut self.heartbeat) => self.send_ping(),
                _ = elapsed(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.start_connecting();
                }
            }
        }

        self.drop_link(Some("Client shutdown"));
        #[cfg(feature = "tracing")]
        tracing::debug!("realtime worker stopped");
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            #[cfg(feature = "tracing")]
            tracing::debug!(state = %next, "realtime state changed");
            let _ = self.events.send(LifecycleEvent::StateChanged(next));
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { site_id, done } => {
                if !self.config.enabled {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("realtime disabled; ignoring connect");
                } else if self.state.borrow().accepts_connect() {
                    self.url = Some(self.config.url_for_site(&site_id));
                    self.attempts = 0;
                    self.failed = false;
                    self.start_connecting();
                }
                let _ = done.send(());
            }
            Command::Disconnect { done } => {
                self.drop_link(Some("Client disconnect"));
                self.connecting = None;
                self.reconnect = None;
                self.attempts = 0;
                self.shared.outbox().queue.clear();
                self.shared.subscribers().clear();
                self.set_state(ConnectionState::Disconnected);
                let _ = done.send(());
            }
        }
    }

    fn start_connecting(&mut self) {
        let Some(url) = self.url.clone() else {
            return;
        };
        self.set_state(ConnectionState::Connecting);
        #[cfg(feature = "tracing")]
        tracing::debug!(%url, attempt = self.attempts, "opening realtime connection");
        self.connecting = Some(self.connector.connect(url));
    }

    fn on_open(&mut self, result: Result<DuplexConnection, ChannelError>) {
        match result {
            Ok(link) => {
                self.attempts = 0;
                self.failed = false;
                {
                    let mut outbox = self.shared.outbox();
                    let mut flushed = 0usize;
                    let mut alive = true;
                    while let Some(text) = outbox.queue.pop_front() {
                        if let Err(mpsc::error::SendError(frame)) =
                            link.outbound.send(OutboundFrame::Text(text))
                        {
                            // The link died while flushing; keep the rest for
                            // the next connection.
                            if let OutboundFrame::Text(text) = frame {
                                outbox.queue.push_front(text);
                            }
                            alive = false;
                            break;
                        }
                        flushed += 1;
                    }
                    if alive {
                        outbox.sender = Some(link.outbound.clone());
                    } else {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            flushed,
                            requeued = outbox.queue.len(),
                            "realtime link closed during flush"
                        );
                    }
                    self.set_state(ConnectionState::Connected);
                    #[cfg(feature = "tracing")]
                    tracing::info!(flushed, "realtime connected");
                    #[cfg(not(feature = "tracing"))]
                    let _ = flushed;
                }
                let period = self.config.heartbeat_interval;
                let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);
                self.link = Some(link);
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "realtime connection failed");
                self.set_state(ConnectionState::Error);
                self.schedule_reconnect();
            }
        }
    }

    fn on_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(text) => self.dispatch(&text),
            ChannelEvent::Error(_message) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_message, "realtime transport error");
            }
            ChannelEvent::Closed { code, reason: _reason } => {
                self.drop_link(None);
                if code == NORMAL_CLOSURE {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(reason = %_reason, "realtime closed normally");
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(code, reason = %_reason, "realtime closed abnormally");
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// Drop the link and stop the heartbeat. With `close_reason`, a
    /// normal-closure frame is sent to the peer first.
    fn drop_link(&mut self, close_reason: Option<&str>) {
        self.heartbeat = None;
        self.shared.outbox().sender = None;
        if let (Some(link), Some(reason)) = (self.link.take(), close_reason) {
            let _ = link.outbound.send(OutboundFrame::Close {
                code: NORMAL_CLOSURE,
                reason: reason.to_owned(),
            });
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.attempts < self.config.max_reconnect_attempts {
            self.attempts += 1;
            let delay = self.config.reconnect_delay(self.attempts);
            self.set_state(ConnectionState::Reconnecting);
            #[cfg(feature = "tracing")]
            tracing::info!(attempt = self.attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            let _ = self.events.send(LifecycleEvent::ReconnectScheduled {
                attempt: self.attempts,
                delay,
            });
            self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
        } else {
            self.set_state(ConnectionState::Error);
            if !self.failed {
                self.failed = true;
                #[cfg(feature = "tracing")]
                tracing::warn!(attempts = self.attempts, "{}", RECONNECT_FAILED_MESSAGE);
                let _ = self.events.send(LifecycleEvent::Failed {
                    message: RECONNECT_FAILED_MESSAGE.to_owned(),
                });
            }
        }
    }

    fn send_ping(&self) {
        let Some(link) = &self.link else {
            return;
        };
        match Envelope::ping().encode() {
            Ok(text) => {
                let _ = link.outbound.send(OutboundFrame::Text(text));
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %_err, "failed to encode heartbeat");
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "dropping unparseable realtime message");
                return;
            }
        };
        if envelope.is_heartbeat() {
            return;
        }

        let handlers: Vec<Handler> = self
            .shared
            .subscribers()
            .get(&envelope.kind)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&envelope.data))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!(event_type = %envelope.kind, "realtime subscriber panicked");
            }
        }
    }
}
