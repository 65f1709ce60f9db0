//! Realtime channel against a real WebSocket server.

use std::time::Duration;

use courier_client::realtime::NORMAL_CLOSURE;
use courier_client::{ConnectionState, Envelope, RealtimeConfig, RealtimeManager};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq)]
enum Seen {
    Opened(String),
    Envelope(String, Value),
    Closed(Option<u16>),
}

async fn start_server() -> (String, mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, tx.clone()));
        }
    });
    (format!("ws://{addr}/ws"), rx)
}

async fn serve(stream: TcpStream, seen: mpsc::UnboundedSender<Seen>) {
    let opened = seen.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let _ = opened.send(Seen::Opened(request.uri().to_string()));
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => {
                let envelope = Envelope::decode(text.as_str()).unwrap();
                let _ = seen.send(Seen::Envelope(envelope.kind.clone(), envelope.data.clone()));
                let reply = match envelope.kind.as_str() {
                    "PING" => Envelope::new("PONG", Value::Null),
                    "echo" => Envelope::new("echo.reply", envelope.data),
                    // Drop the socket without a close frame.
                    "drop" => return,
                    _ => continue,
                };
                let text = reply.encode().unwrap();
                if ws.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            Message::Close(frame) => {
                let _ = seen.send(Seen::Closed(frame.map(|f| u16::from(f.code))));
                return;
            }
            _ => {}
        }
    }
}

async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

/// Next envelope the server received, skipping heartbeats.
async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<Seen>) -> (String, Value) {
    loop {
        match next_seen(rx).await {
            Seen::Envelope(kind, _) if kind == "PING" => continue,
            Seen::Envelope(kind, data) => return (kind, data),
            other => panic!("expected an envelope, got {other:?}"),
        }
    }
}

async fn wait_for(manager: &RealtimeManager, state: ConnectionState) {
    timeout(WAIT, manager.wait_for_state(state))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_round_trip_with_subscriber() {
    let (url, mut seen) = start_server().await;
    let manager = RealtimeManager::new(RealtimeConfig::new(url)).unwrap();

    let (tx, mut replies) = mpsc::unbounded_channel();
    let _subscription = manager.on("echo.reply", move |data| {
        let _ = tx.send(data.clone());
    });

    manager.connect("site-1").await.unwrap();
    wait_for(&manager, ConnectionState::Connected).await;
    assert_eq!(next_seen(&mut seen).await, Seen::Opened("/ws?siteId=site-1".into()));

    manager.send("echo", json!({"n": 1})).unwrap();
    let reply = timeout(WAIT, replies.recv()).await.unwrap().unwrap();
    assert_eq!(reply, json!({"n": 1}));
}

#[tokio::test]
async fn test_queued_messages_flush_in_order() {
    let (url, mut seen) = start_server().await;
    let manager = RealtimeManager::new(RealtimeConfig::new(url)).unwrap();

    for n in 1..=3 {
        manager.send("note", json!(n)).unwrap();
    }
    assert_eq!(manager.queued(), 3);

    manager.connect("site-1").await.unwrap();
    assert!(matches!(next_seen(&mut seen).await, Seen::Opened(_)));
    for n in 1..=3 {
        assert_eq!(next_envelope(&mut seen).await, ("note".to_owned(), json!(n)));
    }
    assert_eq!(manager.queued(), 0);
}

#[tokio::test]
async fn test_heartbeat() {
    let (url, mut seen) = start_server().await;
    let config = RealtimeConfig::new(url).heartbeat_interval(Duration::from_millis(50));
    let manager = RealtimeManager::new(config).unwrap();

    let (tx, mut pongs) = mpsc::unbounded_channel();
    // PONG replies are never delivered to subscribers.
    let _subscription = manager.on("PONG", move |_| {
        let _ = tx.send(());
    });

    manager.connect("site-1").await.unwrap();
    assert!(matches!(next_seen(&mut seen).await, Seen::Opened(_)));
    assert!(matches!(next_seen(&mut seen).await, Seen::Envelope(kind, _) if kind == "PING"));
    assert!(matches!(next_seen(&mut seen).await, Seen::Envelope(kind, _) if kind == "PING"));
    assert!(pongs.try_recv().is_err());
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_reconnects_after_abnormal_close() {
    let (url, mut seen) = start_server().await;
    let config = RealtimeConfig::new(url).base_reconnect_delay(Duration::from_millis(20));
    let manager = RealtimeManager::new(config).unwrap();

    manager.connect("site-1").await.unwrap();
    assert!(matches!(next_seen(&mut seen).await, Seen::Opened(_)));
    wait_for(&manager, ConnectionState::Connected).await;

    manager.send("drop", Value::Null).unwrap();
    assert_eq!(next_envelope(&mut seen).await.0, "drop");

    // Same site on the second connection.
    assert_eq!(next_seen(&mut seen).await, Seen::Opened("/ws?siteId=site-1".into()));
    wait_for(&manager, ConnectionState::Connected).await;

    manager.send("echo", json!("again")).unwrap();
    assert_eq!(next_envelope(&mut seen).await, ("echo".to_owned(), json!("again")));
}

#[tokio::test]
async fn test_disconnect_closes_normally() {
    let (url, mut seen) = start_server().await;
    let manager = RealtimeManager::new(RealtimeConfig::new(url)).unwrap();

    manager.connect("site-1").await.unwrap();
    assert!(matches!(next_seen(&mut seen).await, Seen::Opened(_)));
    wait_for(&manager, ConnectionState::Connected).await;

    manager.disconnect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(next_seen(&mut seen).await, Seen::Closed(Some(NORMAL_CLOSURE)));

    // Sends after disconnect are queued, not lost.
    manager.send("later", Value::Null).unwrap();
    assert_eq!(manager.queued(), 1);
}

#[tokio::test]
async fn test_unreachable_server_gives_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = RealtimeConfig::new(format!("ws://{addr}/ws"))
        .max_reconnect_attempts(2)
        .base_reconnect_delay(Duration::from_millis(10));
    let manager = RealtimeManager::new(config).unwrap();
    let mut events = manager.events();

    manager.connect("site-1").await.unwrap();
    wait_for(&manager, ConnectionState::Error).await;

    let failed = timeout(WAIT, async {
        loop {
            if let Ok(courier_client::LifecycleEvent::Failed { message }) = events.recv().await {
                return message;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failed, courier_client::realtime::RECONNECT_FAILED_MESSAGE);
}
