//! Walks through the client runtime against a local server.
//!
//! ```text
//! RUST_LOG=courier_client=debug,demo=info cargo run --bin demo
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use courier_client::{
    ApiClient, ClientError, ConnectionState, Envelope, RealtimeConfig, RefreshedTokens,
    RequestOptions, RetryPolicy,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Default)]
struct AppState {
    order_hits: Arc<AtomicUsize>,
}

// Fails twice, then answers; the client retries through it.
async fn list_orders(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if headers.get("authorization").is_none() {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "login required"}))).into_response();
    }
    if state.order_hits.fetch_add(1, Ordering::SeqCst) < 2 {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "warming up"}))).into_response();
    }
    Json(json!([{"id": 1, "status": "open"}, {"id": 2, "status": "shipped"}])).into_response()
}

async fn refresh(Json(body): Json<Value>) -> Response {
    match body.get("refresh_token").and_then(Value::as_str) {
        Some("refresh-1") => Json(json!({
            "access_token": "access-2",
            "refresh_token": "refresh-2",
            "expires_in": 3600,
        }))
        .into_response(),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad refresh token"}))).into_response(),
    }
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(10)).await;
    Json(json!({"done": true}))
}

async fn realtime(upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(push_updates)
}

async fn push_updates(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(envelope) = Envelope::decode(text.as_str()) else {
            continue;
        };
        let reply = match envelope.kind.as_str() {
            "PING" => Envelope::new("PONG", Value::Null),
            "order.watch" => Envelope::new(
                "order.updated",
                json!({"id": envelope.data["id"], "status": "shipped"}),
            ),
            _ => continue,
        };
        let Ok(text) = reply.encode() else {
            continue;
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

async fn serve() -> anyhow::Result<SocketAddr> {
    let app = Router::new()
        .route("/api/orders", get(list_orders))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/slow", get(slow))
        .route("/ws", get(realtime))
        .with_state(AppState::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server stopped");
        }
    });
    Ok(addr)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("courier_client=debug,demo=info")),
        )
        .init();

    let addr = serve().await?;
    tracing::info!(%addr, "demo server listening");

    let client = ApiClient::builder(format!("http://{addr}/api"))
        .timeout(Duration::from_secs(5))
        .retry_policy(RetryPolicy::new().base_delay(Duration::from_millis(200)))
        .user_agent("courier-demo/0.1")
        .realtime(
            RealtimeConfig::new(format!("ws://{addr}/ws"))
                .heartbeat_interval(Duration::from_secs(2)),
        )
        .build()?;

    // Log every request attempt.
    let _logging = client.add_request_interceptor(|request| async move {
        tracing::info!(id = %request.id, attempt = request.attempt, url = %request.url, "sending");
        Ok(request)
    });

    // Credentials: start with an expired token, then refresh it.
    client.tokens().store("access-1", Some("refresh-1"), Some(0));
    tracing::info!(expired = client.tokens().is_expired(), "stored initial credentials");

    let refresher = client.clone();
    let access = client
        .tokens()
        .refresh(move |refresh_token| async move {
            let response = refresher
                .post("/auth/refresh", &json!({"refresh_token": refresh_token}))
                .await?;
            let body = response.json::<Value>()?;
            let access = body["access_token"]
                .as_str()
                .ok_or_else(|| ClientError::Decode("missing access_token".into()))?;
            let mut tokens = RefreshedTokens::new(access);
            if let Some(refresh) = body["refresh_token"].as_str() {
                tokens = tokens.refresh_token(refresh);
            }
            if let Some(ttl) = body["expires_in"].as_u64() {
                tokens = tokens.expires_in(ttl);
            }
            Ok(tokens)
        })
        .await?;
    tracing::info!(%access, "refreshed credentials");

    // Retries through two 503s.
    let orders = client.get("/orders").await?;
    tracing::info!(status = %orders.status, data = ?orders.data, "orders");

    // Cancel a request by id.
    let pending = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .request("/slow", RequestOptions::new().request_id("slow-report"))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.cancel("slow-report");
    match pending.await? {
        Err(e) if e.is_cancellation() => tracing::info!(error = %e, "cancelled slow request"),
        other => tracing::warn!(?other, "slow request was not cancelled"),
    }

    // Realtime: queue before connecting, then watch for updates.
    let realtime = client
        .realtime()
        .ok_or_else(|| anyhow::anyhow!("realtime channel not configured"))?;
    let (updates, mut updated) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = realtime.on("order.updated", move |data| {
        let _ = updates.send(data.clone());
    });

    realtime.send("order.watch", json!({"id": 2}))?;
    realtime.connect("site-1").await?;
    realtime.wait_for_state(ConnectionState::Connected).await?;

    if let Ok(Some(update)) = tokio::time::timeout(Duration::from_secs(3), updated.recv()).await {
        tracing::info!(%update, "order updated");
    }

    realtime.disconnect().await?;
    tracing::info!(state = %realtime.state(), "done");
    Ok(())
}
