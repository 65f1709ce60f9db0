//! HTTP and realtime client runtime.
//!
//! This crate provides the client side of a web application's data layer:
//!
//! - A request pipeline with interceptors, per-attempt timeouts and retries
//!   with exponential backoff
//! - Cancellation of in-flight requests by id
//! - Bearer credential storage with single-flight refresh
//! - A realtime push channel with heartbeat, reconnection and an outbound
//!   queue
//!
//! ## Example
//!
//! ```ignore
//! use courier_client::{ApiClient, RequestOptions};
//! use std::time::Duration;
//!
//! let client = ApiClient::builder("https://api.example.com")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! client.tokens().store("access", Some("refresh"), Some(3600));
//!
//! let response = client.get("/users/me").await?;
//! let me: User = response.json()?;
//! ```
//!
//! ## Cancellation
//!
//! Every request has an id, either generated or set with
//! [`RequestOptions::request_id`]. Cancel it from anywhere holding the
//! client:
//!
//! ```ignore
//! let options = RequestOptions::new().request_id("export");
//! let export = tokio::spawn({
//!     let client = client.clone();
//!     async move { client.request("/exports", options).await }
//! });
//!
//! client.cancel("export");
//! assert!(export.await?.unwrap_err().is_cancellation());
//! ```
//!
//! A timeout is a cancellation with a different reason. Neither is retried,
//! and neither passes through the error interceptors.
//!
//! ## Credential refresh
//!
//! Concurrent callers of [`TokenManager::refresh`] share one refresh:
//!
//! ```ignore
//! let token = client
//!     .tokens()
//!     .refresh(|refresh_token| async move {
//!         let tokens = auth_api.refresh(&refresh_token).await?;
//!         Ok(RefreshedTokens::new(tokens.access).expires_in(tokens.ttl))
//!     })
//!     .await?;
//! ```
//!
//! ## Realtime
//!
//! ```ignore
//! let client = ApiClient::builder("https://api.example.com")
//!     .realtime(RealtimeConfig::new("wss://api.example.com/ws"))
//!     .build()?;
//!
//! let realtime = client.realtime().unwrap();
//! let subscription = realtime.on("order.updated", |data| println!("{data}"));
//! realtime.connect("site-1").await?;
//! realtime.send("order.watch", serde_json::json!({"id": 42}))?;
//! ```

mod builder;
mod cancel;
mod client;
pub mod config;
mod error;
pub mod realtime;
pub mod request;
mod response;
pub mod token;
pub mod transport;

pub use builder::{ClientBuilder, ClientBuildError};
pub use cancel::{CancelReason, CancelState, CancelToken, CancellationRegistry};
pub use client::ApiClient;
pub use config::{
    ClientSettings, HeaderInterceptor, InterceptorHandle, InterceptorRegistry, RequestInterceptor,
    RequestOptions, ResponseInterceptor, RetryPolicy,
};
pub use error::ClientError;
pub use realtime::{ConnectionState, LifecycleEvent, RealtimeConfig, RealtimeManager};
pub use request::{Form, Part, RequestBody, RequestDescriptor, ResponseType};
pub use response::{ApiResponse, ResponseData};
pub use token::{MemoryTokenStore, RefreshedTokens, TokenManager, TokenStore};

// Re-export core types
pub use courier_core::{Envelope, ErrorKind};
