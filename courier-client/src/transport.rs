//! HTTP transport layer.
//!
//! The request pipeline talks to the network through the [`Transport`] trait.
//! [`HyperTransport`] is the default implementation, built on hyper_util's
//! legacy client. It supports:
//!
//! - HTTP/1.1 and HTTP/2 with automatic protocol negotiation
//! - TLS with rustls (feature-gated)
//! - Connection pooling
//! - Tower service integration for middleware
//!
//! # Feature Flags
//!
//! TLS support requires enabling the appropriate features:
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates
//!
//! # Example
//!
//! ```ignore
//! use courier_client::transport::HyperTransport;
//! use std::time::Duration;
//!
//! let transport = HyperTransport::builder()
//!     .pool_idle_timeout(Duration::from_secs(60))
//!     .build()?;
//! ```

mod body;
mod connector;
mod hyper;

pub use body::TransportBody;
pub use connector::{build_https_connector, has_tls_support};

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub use connector::default_tls_config;

pub use hyper::{HyperTransport, HyperTransportBuilder};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::ClientError;
use crate::cancel::CancelToken;
use crate::config::BoxFuture;

/// A fully buffered HTTP response.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends one HTTP request attempt.
///
/// Implementations must watch `cancel` and resolve with
/// [`CancelToken::error`] once it fires, releasing any in-flight I/O. Every
/// failure to obtain a response maps to [`ClientError::Transport`]; a
/// non-success status is *not* an error at this layer.
pub trait Transport: Send + Sync + 'static {
    fn dispatch(
        &self,
        request: http::Request<TransportBody>,
        cancel: CancelToken,
    ) -> BoxFuture<'static, Result<TransportResponse, ClientError>>;
}
