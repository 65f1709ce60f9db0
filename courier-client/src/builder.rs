//! Client builder.
//!
//! Provides a fluent API for configuring and building an [`ApiClient`].

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, header};

use crate::cancel::CancellationRegistry;
use crate::client::{ApiClient, ClientInner};
use crate::config::{ClientSettings, DEFAULT_TIMEOUT, InterceptorRegistry, RetryPolicy};
use crate::realtime::{ChannelError, DuplexConnector, RealtimeConfig, RealtimeManager, WebSocketConnector};
use crate::token::{MemoryTokenStore, TokenManager, TokenStore};
use crate::transport::{HyperTransport, Transport};

/// Builder for creating an [`ApiClient`].
///
/// # Example
///
/// ```ignore
/// use courier_client::{ClientBuilder, RealtimeConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let client = ClientBuilder::new("https://api.example.com")
///     .timeout(Duration::from_secs(10))
///     .retry_policy(RetryPolicy::new().max_retries(5))
///     .realtime(RealtimeConfig::new("wss://api.example.com/ws"))
///     .build()?;
/// ```
pub struct ClientBuilder {
    /// Prefix for relative endpoints.
    base_url: String,
    /// Per-attempt timeout when a request sets none.
    default_timeout: Duration,
    retry: RetryPolicy,
    /// Headers added to every request.
    default_headers: HeaderMap,
    user_agent: Option<String>,
    token_store: Option<Arc<dyn TokenStore>>,
    transport: Option<Arc<dyn Transport>>,
    realtime: Option<RealtimeConfig>,
    realtime_connector: Option<Arc<dyn DuplexConnector>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("default_timeout", &self.default_timeout)
            .field("retry", &self.retry)
            .field("default_headers", &self.default_headers)
            .field("user_agent", &self.user_agent)
            .field("token_store", &self.token_store.is_some())
            .field("transport", &self.transport.is_some())
            .field("realtime", &self.realtime)
            .field("realtime_connector", &self.realtime_connector.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new ClientBuilder with the given base URL.
    ///
    /// A trailing slash is removed at build time.
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            default_timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            default_headers: HeaderMap::new(),
            user_agent: None,
            token_store: None,
            transport: None,
            realtime: None,
            realtime_connector: None,
        }
    }

    /// Create a builder from declarative settings.
    ///
    /// The realtime channel is configured only when `realtime_url` is set.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        let mut builder = Self::new(settings.base_url.clone())
            .timeout(settings.timeout())
            .retry_policy(settings.retry_policy());
        builder.realtime = settings.realtime_config();
        builder
    }

    /// Set the default per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the retry policy. It is validated by [`build`](Self::build).
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Add a header sent with every request.
    ///
    /// Caller headers with the same name replace it.
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Set the `User-Agent` header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Persist credentials in `store` instead of memory.
    pub fn token_store<S: TokenStore>(mut self, store: S) -> Self {
        self.token_store = Some(Arc::new(store));
        self
    }

    /// Share a credential store with other components.
    pub fn shared_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Dispatch requests through `transport` instead of the default
    /// [`HyperTransport`].
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Like [`transport`](Self::transport), for an already shared transport.
    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attach a realtime channel.
    pub fn realtime(mut self, config: RealtimeConfig) -> Self {
        self.realtime = Some(config);
        self
    }

    /// Open realtime connections through `connector` instead of WebSocket.
    pub fn realtime_connector(mut self, connector: Arc<dyn DuplexConnector>) -> Self {
        self.realtime_connector = Some(connector);
        self
    }

    /// Build the client.
    ///
    /// Starting the realtime channel requires a Tokio runtime; a client
    /// without one can be built anywhere.
    pub fn build(self) -> Result<ApiClient, ClientBuildError> {
        self.retry
            .validate()
            .map_err(|reason| ClientBuildError::InvalidConfig(format!("retry policy: {reason}")))?;

        let mut default_headers = self.default_headers;
        if let Some(user_agent) = &self.user_agent {
            let value = HeaderValue::from_str(user_agent).map_err(|e| {
                ClientBuildError::InvalidConfig(format!("invalid user agent {user_agent:?}: {e}"))
            })?;
            default_headers.insert(header::USER_AGENT, value);
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HyperTransport::new().map_err(|e| ClientBuildError::HttpClient(e.to_string()))?,
            ),
        };

        let tokens = match self.token_store {
            Some(store) => TokenManager::with_shared_store(store),
            None => TokenManager::new(MemoryTokenStore::new()),
        };

        let realtime = match self.realtime {
            Some(config) => {
                let connector = self
                    .realtime_connector
                    .unwrap_or_else(|| Arc::new(WebSocketConnector) as Arc<dyn DuplexConnector>);
                Some(RealtimeManager::with_connector(config, connector)?)
            }
            None => None,
        };

        // Normalize base URL (remove trailing slash)
        let base_url = self.base_url.trim_end_matches('/').to_string();

        Ok(ApiClient::from_inner(ClientInner {
            base_url,
            transport,
            default_headers,
            default_timeout: self.default_timeout,
            retry: self.retry,
            interceptors: InterceptorRegistry::new(),
            cancellations: CancellationRegistry::new(),
            tokens,
            realtime,
        }))
    }
}

/// Error type for client building failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// Failed to create the HTTP transport.
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The realtime channel could not be started.
    #[error("failed to start realtime channel: {0}")]
    Realtime(#[from] ChannelError),
}
