//! Interceptor registry.
//!
//! Interceptors add cross-cutting logic to every request:
//! - Request interceptors transform the [`RequestDescriptor`] before dispatch
//! - Response interceptors transform a successful [`ApiResponse`] or rewrite
//!   a terminal [`ClientError`]
//!
//! Interceptors run strictly in registration order. Each phase reads the
//! registry at the moment it runs, so adding or removing an interceptor only
//! affects phases that start afterwards.
//!
//! # Example
//!
//! ```ignore
//! use courier_client::{ApiClient, HeaderInterceptor};
//!
//! let client = ApiClient::builder("http://localhost:3000").build()?;
//!
//! let handle = client.interceptors().add_request(HeaderInterceptor::new("x-app", "dashboard"));
//!
//! // Later: stop adding the header to new requests.
//! handle.unregister();
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use http::{HeaderName, HeaderValue};

use crate::ClientError;
use crate::request::RequestDescriptor;
use crate::response::ApiResponse;

/// Type alias for a boxed future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Transforms a request before it is dispatched.
///
/// Returning an error aborts the request; the error is routed through the
/// error phase and is not retried.
pub trait RequestInterceptor: Send + Sync {
    fn on_request(
        &self,
        request: RequestDescriptor,
    ) -> BoxFuture<'_, Result<RequestDescriptor, ClientError>>;
}

/// Transforms a response or a terminal error.
///
/// `on_error` cannot turn a failure into a success: whatever it returns
/// becomes the error passed to the next interceptor and, finally, to the
/// caller.
pub trait ResponseInterceptor: Send + Sync {
    fn on_success(&self, response: ApiResponse) -> BoxFuture<'_, Result<ApiResponse, ClientError>> {
        Box::pin(async move { Ok(response) })
    }

    fn on_error(&self, error: ClientError) -> BoxFuture<'_, ClientError> {
        Box::pin(async move { error })
    }
}

// ============================================================================
// Header Interceptor
// ============================================================================

/// A request interceptor that sets a header on every request.
///
/// # Example
///
/// ```
/// use courier_client::HeaderInterceptor;
///
/// let interceptor = HeaderInterceptor::new("x-client-version", "1.4.0");
/// ```
#[derive(Clone, Debug)]
pub struct HeaderInterceptor {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderInterceptor {
    /// Create a new header interceptor.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.parse().expect("invalid header name"),
            value: value.parse().expect("invalid header value"),
        }
    }

    /// Try to create a new header interceptor, returning an error if invalid.
    pub fn try_new(name: &str, value: &str) -> Result<Self, ClientError> {
        let name = name
            .parse()
            .map_err(|_| ClientError::Protocol(format!("invalid header name: {}", name)))?;
        let value = value
            .parse()
            .map_err(|_| ClientError::Protocol(format!("invalid header value: {}", value)))?;
        Ok(Self { name, value })
    }

    /// Create a new header interceptor from pre-parsed values.
    pub fn from_parts(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl RequestInterceptor for HeaderInterceptor {
    fn on_request(
        &self,
        mut request: RequestDescriptor,
    ) -> BoxFuture<'_, Result<RequestDescriptor, ClientError>> {
        request.set_header(self.name.clone(), self.value.clone());
        Box::pin(async move { Ok(request) })
    }
}

// ============================================================================
// Closure Interceptors
// ============================================================================

/// Adapts an async closure to [`RequestInterceptor`].
pub struct RequestFn<F> {
    f: F,
}

impl<F, Fut> RequestFn<F>
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RequestDescriptor, ClientError>> + Send + 'static,
{
    /// Create a new interceptor from a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> std::fmt::Debug for RequestFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestFn").finish()
    }
}

impl<F, Fut> RequestInterceptor for RequestFn<F>
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RequestDescriptor, ClientError>> + Send + 'static,
{
    fn on_request(
        &self,
        request: RequestDescriptor,
    ) -> BoxFuture<'_, Result<RequestDescriptor, ClientError>> {
        Box::pin((self.f)(request))
    }
}

/// Adapts a pair of async closures to [`ResponseInterceptor`].
pub struct ResponseFn<S, E> {
    on_success: S,
    on_error: E,
}

impl<S, SFut, E, EFut> ResponseFn<S, E>
where
    S: Fn(ApiResponse) -> SFut + Send + Sync,
    SFut: Future<Output = Result<ApiResponse, ClientError>> + Send + 'static,
    E: Fn(ClientError) -> EFut + Send + Sync,
    EFut: Future<Output = ClientError> + Send + 'static,
{
    /// Create a new interceptor from a success and an error closure.
    pub fn new(on_success: S, on_error: E) -> Self {
        Self {
            on_success,
            on_error,
        }
    }
}

impl<S, E> std::fmt::Debug for ResponseFn<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFn").finish()
    }
}

impl<S, SFut, E, EFut> ResponseInterceptor for ResponseFn<S, E>
where
    S: Fn(ApiResponse) -> SFut + Send + Sync,
    SFut: Future<Output = Result<ApiResponse, ClientError>> + Send + 'static,
    E: Fn(ClientError) -> EFut + Send + Sync,
    EFut: Future<Output = ClientError> + Send + 'static,
{
    fn on_success(&self, response: ApiResponse) -> BoxFuture<'_, Result<ApiResponse, ClientError>> {
        Box::pin((self.on_success)(response))
    }

    fn on_error(&self, error: ClientError) -> BoxFuture<'_, ClientError> {
        Box::pin((self.on_error)(error))
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Request,
    Response,
}

type Entries<T> = Mutex<Vec<(u64, Arc<T>)>>;

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    request: Entries<dyn RequestInterceptor>,
    response: Entries<dyn ResponseInterceptor>,
}

fn lock<T: ?Sized>(entries: &Entries<T>) -> MutexGuard<'_, Vec<(u64, Arc<T>)>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn snapshot<T: ?Sized>(entries: &Entries<T>) -> Vec<Arc<T>> {
    lock(entries).iter().map(|(_, i)| Arc::clone(i)).collect()
}

/// Removes exactly one registered interceptor.
///
/// Dropping the handle leaves the interceptor registered.
#[derive(Debug)]
#[must_use = "dropping the handle keeps the interceptor registered forever"]
pub struct InterceptorHandle {
    id: u64,
    phase: Phase,
    registry: Weak<RegistryInner>,
}

impl InterceptorHandle {
    /// Unregister the interceptor. Returns false if it was already removed.
    pub fn unregister(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        match self.phase {
            Phase::Request => remove_entry(&registry.request, self.id),
            Phase::Response => remove_entry(&registry.response, self.id),
        }
    }
}

fn remove_entry<T: ?Sized>(entries: &Entries<T>, id: u64) -> bool {
    let mut entries = lock(entries);
    let before = entries.len();
    entries.retain(|(entry_id, _)| *entry_id != id);
    entries.len() != before
}

/// Ordered, mutable lists of request and response interceptors.
///
/// Clones share the same lists.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("request", &self.request_len())
            .field("response", &self.response_len())
            .finish()
    }
}

impl InterceptorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, phase: Phase) -> InterceptorHandle {
        InterceptorHandle {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            phase,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Append a request interceptor.
    pub fn add_request<I: RequestInterceptor + 'static>(&self, interceptor: I) -> InterceptorHandle {
        let handle = self.handle(Phase::Request);
        lock(&self.inner.request).push((handle.id, Arc::new(interceptor)));
        handle
    }

    /// Append a response interceptor.
    pub fn add_response<I: ResponseInterceptor + 'static>(
        &self,
        interceptor: I,
    ) -> InterceptorHandle {
        let handle = self.handle(Phase::Response);
        lock(&self.inner.response).push((handle.id, Arc::new(interceptor)));
        handle
    }

    /// Number of request interceptors.
    pub fn request_len(&self) -> usize {
        lock(&self.inner.request).len()
    }

    /// Number of response interceptors.
    pub fn response_len(&self) -> usize {
        lock(&self.inner.response).len()
    }

    /// Returns true if no interceptors are registered.
    pub fn is_empty(&self) -> bool {
        self.request_len() == 0 && self.response_len() == 0
    }

    /// Fold `request` through every request interceptor.
    pub async fn run_request_phase(
        &self,
        mut request: RequestDescriptor,
    ) -> Result<RequestDescriptor, ClientError> {
        for interceptor in snapshot(&self.inner.request) {
            request = guarded(interceptor.on_request(request)).await??;
        }
        Ok(request)
    }

    /// Fold `response` through every success hook.
    pub async fn run_success_phase(
        &self,
        mut response: ApiResponse,
    ) -> Result<ApiResponse, ClientError> {
        for interceptor in snapshot(&self.inner.response) {
            response = guarded(interceptor.on_success(response)).await??;
        }
        Ok(response)
    }

    /// Fold `error` through every error hook and return the final error.
    ///
    /// A hook that panics is replaced by an [`ClientError::Interceptor`]
    /// describing the panic, which the remaining hooks then receive.
    pub async fn run_error_phase(&self, mut error: ClientError) -> ClientError {
        for interceptor in snapshot(&self.inner.response) {
            error = match guarded(interceptor.on_error(error)).await {
                Ok(next) => next,
                Err(panic) => panic,
            };
        }
        error
    }
}

/// Run an interceptor future, turning a panic into an interceptor error.
async fn guarded<T>(future: BoxFuture<'_, T>) -> Result<T, ClientError> {
    AssertUnwindSafe(future).catch_unwind().await.map_err(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        #[cfg(feature = "tracing")]
        tracing::error!(%reason, "interceptor panicked");
        ClientError::Interceptor(format!("interceptor panicked: {reason}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use http::{HeaderMap, Method, StatusCode};

    use crate::request::{RequestBody, ResponseType};
    use crate::response::ResponseData;

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor {
            id: "r1".into(),
            url: "http://localhost/x".into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: Duration::from_secs(1),
            attempt: 0,
            response_type: ResponseType::Auto,
        }
    }

    fn response() -> ApiResponse {
        ApiResponse {
            data: ResponseData::Empty,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            request_id: "r1".into(),
        }
    }

    fn appending(tag: &'static str) -> impl RequestInterceptor + 'static {
        RequestFn::new(move |mut request: RequestDescriptor| async move {
            tokio::task::yield_now().await;
            request.url.push_str(tag);
            Ok(request)
        })
    }

    #[tokio::test]
    async fn test_request_phase_runs_in_registration_order() {
        let registry = InterceptorRegistry::new();
        let _a = registry.add_request(appending("/a"));
        let _b = registry.add_request(appending("/b"));

        let request = registry.run_request_phase(descriptor()).await.unwrap();
        assert_eq!(request.url, "http://localhost/x/a/b");
    }

    #[tokio::test]
    async fn test_header_interceptor() {
        let registry = InterceptorRegistry::new();
        let _h = registry.add_request(HeaderInterceptor::new("x-custom-header", "test-value"));

        let request = registry.run_request_phase(descriptor()).await.unwrap();
        assert_eq!(request.headers.get("x-custom-header").unwrap(), "test-value");
    }

    #[test]
    fn test_header_interceptor_try_new_rejects_invalid() {
        assert!(HeaderInterceptor::try_new("bad name", "v").is_err());
        assert!(HeaderInterceptor::try_new("x-ok", "v").is_ok());
    }

    #[tokio::test]
    async fn test_unregister_removes_exactly_one_entry() {
        let registry = InterceptorRegistry::new();
        let a = registry.add_request(appending("/a"));
        let _b = registry.add_request(appending("/b"));

        assert!(a.unregister());
        assert_eq!(registry.request_len(), 1);

        let request = registry.run_request_phase(descriptor()).await.unwrap();
        assert_eq!(request.url, "http://localhost/x/b");
    }

    #[test]
    fn test_unregister_after_registry_dropped() {
        let registry = InterceptorRegistry::new();
        let handle = registry.add_request(appending("/a"));
        drop(registry);
        assert!(!handle.unregister());
    }

    #[tokio::test]
    async fn test_request_interceptor_error_aborts_phase() {
        let registry = InterceptorRegistry::new();
        let _fail = registry.add_request(RequestFn::new(|_request: RequestDescriptor| async {
            Err(ClientError::Interceptor("denied".into()))
        }));
        let _after = registry.add_request(appending("/never"));

        let err = registry.run_request_phase(descriptor()).await.unwrap_err();
        assert!(matches!(err, ClientError::Interceptor(ref m) if m == "denied"));
    }

    #[tokio::test]
    async fn test_success_phase_transforms_response() {
        let registry = InterceptorRegistry::new();
        let _r = registry.add_response(ResponseFn::new(
            |mut response: ApiResponse| async move {
                response.data = ResponseData::Text("wrapped".into());
                Ok(response)
            },
            |error: ClientError| async move { error },
        ));

        let response = registry.run_success_phase(response()).await.unwrap();
        assert!(matches!(response.data, ResponseData::Text(ref t) if t == "wrapped"));
    }

    #[tokio::test]
    async fn test_error_phase_chains_replacements() {
        let registry = InterceptorRegistry::new();
        let _first = registry.add_response(ResponseFn::new(
            |response: ApiResponse| async move { Ok(response) },
            |error: ClientError| async move {
                ClientError::Protocol(format!("first({})", error.message()))
            },
        ));
        let _second = registry.add_response(ResponseFn::new(
            |response: ApiResponse| async move { Ok(response) },
            |error: ClientError| async move {
                ClientError::Protocol(format!("second({})", error.message()))
            },
        ));

        let err = registry
            .run_error_phase(ClientError::Transport("down".into()))
            .await;
        assert_eq!(
            err.message(),
            "protocol error: second(protocol error: first(transport error: down))"
        );
    }

    #[tokio::test]
    async fn test_error_phase_isolates_panicking_hook() {
        struct Panics;
        impl ResponseInterceptor for Panics {
            fn on_error(&self, _error: ClientError) -> BoxFuture<'_, ClientError> {
                Box::pin(async { panic!("hook exploded") })
            }
        }

        let registry = InterceptorRegistry::new();
        let _p = registry.add_response(Panics);
        let _next = registry.add_response(ResponseFn::new(
            |response: ApiResponse| async move { Ok(response) },
            |error: ClientError| async move { error },
        ));

        let err = registry
            .run_error_phase(ClientError::Transport("down".into()))
            .await;
        assert!(matches!(err, ClientError::Interceptor(ref m) if m.contains("hook exploded")));
    }

    #[tokio::test]
    async fn test_empty_error_phase_returns_error_unchanged() {
        let registry = InterceptorRegistry::new();
        let err = registry.run_error_phase(ClientError::NoRefreshToken).await;
        assert!(matches!(err, ClientError::NoRefreshToken));
    }

    #[tokio::test]
    async fn test_snapshot_taken_when_phase_starts() {
        let registry = InterceptorRegistry::new();
        let slow = registry.add_request(RequestFn::new(|request: RequestDescriptor| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(request)
        }));
        let _tail = registry.add_request(appending("/tail"));

        let running = tokio::spawn({
            let registry = registry.clone();
            async move { registry.run_request_phase(descriptor()).await }
        });
        tokio::task::yield_now().await;
        assert!(slow.unregister());

        // The in-flight phase keeps the interceptors it started with.
        let request = running.await.unwrap().unwrap();
        assert_eq!(request.url, "http://localhost/x/tail");

        // New phases see the current registry.
        assert_eq!(registry.request_len(), 1);
    }
}
