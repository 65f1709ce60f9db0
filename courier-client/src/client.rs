//! Request pipeline.
//!
//! This module provides [`ApiClient`], which runs every request through the
//! same pipeline:
//!
//! 1. register a cancel token under the request id
//! 2. build a [`RequestDescriptor`] from the client defaults and the caller's
//!    [`RequestOptions`], then run the request interceptors
//! 3. dispatch it, racing the transport against the per-attempt timeout and
//!    the cancel token
//! 4. on a retriable failure, back off and go to step 2 with the same id and
//!    the next attempt number
//! 5. run the success or error interceptors and return
//!
//! The registry entry is removed on every exit path, including the request
//! future being dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderValue, Method, header};
use serde::Serialize;
#[cfg(feature = "tracing")]
use tracing::Instrument;

use crate::ClientError;
use crate::builder::ClientBuilder;
use crate::cancel::{CancelReason, CancelToken, CancellationRegistry, RegistrationGuard};
use crate::config::{
    InterceptorHandle, InterceptorRegistry, RequestFn, RequestOptions, ResponseFn, RetryPolicy,
};
use crate::realtime::RealtimeManager;
use crate::request::{
    DEFAULT_CONTENT_TYPE, Form, RequestBody, RequestDescriptor, append_query, join_url,
};
use crate::response::{ApiResponse, decode_success, status_failure};
use crate::token::TokenManager;
use crate::transport::Transport;

pub(crate) struct ClientInner {
    pub(crate) base_url: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) default_headers: HeaderMap,
    pub(crate) default_timeout: Duration,
    pub(crate) retry: RetryPolicy,
    pub(crate) interceptors: InterceptorRegistry,
    pub(crate) cancellations: CancellationRegistry,
    pub(crate) tokens: TokenManager,
    pub(crate) realtime: Option<RealtimeManager>,
}

/// HTTP API client.
///
/// Clones share the same transport, registries, credentials and realtime
/// channel. Separate clients built with [`ApiClient::builder`] share nothing.
///
/// # Example
///
/// ```ignore
/// use courier_client::{ApiClient, RequestOptions};
/// use std::time::Duration;
///
/// let client = ApiClient::builder("https://api.example.com")
///     .timeout(Duration::from_secs(10))
///     .build()?;
///
/// let users = client.get("/users").await?;
/// let created = client.post("/users", &serde_json::json!({"name": "Ada"})).await?;
///
/// let report = client
///     .request("/reports/42", RequestOptions::new().request_id("report-42"))
///     .await;
/// ```
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .field("default_timeout", &self.inner.default_timeout)
            .field("retry", &self.inner.retry)
            .field("interceptors", &self.inner.interceptors)
            .field("in_flight", &self.inner.cancellations.in_flight())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a new ClientBuilder with the given base URL.
    pub fn builder<S: Into<String>>(base_url: S) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub(crate) fn from_inner(inner: ClientInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Get the default per-attempt timeout.
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Get the retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// The interceptor registry.
    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.inner.interceptors
    }

    /// The credential manager used for the `Authorization` header.
    pub fn tokens(&self) -> &TokenManager {
        &self.inner.tokens
    }

    /// The realtime channel, if one was configured.
    pub fn realtime(&self) -> Option<&RealtimeManager> {
        self.inner.realtime.as_ref()
    }

    /// Register an async request interceptor.
    pub fn add_request_interceptor<F, Fut>(&self, interceptor: F) -> InterceptorHandle
    where
        F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RequestDescriptor, ClientError>> + Send + 'static,
    {
        self.inner.interceptors.add_request(RequestFn::new(interceptor))
    }

    /// Register an async response interceptor pair.
    pub fn add_response_interceptor<S, SFut, E, EFut>(
        &self,
        on_success: S,
        on_error: E,
    ) -> InterceptorHandle
    where
        S: Fn(ApiResponse) -> SFut + Send + Sync + 'static,
        SFut: Future<Output = Result<ApiResponse, ClientError>> + Send + 'static,
        E: Fn(ClientError) -> EFut + Send + Sync + 'static,
        EFut: Future<Output = ClientError> + Send + 'static,
    {
        self.inner
            .interceptors
            .add_response(ResponseFn::new(on_success, on_error))
    }

    /// Cancel the in-flight request `request_id`.
    ///
    /// Unknown ids are ignored. Returns whether a request was cancelled.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.inner.cancellations.cancel(request_id)
    }

    /// Cancel every in-flight request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.inner.cancellations.cancel_all()
    }

    /// Number of in-flight requests.
    pub fn in_flight(&self) -> usize {
        self.inner.cancellations.in_flight()
    }

    /// Returns true if `request_id` is in flight.
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.inner.cancellations.is_pending(request_id)
    }

    // ========================================================================
    // Verbs
    // ========================================================================

    /// `GET endpoint`.
    pub async fn get(&self, endpoint: &str) -> Result<ApiResponse, ClientError> {
        self.request(endpoint, RequestOptions::new()).await
    }

    /// `POST endpoint` with a JSON body.
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<ApiResponse, ClientError> {
        let options = RequestOptions::new().method(Method::POST).json(body)?;
        self.request(endpoint, options).await
    }

    /// `PUT endpoint` with a JSON body.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<ApiResponse, ClientError> {
        let options = RequestOptions::new().method(Method::PUT).json(body)?;
        self.request(endpoint, options).await
    }

    /// `PATCH endpoint` with a JSON body.
    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<ApiResponse, ClientError> {
        let options = RequestOptions::new().method(Method::PATCH).json(body)?;
        self.request(endpoint, options).await
    }

    /// `DELETE endpoint`.
    pub async fn delete(&self, endpoint: &str) -> Result<ApiResponse, ClientError> {
        self.request(endpoint, RequestOptions::new().method(Method::DELETE))
            .await
    }

    /// `POST endpoint` with a `multipart/form-data` body.
    pub async fn upload(&self, endpoint: &str, form: Form) -> Result<ApiResponse, ClientError> {
        let options = RequestOptions::new()
            .method(Method::POST)
            .body(RequestBody::Multipart(form));
        self.request(endpoint, options).await
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// Perform a request.
    ///
    /// Transport failures and retriable statuses are retried according to the
    /// client's [`RetryPolicy`]. Cancellation and timeouts are never retried
    /// and skip the error interceptors. Every other terminal failure passes
    /// through the error interceptors before it is returned.
    pub async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        let request_id = options
            .request_id
            .clone()
            .unwrap_or_else(generate_request_id);
        let method = options.method.clone().unwrap_or(Method::GET);

        #[cfg(feature = "tracing")]
        let span = tracing::info_span!(
            "http.request",
            request.id = %request_id,
            http.method = %method,
            url = %endpoint,
            otel.kind = "client",
        );

        let pipeline = self.run(endpoint, options, request_id, method);

        #[cfg(feature = "tracing")]
        let pipeline = pipeline.instrument(span);

        pipeline.await
    }

    async fn run(
        &self,
        endpoint: &str,
        options: RequestOptions,
        request_id: String,
        method: Method,
    ) -> Result<ApiResponse, ClientError> {
        let inner = &self.inner;
        let token = inner.cancellations.register(&request_id);
        let _registration = RegistrationGuard::new(&inner.cancellations, token.clone());

        let mut url = join_url(&inner.base_url, endpoint);
        if let Some(query) = &options.query {
            url = append_query(&url, query);
        }
        let timeout = options.timeout.unwrap_or(inner.default_timeout);

        let mut attempt = 0;
        loop {
            let descriptor = self.descriptor(&request_id, &url, &method, &options, timeout, attempt);
            // Request interceptor failures abort without retrying.
            let descriptor = match inner.interceptors.run_request_phase(descriptor).await {
                Ok(descriptor) => descriptor,
                Err(_) if token.is_cancelled() => return Err(token.error()),
                Err(error) if error.is_cancellation() => return Err(error),
                Err(error) => return Err(inner.interceptors.run_error_phase(error).await),
            };
            let outcome = self.attempt(descriptor, &token).await;
            // Nothing resolves after its token fired.
            let outcome = if token.is_cancelled() {
                Err(token.error())
            } else {
                outcome
            };

            let error = match outcome {
                Ok(response) => {
                    let result = inner.interceptors.run_success_phase(response).await;
                    if token.is_cancelled() {
                        return Err(token.error());
                    }
                    return match result {
                        Ok(response) => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(status = response.status.as_u16(), attempt, "request succeeded");
                            Ok(response)
                        }
                        Err(error) => Err(inner.interceptors.run_error_phase(error).await),
                    };
                }
                Err(error) => error,
            };

            if error.is_cancellation() {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %error, attempt, "request cancelled");
                return Err(error);
            }

            if inner.retry.is_retriable(&error) && inner.retry.can_retry(attempt) {
                let delay = inner.retry.delay_for_attempt(attempt);
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    error = %error,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying request"
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(token.error()),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
                continue;
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(error = %error, kind = %error.kind(), attempt, "request failed");
            return Err(inner.interceptors.run_error_phase(error).await);
        }
    }

    /// One dispatch: transport, then response decoding.
    async fn attempt(
        &self,
        descriptor: RequestDescriptor,
        token: &CancelToken,
    ) -> Result<ApiResponse, ClientError> {
        if token.is_cancelled() {
            return Err(token.error());
        }
        let request = descriptor.to_http()?;
        let timeout = descriptor.timeout;

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(token.error()),
            result = self.inner.transport.dispatch(request, token.clone()) => result?,
            _ = tokio::time::sleep(timeout) => {
                token.cancel(CancelReason::Timeout(timeout));
                return Err(token.error());
            }
        };

        if !response.status.is_success() {
            return Err(status_failure(response));
        }
        decode_success(response, descriptor.response_type, &descriptor.id)
    }

    fn descriptor(
        &self,
        request_id: &str,
        url: &str,
        method: &Method,
        options: &RequestOptions,
        timeout: Duration,
        attempt: u32,
    ) -> RequestDescriptor {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
        );
        if let Some(authorization) = self.inner.tokens.access_header() {
            headers.insert(header::AUTHORIZATION, authorization);
        }
        merge_headers(&mut headers, &self.inner.default_headers);
        merge_headers(&mut headers, &options.headers);

        RequestDescriptor {
            id: request_id.to_owned(),
            url: url.to_owned(),
            method: method.clone(),
            headers,
            body: options.body.clone(),
            timeout,
            attempt,
            response_type: options.response_type,
        }
    }
}

/// Replace every header named in `overrides`, keeping all of its values.
fn merge_headers(target: &mut HeaderMap, overrides: &HeaderMap) {
    for name in overrides.keys() {
        target.remove(name);
    }
    for (name, value) in overrides {
        target.append(name.clone(), value.clone());
    }
}

fn generate_request_id() -> String {
    format!("req-{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::StatusCode;
    use serde_json::{Value, json};
    use tokio::time::Instant;

    use crate::config::BoxFuture;
    use crate::response::ResponseData;
    use crate::transport::{TransportBody, TransportResponse};

    enum Step {
        Respond(u16, Value),
        Fail(&'static str),
        /// Never responds; resolves only when the token fires.
        Hang,
    }

    struct Dispatched {
        at: Instant,
        request: http::Request<TransportBody>,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        dispatched: Mutex<Vec<Dispatched>>,
    }

    impl ScriptedTransport {
        fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into_iter().collect()),
                dispatched: Mutex::default(),
            })
        }

        fn count(&self) -> usize {
            self.dispatched.lock().unwrap().len()
        }

        fn gaps(&self) -> Vec<Duration> {
            let dispatched = self.dispatched.lock().unwrap();
            dispatched.windows(2).map(|w| w[1].at - w[0].at).collect()
        }

        fn header(&self, n: usize, name: &str) -> Option<String> {
            self.dispatched.lock().unwrap()[n]
                .request
                .headers()
                .get(name)
                .map(|v| v.to_str().unwrap().to_owned())
        }
    }

    impl Transport for ScriptedTransport {
        fn dispatch(
            &self,
            request: http::Request<TransportBody>,
            cancel: CancelToken,
        ) -> BoxFuture<'static, Result<TransportResponse, ClientError>> {
            self.dispatched.lock().unwrap().push(Dispatched {
                at: Instant::now(),
                request,
            });
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Hang);
            Box::pin(async move {
                match step {
                    Step::Respond(status, body) => {
                        let mut headers = HeaderMap::new();
                        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                        Ok(TransportResponse {
                            status: StatusCode::from_u16(status).unwrap(),
                            headers,
                            body: Bytes::from(body.to_string()),
                        })
                    }
                    Step::Fail(message) => Err(ClientError::Transport(message.into())),
                    Step::Hang => {
                        cancel.cancelled().await;
                        Err(cancel.error())
                    }
                }
            })
        }
    }

    fn client(transport: Arc<ScriptedTransport>, retry: RetryPolicy) -> ApiClient {
        ApiClient::builder("http://api.test")
            .transport_arc(transport)
            .retry_policy(retry)
            .build()
            .unwrap()
    }

    fn backoff() -> RetryPolicy {
        RetryPolicy::new()
            .base_delay(Duration::from_millis(1000))
            .multiplier(2.0)
            .max_retries(3)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_statuses_with_backoff() {
        let transport = ScriptedTransport::new([
            Step::Respond(503, json!({})),
            Step::Respond(503, json!({})),
            Step::Respond(200, json!({"ok": true})),
        ]);
        let client = client(transport.clone(), backoff());

        let response = client.get("/flaky").await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.data, ResponseData::Json(json!({"ok": true})));
        assert_eq!(transport.count(), 3);
        assert_eq!(
            transport.gaps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_cancellation_and_not_retried() {
        let transport = ScriptedTransport::new([Step::Hang]);
        let client = client(transport.clone(), backoff());

        let started = Instant::now();
        let err = client
            .request("/slow", RequestOptions::new().timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Timeout { timeout, .. } if timeout == Duration::from_millis(100)));
        assert!(err.is_cancellation());
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(transport.count(), 1);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_cancel() {
        let transport = ScriptedTransport::new([Step::Hang]);
        let client = client(transport.clone(), backoff());

        let pending = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .request("/slow", RequestOptions::new().request_id("job-1"))
                    .await
            }
        });
        while !client.is_pending("job-1") || transport.count() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(client.cancel("job-1"));
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Canceled { ref request_id } if request_id == "job-1"));
        assert_eq!(transport.count(), 1);
        assert!(!client.is_pending("job-1"));
        assert!(!client.cancel("job-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retries() {
        let transport = ScriptedTransport::new([Step::Respond(503, json!({}))]);
        let client = client(transport.clone(), backoff());

        let pending = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .request("/flaky", RequestOptions::new().request_id("job-2"))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.count(), 1);

        client.cancel("job-2");
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Canceled { .. }));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let transport = ScriptedTransport::new([Step::Hang, Step::Hang]);
        let client = client(transport.clone(), backoff());

        let a = tokio::spawn({
            let client = client.clone();
            async move { client.get("/a").await }
        });
        let b = tokio::spawn({
            let client = client.clone();
            async move { client.get("/b").await }
        });
        while transport.count() < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(client.cancel_all(), 2);
        assert!(a.await.unwrap().unwrap_err().is_cancellation());
        assert!(b.await.unwrap().unwrap_err().is_cancellation());
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_surface_last_error() {
        let transport = ScriptedTransport::new([
            Step::Respond(503, json!({})),
            Step::Respond(502, json!({})),
            Step::Respond(503, json!({"message": "still down"})),
        ]);
        let client = client(transport.clone(), backoff().max_retries(2));

        let err = client.get("/down").await.unwrap_err();
        assert_eq!(transport.count(), 3);
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(err.message(), "still down");
        assert_eq!(err.name(), "HttpStatusFailure");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retriable_status_fails_immediately() {
        let transport = ScriptedTransport::new([Step::Respond(
            404,
            json!({"message": "no such user"}),
        )]);
        let client = client(transport.clone(), backoff());

        let err = client.get("/users/9").await.unwrap_err();
        assert_eq!(transport.count(), 1);
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.data(), Some(&json!({"message": "no such user"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_retried() {
        let transport = ScriptedTransport::new([
            Step::Fail("connection refused"),
            Step::Respond(200, json!([1, 2])),
        ]);
        let client = client(transport.clone(), backoff());

        let response = client.get("/items").await.unwrap();
        assert_eq!(response.data, ResponseData::Json(json!([1, 2])));
        assert_eq!(transport.gaps(), vec![Duration::from_millis(1000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_descriptor_headers_and_attempts() {
        let transport = ScriptedTransport::new([
            Step::Respond(500, json!({})),
            Step::Respond(200, json!({})),
        ]);
        let client = ApiClient::builder("http://api.test/")
            .transport_arc(transport.clone())
            .retry_policy(backoff())
            .user_agent("courier-test/1.0")
            .build()
            .unwrap();
        client.tokens().store("tok", None, None);

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let _seen = client.add_request_interceptor({
            let attempts = attempts.clone();
            move |request: RequestDescriptor| {
                attempts.lock().unwrap().push((request.id.clone(), request.attempt));
                async move { Ok(request) }
            }
        });

        client
            .request(
                "/users",
                RequestOptions::new()
                    .request_id("r-1")
                    .header("x-trace", "abc")
                    .query(&json!({"page": 2}))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            *attempts.lock().unwrap(),
            vec![("r-1".to_owned(), 0), ("r-1".to_owned(), 1)]
        );
        assert_eq!(transport.header(0, "authorization").as_deref(), Some("Bearer tok"));
        assert_eq!(transport.header(0, "user-agent").as_deref(), Some("courier-test/1.0"));
        assert_eq!(transport.header(0, "x-trace").as_deref(), Some("abc"));
        // Bodiless requests carry no content type.
        assert_eq!(transport.header(0, "content-type"), None);
        let uri = transport.dispatched.lock().unwrap()[1].request.uri().to_string();
        assert_eq!(uri, "http://api.test/users?page=2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_sends_json() {
        let transport = ScriptedTransport::new([Step::Respond(201, json!({"id": 1}))]);
        let client = client(transport.clone(), backoff());

        let response = client.post("/items", &json!({"name": "widget"})).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(transport.header(0, "content-type").as_deref(), Some("application/json"));
        assert_eq!(transport.dispatched.lock().unwrap()[0].request.method(), Method::POST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_interceptors_rewrite_failures() {
        let transport = ScriptedTransport::new([Step::Respond(401, json!({}))]);
        let client = client(transport, backoff());

        let _auth = client.add_response_interceptor(
            |response: ApiResponse| async move { Ok(response) },
            |error: ClientError| async move {
                if error.status() == Some(StatusCode::UNAUTHORIZED) {
                    ClientError::Interceptor("session expired".into())
                } else {
                    error
                }
            },
        );

        let err = client.get("/me").await.unwrap_err();
        assert!(matches!(err, ClientError::Interceptor(ref m) if m == "session expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_skips_error_interceptors() {
        let transport = ScriptedTransport::new([Step::Hang]);
        let client = client(transport, backoff());

        let _rewrite = client.add_response_interceptor(
            |response: ApiResponse| async move { Ok(response) },
            |_error: ClientError| async move { ClientError::Interceptor("rewritten".into()) },
        );

        let err = client
            .request("/slow", RequestOptions::new().timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_interceptor_transforms_response() {
        let transport = ScriptedTransport::new([Step::Respond(200, json!({"data": {"id": 3}}))]);
        let client = client(transport, backoff());

        let _unwrap = client.add_response_interceptor(
            |mut response: ApiResponse| async move {
                response.data = match response.data {
                    ResponseData::Json(Value::Object(mut body)) => {
                        ResponseData::Json(body.remove("data").unwrap_or_default())
                    }
                    other => other,
                };
                Ok(response)
            },
            |error: ClientError| async move { error },
        );

        let response = client.get("/items/3").await.unwrap();
        assert_eq!(response.data, ResponseData::Json(json!({"id": 3})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_interceptor_failure_is_not_retried() {
        let transport = ScriptedTransport::new([]);
        let client = client(transport.clone(), backoff());

        let _deny = client.add_request_interceptor(|_request: RequestDescriptor| async {
            Err(ClientError::Interceptor("blocked".into()))
        });

        let err = client.get("/x").await.unwrap_err();
        assert!(matches!(err, ClientError::Interceptor(_)));
        assert_eq!(transport.count(), 0);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_clears_registry() {
        let transport = ScriptedTransport::new([Step::Hang]);
        let client = client(transport.clone(), backoff());

        let pending = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .request("/slow", RequestOptions::new().request_id("gone"))
                    .await
            }
        });
        while transport.count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(client.is_pending("gone"));

        pending.abort();
        let _ = pending.await;
        assert!(!client.is_pending("gone"));
    }

    #[test]
    fn test_generated_request_ids_are_unique() {
        assert_ne!(generate_request_id(), generate_request_id());
        assert!(generate_request_id().starts_with("req-"));
    }

    #[test]
    fn test_merge_headers_replaces_names() {
        let mut target = HeaderMap::new();
        target.insert("x-a", HeaderValue::from_static("1"));
        target.insert("x-b", HeaderValue::from_static("keep"));
        let mut overrides = HeaderMap::new();
        overrides.append("x-a", HeaderValue::from_static("2"));
        overrides.append("x-a", HeaderValue::from_static("3"));

        merge_headers(&mut target, &overrides);
        let values: Vec<_> = target.get_all("x-a").iter().collect();
        assert_eq!(values, vec!["2", "3"]);
        assert_eq!(target["x-b"], "keep");
    }
}
