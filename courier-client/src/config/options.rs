//! Per-request options.
//!
//! [`RequestOptions`] carries everything a caller can override for a single
//! request: method, headers, query, body, timeout, request id and how to
//! read the response.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::time::Duration;
use url::form_urlencoded;

use crate::ClientError;
use crate::request::{RequestBody, ResponseType};

/// Options for configuring an individual request.
///
/// # Example
///
/// ```ignore
/// use courier_client::RequestOptions;
/// use std::time::Duration;
///
/// let options = RequestOptions::new()
///     .method(http::Method::POST)
///     .timeout(Duration::from_secs(5))
///     .header("x-request-source", "dashboard")
///     .json(&serde_json::json!({"name": "widget"}))?;
///
/// let response = client.request("/items", options).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Method; defaults to GET.
    pub(crate) method: Option<Method>,
    /// Headers merged over the client defaults.
    pub(crate) headers: HeaderMap,
    /// Pre-encoded query string.
    pub(crate) query: Option<String>,
    /// Request payload.
    pub(crate) body: RequestBody,
    /// Overrides the client's default timeout.
    pub(crate) timeout: Option<Duration>,
    /// Explicit request id; generated when absent.
    pub(crate) request_id: Option<String>,
    /// How to read the response body.
    pub(crate) response_type: ResponseType,
}

impl RequestOptions {
    /// Create new default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the timeout for each attempt of this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the configured timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Use an explicit request id instead of a generated one.
    ///
    /// The id is what [`ApiClient::cancel`](crate::ApiClient::cancel) takes.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Get the explicit request id, if any.
    pub fn get_request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Add a header for this request.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: std::fmt::Debug,
        V: TryInto<HeaderValue>,
        V::Error: std::fmt::Debug,
    {
        let name = name.try_into().expect("invalid header name");
        let value = value.try_into().expect("invalid header value");
        self.headers.insert(name, value);
        self
    }

    /// Try to add a header for this request.
    ///
    /// Returns `None` if the header name or value is invalid.
    pub fn try_header<K, V>(mut self, name: K, value: V) -> Option<Self>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name.try_into().ok()?;
        let value = value.try_into().ok()?;
        self.headers.insert(name, value);
        Some(self)
    }

    /// Set all headers for this request, replacing any existing ones.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Get the request headers.
    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Encode `params` as the query string.
    ///
    /// `params` must serialize as a struct or map; nested values use the
    /// bracket notation (`tags[0]=a`).
    pub fn query<T: Serialize>(mut self, params: &T) -> Result<Self, ClientError> {
        let encoded = serde_qs::to_string(params)
            .map_err(|e| ClientError::Encode(format!("query encoding failed: {}", e)))?;
        self.query = Some(encoded);
        Ok(self)
    }

    /// Encode a list of key/value pairs as the query string.
    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToString,
    {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            serializer.append_pair(key.as_ref(), &value.to_string());
        }
        self.query = Some(serializer.finish());
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, ClientError> {
        let value = serde_json::to_value(value)
            .map_err(|e| ClientError::Encode(format!("JSON encoding failed: {}", e)))?;
        Ok(self.body(RequestBody::Json(value)))
    }

    /// Set how the response body is read.
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }
}
