//! Request descriptors.
//!
//! A [`RequestDescriptor`] is the fully resolved form of one request attempt:
//! target URL, method, headers, body and deadline. Request interceptors
//! receive and return descriptors; the transport receives the HTTP request
//! built from one.

mod form;

pub use form::{Form, Part};

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, header};
use serde_json::Value;

use crate::ClientError;
use crate::transport::TransportBody;

/// Request payload.
#[derive(Clone, Debug, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// A JSON document.
    Json(Value),
    /// Plain text.
    Text(String),
    /// Raw bytes with an optional content type.
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
    /// A `multipart/form-data` upload.
    Multipart(Form),
}

impl RequestBody {
    /// Returns true if there is no body.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// The content type implied by the body, if any.
    ///
    /// JSON bodies return `None`: JSON is the client default.
    fn implied_content_type(&self) -> Option<String> {
        match self {
            RequestBody::Empty | RequestBody::Json(_) => None,
            RequestBody::Text(_) => Some("text/plain; charset=utf-8".to_owned()),
            RequestBody::Bytes { content_type, .. } => content_type.clone(),
            RequestBody::Multipart(form) => Some(form.content_type()),
        }
    }

    fn encode(&self) -> Result<Bytes, ClientError> {
        match self {
            RequestBody::Empty => Ok(Bytes::new()),
            RequestBody::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| ClientError::Encode(format!("JSON encoding failed: {}", e))),
            RequestBody::Text(text) => Ok(Bytes::from(text.clone())),
            RequestBody::Bytes { data, .. } => Ok(data.clone()),
            RequestBody::Multipart(form) => Ok(form.encode()),
        }
    }
}

/// How to interpret a successful response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseType {
    /// JSON when the response declares a JSON content type, text otherwise.
    #[default]
    Auto,
    /// Always parse as JSON.
    Json,
    /// Always read as UTF-8 text.
    Text,
    /// Keep the raw bytes.
    Bytes,
}

/// One resolved request attempt.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    /// Identifier shared by every attempt of the same request.
    pub id: String,
    /// Absolute target URL (base URL joined with the endpoint, plus query).
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request payload.
    pub body: RequestBody,
    /// Deadline for this attempt.
    pub timeout: Duration,
    /// Zero-based attempt number.
    pub attempt: u32,
    /// How to read the response body.
    pub response_type: ResponseType,
}

impl RequestDescriptor {
    /// Get a mutable reference to the headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set a header, replacing any previous value.
    pub fn set_header(&mut self, name: header::HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Build the HTTP request handed to the transport.
    ///
    /// A content type implied by the body (text, multipart, raw bytes) takes
    /// precedence over the JSON default unless the caller or an interceptor
    /// set a different one explicitly.
    pub fn to_http(&self) -> Result<http::Request<TransportBody>, ClientError> {
        let body = self.body.encode()?;

        let mut headers = self.headers.clone();
        if let Some(implied) = self.body.implied_content_type() {
            let is_default_json = headers
                .get(header::CONTENT_TYPE)
                .is_none_or(|v| v.as_bytes().starts_with(b"application/json"));
            if is_default_json {
                let value = HeaderValue::from_str(&implied).map_err(|e| {
                    ClientError::Protocol(format!("invalid content type {implied:?}: {e}"))
                })?;
                headers.insert(header::CONTENT_TYPE, value);
            }
        }
        // Bodiless requests drop the JSON default but keep any other type.
        if self.body.is_empty()
            && headers
                .get(header::CONTENT_TYPE)
                .is_some_and(|v| v.as_bytes() == DEFAULT_CONTENT_TYPE.as_bytes())
        {
            headers.remove(header::CONTENT_TYPE);
        }

        let mut request = http::Request::builder()
            .method(self.method.clone())
            .uri(&self.url)
            .body(if body.is_empty() {
                TransportBody::empty()
            } else {
                TransportBody::full(body)
            })
            .map_err(|e| ClientError::Protocol(format!("failed to build request: {}", e)))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

/// Content type every request starts with.
pub(crate) const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Join a base URL and an endpoint.
///
/// Absolute endpoints (`http://`, `https://`) are used unchanged.
pub(crate) fn join_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_owned();
    }
    if base_url.is_empty() {
        return endpoint.to_owned();
    }
    let endpoint = endpoint.strip_prefix('/').unwrap_or(endpoint);
    if endpoint.is_empty() {
        return base_url.to_owned();
    }
    format!("{}/{}", base_url, endpoint)
}

/// Append an encoded query string to `url`.
pub(crate) fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_owned();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}
