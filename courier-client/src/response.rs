//! Response types.

use bytes::Bytes;
use http::{HeaderMap, StatusCode, header};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ClientError;
use crate::request::ResponseType;
use crate::transport::TransportResponse;

/// Decoded response payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseData {
    Json(Value),
    Text(String),
    Bytes(Bytes),
    Empty,
}

impl ResponseData {
    /// The JSON value, if the payload is JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseData::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The text, if the payload is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseData::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// A successful response.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    /// Decoded payload.
    pub data: ResponseData,
    /// Response status (always 2xx).
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Id of the request this response answers.
    pub request_id: String,
}

impl ApiResponse {
    /// Deserialize the JSON payload into `T`.
    ///
    /// An empty payload deserializes from `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        let value = match &self.data {
            ResponseData::Json(value) => value.clone(),
            ResponseData::Empty => Value::Null,
            ResponseData::Text(text) => serde_json::from_str(text)
                .map_err(|e| ClientError::Decode(format!("response is not JSON: {}", e)))?,
            ResponseData::Bytes(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| ClientError::Decode(format!("response is not JSON: {}", e)))?,
        };
        serde_json::from_value(value)
            .map_err(|e| ClientError::Decode(format!("unexpected response shape: {}", e)))
    }

    /// Consume the response, returning the payload.
    pub fn into_data(self) -> ResponseData {
        self.data
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("json"))
}

/// Decode a 2xx body according to `response_type`.
pub(crate) fn decode_success(
    response: TransportResponse,
    response_type: ResponseType,
    request_id: &str,
) -> Result<ApiResponse, ClientError> {
    let TransportResponse {
        status,
        headers,
        body,
    } = response;

    let data = match response_type {
        _ if body.is_empty() && response_type != ResponseType::Bytes => ResponseData::Empty,
        ResponseType::Bytes => ResponseData::Bytes(body),
        ResponseType::Json => ResponseData::Json(parse_json(&body)?),
        ResponseType::Text => ResponseData::Text(parse_text(body)?),
        ResponseType::Auto if is_json(&headers) => ResponseData::Json(parse_json(&body)?),
        ResponseType::Auto => ResponseData::Text(parse_text(body)?),
    };

    Ok(ApiResponse {
        data,
        status,
        headers,
        request_id: request_id.to_owned(),
    })
}

/// Turn a non-2xx response into an HTTP status failure.
///
/// The body is parsed best-effort: JSON when it parses, the raw text
/// otherwise, and nothing when it is empty.
pub(crate) fn status_failure(response: TransportResponse) -> ClientError {
    let data = if response.body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&response.body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&response.body).into_owned())
            }),
        )
    };
    ClientError::http_status(response.status, data)
}

fn parse_json(body: &[u8]) -> Result<Value, ClientError> {
    serde_json::from_slice(body)
        .map_err(|e| ClientError::Decode(format!("invalid JSON response: {}", e)))
}

fn parse_text(body: Bytes) -> Result<String, ClientError> {
    String::from_utf8(body.to_vec())
        .map_err(|e| ClientError::Decode(format!("response is not UTF-8: {}", e)))
}
