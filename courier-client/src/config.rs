//! Client configuration.
//!
//! This module contains request-level configuration:
//! - [`RequestOptions`]: Per-request method, headers, body and timeout
//! - [`RetryPolicy`]: Retry behavior with exponential backoff
//! - [`InterceptorRegistry`]: Request/response interception
//! - [`ClientSettings`]: Every option as deserializable data

mod interceptor;
mod options;
mod retry;
mod settings;

pub use interceptor::{
    BoxFuture, HeaderInterceptor, InterceptorHandle, InterceptorRegistry, RequestFn,
    RequestInterceptor, ResponseFn, ResponseInterceptor,
};
pub use options::RequestOptions;
pub use retry::{RetryPolicy, defaults};
pub use settings::{ClientSettings, DEFAULT_TIMEOUT};
