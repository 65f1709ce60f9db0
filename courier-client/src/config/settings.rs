//! Declarative client settings.
//!
//! [`ClientSettings`] mirrors every recognized configuration option as plain
//! data so it can be loaded from JSON (or any serde format) and applied with
//! [`ClientBuilder::from_settings`](crate::ClientBuilder::from_settings).
//! Missing fields take their defaults.
//!
//! ```
//! use courier_client::ClientSettings;
//!
//! let settings: ClientSettings = serde_json::from_str(r#"{
//!     "base_url": "https://api.example.com",
//!     "timeout_ms": 5000,
//!     "retriable_statuses": [503]
//! }"#).unwrap();
//!
//! assert_eq!(settings.max_retries, 3);
//! ```

use std::time::Duration;

use serde::Deserialize;

use super::retry::{RetryPolicy, defaults as retry_defaults};
use crate::realtime::{RealtimeConfig, defaults as realtime_defaults};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Every recognized client option.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientSettings {
    /// Prefix for relative request endpoints.
    pub base_url: String,
    /// Realtime channel endpoint (`ws://` or `wss://`).
    pub realtime_url: Option<String>,
    /// Per-attempt request timeout.
    pub timeout_ms: u64,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub retry_base_delay_ms: u64,
    /// Backoff multiplier.
    pub retry_multiplier: f64,
    /// Statuses worth retrying.
    pub retriable_statuses: Vec<u16>,
    /// Reconnect attempts before the channel gives up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_base_delay_ms: u64,
    /// PING interval while connected.
    pub heartbeat_interval_ms: u64,
    /// Whether the realtime channel may connect at all.
    pub realtime_enabled: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            realtime_url: None,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            max_retries: retry_defaults::MAX_RETRIES,
            retry_base_delay_ms: retry_defaults::BASE_DELAY.as_millis() as u64,
            retry_multiplier: retry_defaults::MULTIPLIER,
            retriable_statuses: retry_defaults::RETRIABLE_STATUSES.to_vec(),
            max_reconnect_attempts: realtime_defaults::MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: realtime_defaults::BASE_RECONNECT_DELAY.as_millis() as u64,
            heartbeat_interval_ms: realtime_defaults::HEARTBEAT_INTERVAL.as_millis() as u64,
            realtime_enabled: true,
        }
    }
}

impl ClientSettings {
    /// The per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The retry policy these settings describe.
    ///
    /// The policy is not validated here; the builder does that.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: self.retry_multiplier,
            max_retries: self.max_retries,
            retriable_statuses: self.retriable_statuses.iter().copied().collect(),
        }
    }

    /// The realtime configuration, if a realtime URL is set.
    pub fn realtime_config(&self) -> Option<RealtimeConfig> {
        let url = self.realtime_url.as_ref()?;
        Some(
            RealtimeConfig::new(url.clone())
                .enabled(self.realtime_enabled)
                .max_reconnect_attempts(self.max_reconnect_attempts)
                .base_reconnect_delay(Duration::from_millis(self.reconnect_base_delay_ms))
                .heartbeat_interval(Duration::from_millis(self.heartbeat_interval_ms)),
        )
    }
}
