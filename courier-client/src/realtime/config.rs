use std::time::Duration;

use url::form_urlencoded;

use super::ChannelError;

/// Default realtime values.
pub mod defaults {
    use std::time::Duration;

    /// Reconnect attempts before the channel gives up.
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

    /// Delay before the first reconnect attempt; doubles with each attempt.
    pub const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);

    /// PING interval while connected.
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
}

/// Realtime channel configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Channel endpoint.
    pub url: String,
    /// When false, `connect` does nothing.
    pub enabled: bool,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            enabled: true,
            max_reconnect_attempts: defaults::MAX_RECONNECT_ATTEMPTS,
            base_reconnect_delay: defaults::BASE_RECONNECT_DELAY,
            heartbeat_interval: defaults::HEARTBEAT_INTERVAL,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn base_reconnect_delay(mut self, delay: Duration) -> Self {
        self.base_reconnect_delay = delay;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ChannelError::InvalidConfig(format!(
                "realtime url must use ws:// or wss://, got {:?}",
                self.url
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ChannelError::InvalidConfig(
                "heartbeat interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// `base * 2^(attempt - 1)`, saturating.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_reconnect_delay.saturating_mul(factor)
    }

    /// The endpoint for `site_id`, form-encoded into the query.
    pub fn url_for_site(&self, site_id: &str) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("siteId", site_id)
            .finish();
        format!("{}{}{}", self.url, separator, query)
    }
}
