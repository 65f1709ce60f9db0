//! Retry policy with exponential backoff.
//!
//! [`RetryPolicy`] answers two questions for the request pipeline:
//!
//! - [`is_retriable`](RetryPolicy::is_retriable): should this failure be retried?
//! - [`delay_for_attempt`](RetryPolicy::delay_for_attempt): how long to wait first?
//!
//! # Retriable Failures
//!
//! Decided in order:
//! 1. Cancellations and timeouts are never retried.
//! 2. A response whose status is in the retriable status set is retried.
//! 3. A transport failure (no response at all) is retried.
//! 4. Everything else is returned immediately.
//!
//! # Backoff
//!
//! The delay before retry `k` (zero-indexed) is `base_delay * multiplier^k`.
//! There is no jitter and no ceiling.
//!
//! # Example
//!
//! ```
//! use courier_client::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new()
//!     .max_retries(3)
//!     .base_delay(Duration::from_millis(1000))
//!     .multiplier(2.0);
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use crate::ClientError;

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Default delay before the first retry.
    pub const BASE_DELAY: Duration = Duration::from_secs(1);

    /// Default multiplier for exponential backoff.
    pub const MULTIPLIER: f64 = 2.0;

    /// Default maximum number of retry attempts.
    pub const MAX_RETRIES: u32 = 3;

    /// Default retriable response statuses.
    pub const RETRIABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];
}

/// Configuration for retry behavior.
///
/// # Default Values
///
/// - `base_delay`: 1 second
/// - `multiplier`: 2.0
/// - `max_retries`: 3
/// - `retriable_statuses`: 408, 429, 500, 502, 503, 504
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Multiplier for exponential backoff. Should be >= 1.0.
    pub multiplier: f64,

    /// Maximum number of retry attempts (not counting the initial request).
    pub max_retries: u32,

    /// Response statuses that are worth retrying.
    pub retriable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: defaults::BASE_DELAY,
            multiplier: defaults::MULTIPLIER,
            max_retries: defaults::MAX_RETRIES,
            retriable_statuses: defaults::RETRIABLE_STATUSES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Create a new RetryPolicy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a retry policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set the maximum number of retry attempts.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    ///
    /// # Panics
    ///
    /// Panics if `multiplier` is less than 1.0.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        assert!(multiplier >= 1.0, "multiplier must be >= 1.0");
        self.multiplier = multiplier;
        self
    }

    /// Replace the set of retriable statuses.
    pub fn retriable_statuses<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.retriable_statuses = statuses.into_iter().collect();
        self
    }

    /// Validate the policy configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("multiplier must be >= 1.0");
        }
        if self.retriable_statuses.iter().any(|s| !(100..=999).contains(s)) {
            return Err("retriable statuses must be valid HTTP status codes");
        }
        Ok(())
    }

    /// Returns whether `error` should be retried.
    ///
    /// This only classifies the failure; the attempt cap is checked separately
    /// with [`can_retry`](Self::can_retry).
    pub fn is_retriable(&self, error: &ClientError) -> bool {
        if error.is_cancellation() {
            return false;
        }
        match error {
            ClientError::Status { status, .. } => {
                self.retriable_statuses.contains(&status.as_u16())
            }
            ClientError::Transport(_) => true,
            _ => false,
        }
    }

    /// Returns whether another retry is allowed after `attempt` retries.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay to wait before retry number `attempt` (zero-indexed).
    ///
    /// Computed as `base_delay * multiplier^attempt`. Saturates at
    /// [`Duration::MAX`] instead of overflowing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::MAX;
        }
        Duration::from_nanos(nanos.round() as u64)
    }
}
