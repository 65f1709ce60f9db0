//! Cooperative request cancellation.
//!
//! Every in-flight request owns a [`CancelToken`]. The token is registered in
//! the client's [`CancellationRegistry`] under the request id so callers can
//! cancel one request with [`cancel`](CancellationRegistry::cancel) or every
//! request with [`cancel_all`](CancellationRegistry::cancel_all).
//!
//! Cancellation is a signal, not a forced stop: the transport watches the
//! token and surfaces a cancellation failure as soon as it fires. A timeout is
//! the same signal with a different [`CancelReason`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ClientError;

/// Why a token was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel(id)` or `cancel_all()` was called.
    Requested,
    /// The per-attempt deadline elapsed.
    Timeout(Duration),
}

/// State carried by a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelState {
    Active,
    Cancelled(CancelReason),
}

/// A cancellation signal tied to one request id.
///
/// Clones share the same signal. The first reason to fire wins; later calls
/// to [`cancel`](Self::cancel) are ignored.
#[derive(Clone, Debug)]
pub struct CancelToken {
    request_id: Arc<str>,
    signal: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelToken {
    /// Create an active token for `request_id`.
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: Arc::from(request_id),
            signal: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// The request id this token belongs to.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Fire the signal. Returns false if it had already fired.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        // The reason is recorded before waiters are woken.
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.signal.cancel();
        true
    }

    /// Current state.
    pub fn state(&self) -> CancelState {
        match self.reason() {
            Some(reason) => CancelState::Cancelled(reason),
            None => CancelState::Active,
        }
    }

    /// The reason, once cancelled.
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Returns true once the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Wait until the signal fires.
    pub async fn cancelled(&self) -> CancelReason {
        self.signal.cancelled().await;
        self.reason().unwrap_or(CancelReason::Requested)
    }

    /// The failure a cancelled request surfaces.
    ///
    /// An active token yields a plain `Canceled` error.
    pub fn error(&self) -> ClientError {
        let request_id = self.request_id.to_string();
        match self.reason() {
            Some(CancelReason::Timeout(timeout)) => ClientError::Timeout {
                request_id,
                timeout,
            },
            Some(CancelReason::Requested) | None => ClientError::Canceled { request_id },
        }
    }

    fn same_signal(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }
}

/// Registry mapping request ids to their cancel tokens.
///
/// At most one token exists per id at a time.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: Mutex<HashMap<String, CancelToken>>,
}

impl CancellationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CancelToken>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh token for `request_id`.
    ///
    /// An existing entry with the same id is replaced and its token is
    /// cancelled, so no in-flight request is left unreachable.
    pub fn register(&self, request_id: &str) -> CancelToken {
        let token = CancelToken::new(request_id);
        let previous = self.entries().insert(request_id.to_owned(), token.clone());
        if let Some(previous) = previous {
            #[cfg(feature = "tracing")]
            tracing::warn!(request.id = %request_id, "cancelling replaced in-flight request");
            previous.cancel(CancelReason::Requested);
        }
        token
    }

    /// Cancel the request registered under `request_id` and remove it.
    ///
    /// Unknown ids are ignored. Returns whether an entry was found.
    pub fn cancel(&self, request_id: &str) -> bool {
        let token = self.entries().remove(request_id);
        match token {
            Some(token) => {
                token.cancel(CancelReason::Requested);
                true
            }
            None => false,
        }
    }

    /// Cancel every registered request and clear the registry.
    ///
    /// Returns the number of requests cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<CancelToken> = self.entries().drain().map(|(_, token)| token).collect();
        for token in &drained {
            token.cancel(CancelReason::Requested);
        }
        drained.len()
    }

    /// Remove the entry for `token`, if it is still the registered one.
    pub fn complete(&self, token: &CancelToken) {
        let mut entries = self.entries();
        if entries
            .get(token.request_id())
            .is_some_and(|current| current.same_signal(token))
        {
            entries.remove(token.request_id());
        }
    }

    /// Returns true if `request_id` has a registered entry.
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.entries().contains_key(request_id)
    }

    /// Number of registered entries.
    pub fn in_flight(&self) -> usize {
        self.entries().len()
    }
}

/// Removes a token from its registry when dropped.
///
/// Held for the whole lifetime of a request so the entry is cleared on every
/// exit path, including the request future being dropped.
pub(crate) struct RegistrationGuard<'a> {
    registry: &'a CancellationRegistry,
    token: CancelToken,
}

impl<'a> RegistrationGuard<'a> {
    pub(crate) fn new(registry: &'a CancellationRegistry, token: CancelToken) -> Self {
        Self { registry, token }
    }
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.registry.complete(&self.token);
    }
}
