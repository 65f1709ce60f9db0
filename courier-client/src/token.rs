//! Credential lifecycle.
//!
//! [`TokenManager`] owns the access token, the optional refresh token and the
//! access token's expiry. Records live in a [`TokenStore`] so they can outlive
//! the process; [`MemoryTokenStore`] is the default.
//!
//! Refreshing is single-flight: while a refresh is pending, every further
//! [`refresh`](TokenManager::refresh) call joins it and receives the same
//! outcome instead of starting another one.
//!
//! # Example
//!
//! ```ignore
//! use courier_client::token::{RefreshedTokens, TokenManager};
//!
//! let tokens = TokenManager::default();
//! tokens.store("access", Some("refresh"), Some(3600));
//!
//! let fresh = tokens
//!     .refresh(|refresh_token| async move {
//!         let body = call_auth_service(&refresh_token).await?;
//!         Ok(RefreshedTokens::new(body.access_token).expires_in(body.expires_in))
//!     })
//!     .await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use futures::FutureExt;
use futures::future::Shared;
use http::HeaderValue;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::ClientError;
use crate::config::BoxFuture;

/// Store keys for the three credential records.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const TOKEN_EXPIRY: &str = "token_expiry";
}

/// Tokens are treated as expired this long before their stated expiry.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Durable string key-value storage for credentials.
pub trait TokenStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// A [`TokenStore`] that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.records().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.records().insert(key.to_owned(), value);
    }

    fn remove(&self, key: &str) {
        self.records().remove(key);
    }
}

/// Result of a caller-supplied refresh operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Replaces the stored refresh token when present.
    pub refresh_token: Option<String>,
    /// Lifetime of the new access token, in seconds.
    pub expires_in: Option<u64>,
}

impl RefreshedTokens {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
        }
    }

    pub fn refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }
}

type PendingRefresh = Shared<BoxFuture<'static, Result<String, ClientError>>>;

struct Inner {
    store: Arc<dyn TokenStore>,
    pending: Mutex<Option<PendingRefresh>>,
}

/// Owns the credential record and the single-flight refresh latch.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("authenticated", &self.is_authenticated())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new(MemoryTokenStore::new())
    }
}

impl TokenManager {
    /// Create a manager over `store`.
    pub fn new<S: TokenStore>(store: S) -> Self {
        Self::with_shared_store(Arc::new(store))
    }

    /// Create a manager over a store shared with other owners.
    pub fn with_shared_store(store: Arc<dyn TokenStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                pending: Mutex::new(None),
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingRefresh>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored access token.
    pub fn access_token(&self) -> Option<String> {
        self.inner.store.get(keys::ACCESS_TOKEN)
    }

    /// The stored refresh token.
    pub fn refresh_token(&self) -> Option<String> {
        self.inner.store.get(keys::REFRESH_TOKEN)
    }

    /// Returns true if an access token is stored.
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Returns true while a refresh is pending.
    pub fn is_refreshing(&self) -> bool {
        self.pending().is_some()
    }

    /// The `Authorization` header value for the stored access token.
    pub fn access_header(&self) -> Option<HeaderValue> {
        let token = self.access_token()?;
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                Some(value)
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("stored access token is not a valid header value");
                None
            }
        }
    }

    /// When the access token expires, if known.
    ///
    /// Accepts epoch milliseconds (what [`store`](Self::store) writes), epoch
    /// seconds and RFC 3339 timestamps.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        parse_expiry(&self.inner.store.get(keys::TOKEN_EXPIRY)?)
    }

    /// Returns true if the access token is missing or expires within
    /// [`EXPIRY_BUFFER`].
    ///
    /// A token without a recorded expiry never expires.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// [`is_expired`](Self::is_expired) evaluated at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token().is_none() {
            return true;
        }
        match self.expires_at() {
            Some(expires_at) => {
                let buffer = chrono::Duration::seconds(EXPIRY_BUFFER.as_secs() as i64);
                // Too close to the start of time to subtract the buffer.
                expires_at
                    .checked_sub_signed(buffer)
                    .is_none_or(|deadline| deadline <= now)
            }
            None => false,
        }
    }

    /// Store a new credential.
    ///
    /// `refresh_token` replaces the stored one only when present.
    /// `expires_in_secs` is relative to now; `None` clears the expiry.
    pub fn store(&self, access_token: &str, refresh_token: Option<&str>, expires_in_secs: Option<u64>) {
        let store = &self.inner.store;
        store.set(keys::ACCESS_TOKEN, access_token.to_owned());
        if let Some(refresh_token) = refresh_token {
            store.set(keys::REFRESH_TOKEN, refresh_token.to_owned());
        }
        match expires_in_secs {
            Some(secs) => {
                let lifetime = i64::try_from(secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .unwrap_or(chrono::Duration::MAX);
                let expires_at = Utc::now()
                    .checked_add_signed(lifetime)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                store.set(keys::TOKEN_EXPIRY, expires_at.timestamp_millis().to_string());
            }
            None => store.remove(keys::TOKEN_EXPIRY),
        }
    }

    /// Remove every credential record.
    pub fn clear(&self) {
        let store = &self.inner.store;
        store.remove(keys::ACCESS_TOKEN);
        store.remove(keys::REFRESH_TOKEN);
        store.remove(keys::TOKEN_EXPIRY);
    }

    /// Decode the claims of a JWT-shaped token without verifying it.
    ///
    /// `None` decodes the stored access token. Anything that is not a
    /// base64url JSON object payload yields `None`.
    pub fn decode(&self, token: Option<&str>) -> Option<Map<String, Value>> {
        match token {
            Some(token) => decode_claims(token),
            None => decode_claims(&self.access_token()?),
        }
    }

    /// Refresh the access token, joining a pending refresh if there is one.
    ///
    /// `refresh_op` receives the stored refresh token and is only called when
    /// no refresh is pending. On success the result is stored and the new
    /// access token returned; on failure the stored credential is left
    /// untouched. Either way the pending marker is cleared before waiters
    /// observe the outcome.
    ///
    /// Fails with [`ClientError::NoRefreshToken`] without calling
    /// `refresh_op` when no refresh token is stored.
    pub async fn refresh<F, Fut>(&self, refresh_op: F) -> Result<String, ClientError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<RefreshedTokens, ClientError>> + Send + 'static,
    {
        // The operation is started after the latch is published and the lock
        // released, so it may call back into the manager.
        let (pending, start) = {
            let mut pending = self.pending();
            match pending.as_ref() {
                Some(shared) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("joining in-flight token refresh");
                    (shared.clone(), None)
                }
                None => {
                    let refresh_token = self.refresh_token().ok_or(ClientError::NoRefreshToken)?;

                    #[cfg(feature = "tracing")]
                    tracing::debug!("refreshing access token");

                    let (start_tx, start_rx) = oneshot::channel::<Fut>();
                    let manager = self.clone();
                    let task: BoxFuture<'static, Result<String, ClientError>> =
                        Box::pin(async move {
                            let outcome = match start_rx.await {
                                Ok(operation) => match operation.await {
                                    Ok(tokens) => {
                                        manager.store(
                                            &tokens.access_token,
                                            tokens.refresh_token.as_deref(),
                                            tokens.expires_in,
                                        );
                                        Ok(tokens.access_token)
                                    }
                                    Err(err) => Err(refresh_failure(err)),
                                },
                                Err(_) => Err(ClientError::Refresh(
                                    "refresh operation was never started".into(),
                                )),
                            };
                            *manager.pending() = None;
                            outcome
                        });
                    let shared = task.shared();
                    *pending = Some(shared.clone());
                    (shared, Some((start_tx, refresh_token)))
                }
            }
        };

        if let Some((start_tx, refresh_token)) = start {
            let _ = start_tx.send(refresh_op(refresh_token));
        }

        let outcome = pending.await;
        if let Err(_err) = &outcome {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %_err, "token refresh failed");
        }
        outcome
    }
}

fn refresh_failure(err: ClientError) -> ClientError {
    match err {
        ClientError::Refresh(_) | ClientError::NoRefreshToken => err,
        other => ClientError::Refresh(other.message()),
    }
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(number) = raw.parse::<i64>() {
        // Epoch seconds stay below 1e11 until the year 5138.
        return if number.unsigned_abs() < 100_000_000_000 {
            Utc.timestamp_opt(number, 0).single()
        } else {
            Utc.timestamp_millis_opt(number).single()
        };
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn decode_claims(token: &str) -> Option<Map<String, Value>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(claims) => Some(claims),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::Notify;

    fn jwt(claims: &Value) -> String {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig")
    }

    #[test]
    fn test_access_header() {
        let tokens = TokenManager::default();
        assert!(tokens.access_header().is_none());

        tokens.store("abc", None, None);
        assert_eq!(tokens.access_header().unwrap(), "Bearer abc");
    }

    #[test]
    fn test_store_keeps_refresh_token_when_absent() {
        let tokens = TokenManager::default();
        tokens.store("a1", Some("r1"), None);
        tokens.store("a2", None, None);
        assert_eq!(tokens.refresh_token().as_deref(), Some("r1"));
        assert_eq!(tokens.access_token().as_deref(), Some("a2"));
    }

    #[test]
    fn test_clear() {
        let tokens = TokenManager::default();
        tokens.store("a", Some("r"), Some(60));
        tokens.clear();
        assert!(!tokens.is_authenticated());
        assert!(tokens.refresh_token().is_none());
        assert!(tokens.expires_at().is_none());
    }

    #[test]
    fn test_is_expired_applies_buffer() {
        let tokens = TokenManager::default();
        assert!(tokens.is_expired(), "no token counts as expired");

        tokens.store("a", None, None);
        assert!(!tokens.is_expired(), "no expiry never expires");

        tokens.store("a", None, Some(3600));
        let expires_at = tokens.expires_at().unwrap();
        assert!(!tokens.is_expired_at(expires_at - chrono::Duration::seconds(61)));
        assert!(tokens.is_expired_at(expires_at - chrono::Duration::seconds(60)));
        assert!(tokens.is_expired_at(expires_at));
    }

    #[test]
    fn test_expiry_formats() {
        let store = Arc::new(MemoryTokenStore::new());
        let tokens = TokenManager::with_shared_store(store.clone());
        let expected = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();

        store.set(keys::TOKEN_EXPIRY, "2030-01-02T03:04:05Z".into());
        assert_eq!(tokens.expires_at(), Some(expected));

        store.set(keys::TOKEN_EXPIRY, expected.timestamp().to_string());
        assert_eq!(tokens.expires_at(), Some(expected));

        store.set(keys::TOKEN_EXPIRY, expected.timestamp_millis().to_string());
        assert_eq!(tokens.expires_at(), Some(expected));

        store.set(keys::TOKEN_EXPIRY, "next tuesday".into());
        assert_eq!(tokens.expires_at(), None);
    }

    #[test]
    fn test_out_of_range_expiry_values() {
        let store = Arc::new(MemoryTokenStore::new());
        let tokens = TokenManager::with_shared_store(store.clone());
        tokens.store("a1", None, None);

        store.set(keys::TOKEN_EXPIRY, i64::MIN.to_string());
        assert_eq!(tokens.expires_at(), None);
        assert!(!tokens.is_expired());

        let earliest = DateTime::<Utc>::MIN_UTC.timestamp_millis();
        store.set(keys::TOKEN_EXPIRY, earliest.to_string());
        assert_eq!(tokens.expires_at(), Some(DateTime::<Utc>::MIN_UTC));
        assert!(tokens.is_expired());

        store.set(keys::TOKEN_EXPIRY, DateTime::<Utc>::MIN_UTC.timestamp().to_string());
        assert!(tokens.is_expired());
    }

    #[test]
    fn test_decode_claims() {
        let tokens = TokenManager::default();
        let token = jwt(&json!({"sub": "user-1", "exp": 1_900_000_000}));

        let claims = tokens.decode(Some(&token)).unwrap();
        assert_eq!(claims["sub"], "user-1");

        tokens.store(&token, None, None);
        assert_eq!(tokens.decode(None).unwrap()["exp"], 1_900_000_000);
    }

    #[test]
    fn test_decode_never_panics() {
        let tokens = TokenManager::default();
        assert!(tokens.decode(None).is_none());
        assert!(tokens.decode(Some("")).is_none());
        assert!(tokens.decode(Some("opaque")).is_none());
        assert!(tokens.decode(Some("a.!!!.c")).is_none());
        assert!(tokens.decode(Some(&jwt(&json!([1, 2])))).is_none());

        let padded = format!("h.{}==.s", URL_SAFE_NO_PAD.encode(br#"{"a":1}"#));
        assert_eq!(tokens.decode(Some(&padded)).unwrap()["a"], 1);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let tokens = TokenManager::default();
        let calls = AtomicUsize::new(0);

        let err = tokens
            .refresh(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(RefreshedTokens::new("never")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::NoRefreshToken));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let tokens = TokenManager::default();
        // A refresh token but no access token yet.
        tokens.inner.store.set(keys::REFRESH_TOKEN, "r0".into());

        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let callers: Vec<_> = (0..5)
            .map(|_| {
                let tokens = tokens.clone();
                let calls = calls.clone();
                let release = release.clone();
                tokio::spawn(async move {
                    tokens
                        .refresh(move |refresh_token| async move {
                            assert_eq!(refresh_token, "r0");
                            calls.fetch_add(1, Ordering::SeqCst);
                            release.notified().await;
                            Ok(RefreshedTokens::new("a1").refresh_token("r1").expires_in(900))
                        })
                        .await
                })
            })
            .collect();

        while !tokens.is_refreshing() {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        release.notify_one();

        for caller in callers {
            assert_eq!(caller.await.unwrap().unwrap(), "a1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!tokens.is_refreshing());
        assert_eq!(tokens.refresh_token().as_deref(), Some("r1"));
        assert!(tokens.expires_at().is_some());
    }

    #[tokio::test]
    async fn test_refresh_operation_can_query_manager() {
        let tokens = TokenManager::default();
        tokens.store("a0", Some("r0"), None);
        let observed = Arc::new(AtomicBool::new(false));

        let access = tokens
            .refresh({
                let tokens = tokens.clone();
                let observed = observed.clone();
                move |_| {
                    observed.store(tokens.is_refreshing(), Ordering::SeqCst);
                    async { Ok(RefreshedTokens::new("a1")) }
                }
            })
            .await
            .unwrap();

        assert_eq!(access, "a1");
        assert!(observed.load(Ordering::SeqCst));
        assert!(!tokens.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_shared_and_clears_latch() {
        let tokens = TokenManager::default();
        tokens.store("a0", Some("r0"), None);
        let release = Arc::new(Notify::new());

        let first = tokio::spawn({
            let tokens = tokens.clone();
            let release = release.clone();
            async move {
                tokens
                    .refresh(move |_| async move {
                        release.notified().await;
                        Err(ClientError::Transport("auth service down".into()))
                    })
                    .await
            }
        });
        while !tokens.is_refreshing() {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let tokens = tokens.clone();
            async move {
                tokens
                    .refresh(|_| async { Ok(RefreshedTokens::new("unused")) })
                    .await
            }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        release.notify_one();

        let first = first.await.unwrap().unwrap_err();
        let second = second.await.unwrap().unwrap_err();
        assert!(matches!(first, ClientError::Refresh(ref m) if m.contains("auth service down")));
        assert_eq!(first.message(), second.message());

        assert!(!tokens.is_refreshing());
        assert_eq!(tokens.access_token().as_deref(), Some("a0"));

        // The latch is released: the next refresh runs its own operation.
        let next = tokens
            .refresh(|_| async { Ok(RefreshedTokens::new("a2")) })
            .await
            .unwrap();
        assert_eq!(next, "a2");
    }
}
