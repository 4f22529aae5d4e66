//! Installation access token and its cache
//!
//! The cache serialises refreshes: one lock covers the freshness check, the
//! refresh and the store, so at most one exchange is in flight per cache and
//! callers queued behind it observe either the refreshed token or the error
//! of the attempt they waited on.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens expiring within this many seconds are refreshed before use
pub const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

/// Installation access token as returned by the exchange endpoint
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// True when the token outlives `now + skew`
    pub fn is_fresh_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at > now + skew
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Guarded cache contents
#[derive(Default)]
struct CacheState {
    token: Option<AccessToken>,
    /// Last refresh attempt, numbered by completion, if it failed
    failure: Option<(u64, Arc<Error>)>,
}

/// Most recent access token for one installation
pub struct TokenCache {
    state: Mutex<CacheState>,
    /// Refresh attempts finished so far; only bumped under the lock
    completed: AtomicU64,
    skew: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    /// Empty cache with the default 60 second skew window
    pub fn new() -> Self {
        Self::with_skew(Duration::seconds(TOKEN_EXPIRY_SKEW_SECS))
    }

    pub fn with_skew(skew: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            completed: AtomicU64::new(0),
            skew,
        }
    }

    /// Return the cached token if it is fresh, otherwise run `refresh` and
    /// store its result.
    ///
    /// `clock` is read once the lock is held, and its value is what the
    /// freshness check and `refresh` see. The lock is held for the whole
    /// refresh. When a refresh fails, every caller that was already waiting
    /// gets that failure instead of starting its own exchange; callers that
    /// arrive afterwards try again. The cached token is left as it was.
    pub async fn get_valid_token<C, F, Fut>(&self, clock: C, refresh: F) -> Result<AccessToken>
    where
        C: FnOnce() -> DateTime<Utc>,
        F: FnOnce(DateTime<Utc>) -> Fut,
        Fut: Future<Output = Result<AccessToken>>,
    {
        let seen = self.completed.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;
        let now = clock();

        if let Some(token) = state.token.as_ref() {
            if token.is_fresh_at(now, self.skew) {
                return Ok(token.clone());
            }
            debug!(expires_at = %token.expires_at, "Cached token inside skew window");
        }

        if let Some((attempt, err)) = state.failure.as_ref() {
            if *attempt > seen {
                debug!(attempt, "Refresh failed while waiting");
                return Err(Error::replay(err));
            }
        }

        let result = refresh(now).await;
        let attempt = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        match result {
            Ok(fresh) => {
                state.token = Some(fresh.clone());
                state.failure = None;
                Ok(fresh)
            }
            Err(err) => {
                let err = Arc::new(err);
                let replayed = Error::replay(&err);
                state.failure = Some((attempt, err));
                Err(replayed)
            }
        }
    }

    /// Snapshot of the cached token
    pub async fn cached(&self) -> Option<AccessToken> {
        self.state.lock().await.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn token_expiring_in(now: DateTime<Utc>, secs: i64, value: &str) -> AccessToken {
        AccessToken::new(value, now + Duration::seconds(secs))
    }

    #[test]
    fn test_freshness_respects_skew() {
        let now = Utc::now();
        let skew = Duration::seconds(TOKEN_EXPIRY_SKEW_SECS);

        assert!(token_expiring_in(now, 3600, "a").is_fresh_at(now, skew));
        assert!(!token_expiring_in(now, 30, "a").is_fresh_at(now, skew));
        // Exactly at the edge is not fresh
        assert!(!token_expiring_in(now, 60, "a").is_fresh_at(now, skew));
        assert!(token_expiring_in(now, 61, "a").is_fresh_at(now, skew));
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = token_expiring_in(Utc::now(), 3600, "abc123");
        let printed = format!("{:?}", token);
        assert!(!printed.contains("abc123"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_exchange_body() {
        let token: AccessToken =
            serde_json::from_str(r#"{"token":"abc123","expires_at":"2030-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(token.token, "abc123");
        assert_eq!(token.expires_at.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_fresh_token_is_reused_without_refresh() {
        let cache = TokenCache::new();
        let now = Utc::now();
        let refreshes = AtomicUsize::new(0);

        for offset in [0, 10, 600, 3500] {
            let token = cache
                .get_valid_token(|| now + Duration::seconds(offset), |_| async {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok(token_expiring_in(now, 3600, "abc123"))
                })
                .await
                .unwrap();
            assert_eq!(token.token, "abc123");
        }

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_inside_skew_window_is_refreshed() {
        let cache = TokenCache::new();
        let now = Utc::now();

        cache
            .get_valid_token(|| now, |_| async { Ok(token_expiring_in(now, 30, "stale")) })
            .await
            .unwrap();

        let token = cache
            .get_valid_token(|| now, |_| async { Ok(token_expiring_in(now, 3600, "fresh")) })
            .await
            .unwrap();

        assert_eq!(token.token, "fresh");
        assert_eq!(cache.cached().await.unwrap().token, "fresh");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_state() {
        let cache = TokenCache::new();
        let now = Utc::now();

        let err = cache
            .get_valid_token(|| now, |_| async {
                Err(Error::Exchange {
                    status: 500,
                    body: r#"{"error":"boom"}"#.to_string(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.exchange_status(), Some(500));
        assert!(cache.cached().await.is_none());

        cache
            .get_valid_token(|| now, |_| async { Ok(token_expiring_in(now, 30, "stale")) })
            .await
            .unwrap();
        let err = cache
            .get_valid_token(|| now, |_| async {
                Err(Error::Exchange {
                    status: 502,
                    body: String::new(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.exchange_status(), Some(502));
        assert_eq!(cache.cached().await.unwrap().token, "stale");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_refresh() {
        let cache = Arc::new(TokenCache::new());
        let refreshes = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let refreshes = refreshes.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_valid_token(|| now, |_| async move {
                        refreshes.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok(token_expiring_in(now, 3600, "shared"))
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().token, "shared");
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiting_callers_share_a_failed_refresh() {
        let cache = Arc::new(TokenCache::new());
        let refreshes = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let refreshes = refreshes.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_valid_token(|| now, |_| async move {
                        refreshes.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        Err(Error::Exchange {
                            status: 500,
                            body: "boom".to_string(),
                        })
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.exchange_status(), Some(500));
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        // A call made after the failure tries again
        let token = cache
            .get_valid_token(|| now, |_| async {
                refreshes.fetch_add(1, Ordering::SeqCst);
                Ok(token_expiring_in(now, 3600, "recovered"))
            })
            .await
            .unwrap();
        assert_eq!(token.token, "recovered");
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clock_is_read_after_waiting_for_the_lock() {
        let cache = Arc::new(TokenCache::new());
        let refreshing = Arc::new(AtomicBool::new(false));
        let start = Utc::now();

        let leader = {
            let cache = cache.clone();
            let refreshing = refreshing.clone();
            tokio::spawn(async move {
                cache
                    .get_valid_token(|| start, |_| async move {
                        refreshing.store(true, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        refreshing.store(false, Ordering::SeqCst);
                        // Already inside the skew window for anyone reading the clock later
                        Ok(token_expiring_in(start, 30, "short"))
                    })
                    .await
            })
        };
        while !refreshing.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        let token = cache
            .get_valid_token(
                || {
                    assert!(!refreshing.load(Ordering::SeqCst));
                    start + Duration::seconds(10)
                },
                |now| async move {
                    assert_eq!(now, start + Duration::seconds(10));
                    Ok(token_expiring_in(now, 3600, "fresh"))
                },
            )
            .await
            .unwrap();

        assert_eq!(leader.await.unwrap().unwrap().token, "short");
        assert_eq!(token.token, "fresh");
    }
}
