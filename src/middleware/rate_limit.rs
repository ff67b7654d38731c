//! Rate limiting
//!
//! Token-bucket limiters keyed by an arbitrary string (the normalized email
//! for OTP sends and generations). Each key gets its own limiter, cached in
//! memory and evicted once idle.

use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use moka::future::Cache;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ApiError;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-key rate limiter shared across requests
#[derive(Clone)]
pub struct KeyedRateLimiter {
    /// Name used in logs ("otp_send", "generate")
    name: &'static str,

    quota: Quota,

    /// Key -> limiter
    limiters: Cache<String, Arc<DirectRateLimiter>>,
}

impl KeyedRateLimiter {
    /// Allow a burst of `max_per_window` requests per key, refilling evenly
    /// over `window`.
    pub fn new(name: &'static str, max_per_window: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_per_window).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .map(|q| q.allow_burst(burst))
            .unwrap_or_else(|| Quota::per_minute(burst));

        // Idle limiters are dropped once a full window has passed twice
        let limiters = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(window.saturating_mul(2).max(Duration::from_secs(60)))
            .build();

        Self {
            name,
            quota,
            limiters,
        }
    }

    async fn limiter_for(&self, key: &str) -> Arc<DirectRateLimiter> {
        let quota = self.quota;
        self.limiters
            .get_with(key.to_string(), async move { Arc::new(RateLimiter::direct(quota)) })
            .await
    }

    /// Consume one request for `key`
    pub async fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let limiter = self.limiter_for(key).await;

        match limiter.check() {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let retry_after = not_until.wait_time_from(DefaultClock::default().now());
                let retry_after_seconds = retry_after.as_secs().max(1);

                tracing::warn!(
                    limiter = %self.name,
                    retry_after_seconds = retry_after_seconds,
                    "Rate limit exceeded"
                );

                Err(RateLimitError { retry_after_seconds })
            }
        }
    }
}

/// Rate limit error with retry information
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Rate limit exceeded, retry after {retry_after_seconds}s")]
pub struct RateLimitError {
    /// Seconds until the next request is allowed
    pub retry_after_seconds: u64,
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        ApiError::RateLimitExceeded {
            retry_after_seconds: err.retry_after_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_limited() {
        let limiter = KeyedRateLimiter::new("test", 3, Duration::from_secs(600));

        for i in 0..3 {
            assert!(limiter.check("ana@example.com").await.is_ok(), "send {} should pass", i);
        }

        let err = limiter.check("ana@example.com").await.unwrap_err();
        assert!(err.retry_after_seconds >= 1);
        assert!(err.retry_after_seconds <= 200);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = KeyedRateLimiter::new("test", 1, Duration::from_secs(60));

        assert!(limiter.check("ana@example.com").await.is_ok());
        assert!(limiter.check("ana@example.com").await.is_err());
        assert!(limiter.check("bob@example.com").await.is_ok());
    }

    #[test]
    fn test_rate_limit_error_is_std_error() {
        let err = RateLimitError { retry_after_seconds: 42 };
        let dyn_err: &dyn std::error::Error = &err;
        assert_eq!(dyn_err.to_string(), "Rate limit exceeded, retry after 42s");

        let api: ApiError = err.into();
        assert_eq!(api.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_limiter_is_cached_per_key() {
        let limiter = KeyedRateLimiter::new("test", 5, Duration::from_secs(60));

        let first = limiter.limiter_for("k").await;
        let second = limiter.limiter_for("k").await;
        assert!(Arc::ptr_eq(&first, &second));
    }
}
