//! Retry with exponential backoff
//!
//! Vendor calls (FAL, Clipdrop, Cloudinary, Brevo) go through [`RetryPolicy`]
//! so that transient failures are retried a bounded number of times before a
//! pipeline stage falls back.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff policy for a single outbound call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Add up to 100% random jitter on top of each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy used for third-party image/email APIs
    pub fn vendor(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (0-indexed), doubling each time
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    ///
    /// `label` only feeds the logs.
    pub async fn run<T, E, F, Fut, R>(&self, label: &str, is_retryable: R, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut retry = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if retry < self.max_retries && is_retryable(&err) => {
                    let delay = self.delay_for(retry);
                    tracing::warn!(
                        call = %label,
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Whether an HTTP status from a vendor is worth retrying
pub fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Whether a transport-level reqwest error is worth retrying
pub fn is_transient_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.status().map(is_transient_status).unwrap_or(false)
}
