//! Email one-time passwords
//!
//! Issues six-digit codes, emails them and checks them back. A code is
//! single use, expires after the configured TTL and is discarded once the
//! wrong-guess budget is spent.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{EmailConfig, OtpConfig};
use crate::db::{OtpCheck, OtpRecord, OtpStore, RepoError};
use crate::error::ApiError;
use crate::middleware::metrics::Metrics;
use crate::middleware::rate_limit::{KeyedRateLimiter, RateLimitError};
use crate::services::mailer::{EmailMessage, MailError, Mailer};
use crate::utils::{mask_email, normalize_email};

#[derive(Error, Debug)]
pub enum OtpError {
    #[error("OTP not found or expired")]
    NotFound,

    #[error("OTP has expired")]
    Expired,

    #[error("Invalid OTP")]
    Invalid { remaining_attempts: u32 },

    #[error("Too many failed attempts, request a new code")]
    TooManyAttempts,

    #[error("Too many codes requested")]
    RateLimited(#[from] RateLimitError),

    #[error("Failed to deliver OTP email: {0}")]
    Delivery(#[from] MailError),

    #[error(transparent)]
    Storage(#[from] RepoError),
}

impl OtpError {
    /// Label used for the verification outcome metric
    fn outcome(&self) -> &'static str {
        match self {
            OtpError::NotFound => "not_found",
            OtpError::Expired => "expired",
            OtpError::Invalid { .. } => "invalid",
            OtpError::TooManyAttempts => "too_many_attempts",
            OtpError::RateLimited(_) => "rate_limited",
            OtpError::Delivery(_) => "delivery_failed",
            OtpError::Storage(_) => "storage_error",
        }
    }
}

impl From<OtpError> for ApiError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::NotFound | OtpError::Expired => ApiError::bad_request(err.to_string()),
            OtpError::Invalid { remaining_attempts } => ApiError::bad_request(format!(
                "Invalid OTP, {} attempt(s) remaining",
                remaining_attempts
            )),
            OtpError::TooManyAttempts => ApiError::TooManyAttempts(err.to_string()),
            OtpError::RateLimited(limit) => limit.into(),
            OtpError::Delivery(e) => ApiError::upstream("Email", e.to_string()),
            OtpError::Storage(e) => e.into(),
        }
    }
}

/// A code that was stored and emailed
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedOtp {
    pub email: String,
    pub expires_at: i64,
}

/// Uniformly random code in `100000..=999999`
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

pub struct OtpService {
    store: Arc<dyn OtpStore>,
    mailer: Arc<dyn Mailer>,
    config: OtpConfig,
    subject: String,
    send_limiter: KeyedRateLimiter,
    metrics: Metrics,
}

impl OtpService {
    pub fn new(
        store: Arc<dyn OtpStore>,
        mailer: Arc<dyn Mailer>,
        config: OtpConfig,
        email: &EmailConfig,
        metrics: Metrics,
    ) -> Self {
        let send_limiter = KeyedRateLimiter::new(
            "otp_send",
            config.sends_per_window,
            Duration::from_secs(config.send_window_seconds),
        );

        Self {
            store,
            mailer,
            config,
            subject: email.otp_subject.clone(),
            send_limiter,
            metrics,
        }
    }

    pub async fn issue(&self, email: &str, name: Option<&str>) -> Result<IssuedOtp, OtpError> {
        self.issue_at(email, name, Utc::now().timestamp()).await
    }

    /// Store a fresh code for `email` (replacing any pending one) and mail it.
    ///
    /// If the mail cannot be sent the stored code is removed again.
    pub async fn issue_at(&self, email: &str, name: Option<&str>, now: i64) -> Result<IssuedOtp, OtpError> {
        let email = normalize_email(email);
        self.send_limiter.check(&email).await?;

        let record = OtpRecord::new(email.clone(), generate_code(), now, self.config.ttl_seconds);
        self.store.put_otp(&record).await?;

        let mut message = EmailMessage::verification_code(
            &email,
            &self.subject,
            &record.code,
            self.config.ttl_seconds / 60,
        );
        message.to_name = name.map(str::to_string);

        if let Err(e) = self.mailer.send(&message).await {
            tracing::error!(email = %mask_email(&email), error = %e, "Failed to send OTP email");
            if let Err(cleanup) = self.store.delete_otp(&email).await {
                tracing::warn!(email = %mask_email(&email), error = %cleanup, "Failed to remove undelivered OTP");
            }
            return Err(e.into());
        }

        self.metrics.record_otp_sent();
        tracing::info!(email = %mask_email(&email), expires_at = record.expires_at, "OTP issued");

        Ok(IssuedOtp {
            email,
            expires_at: record.expires_at,
        })
    }

    pub async fn verify(&self, email: &str, code: &str) -> Result<(), OtpError> {
        self.verify_at(email, code, Utc::now().timestamp()).await
    }

    /// Check `code` against the pending OTP for `email`
    pub async fn verify_at(&self, email: &str, code: &str, now: i64) -> Result<(), OtpError> {
        let email = normalize_email(email);
        let result = self.check(&email, code, now).await;

        let outcome = match &result {
            Ok(()) => "success",
            Err(e) => e.outcome(),
        };
        self.metrics.record_otp_verification(outcome);
        tracing::info!(email = %mask_email(&email), outcome = %outcome, "OTP verification");

        result
    }

    async fn check(&self, email: &str, code: &str, now: i64) -> Result<(), OtpError> {
        let max_attempts = self.config.max_attempts;

        match self.store.consume_otp(email, code, now, max_attempts).await? {
            OtpCheck::Verified => Ok(()),
            OtpCheck::Missing => Err(OtpError::NotFound),
            OtpCheck::Expired => Err(OtpError::Expired),
            OtpCheck::Exhausted => Err(OtpError::TooManyAttempts),
            OtpCheck::Mismatch { attempts } => Err(OtpError::Invalid {
                remaining_attempts: max_attempts.saturating_sub(attempts),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Keeps every message so tests can read the code back
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::NotConfigured);
            }
            self.sent.lock().await.push(message.clone());
            Ok(())
        }
    }

    const NOW: i64 = 1_735_000_000;

    fn service_with(mailer: Arc<RecordingMailer>) -> (OtpService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = OtpService::new(
            store.clone(),
            mailer,
            OtpConfig::default(),
            &EmailConfig::default(),
            Metrics::new().unwrap(),
        );
        (service, store)
    }

    async fn pending_code(store: &MemoryStore, email: &str) -> String {
        store.get_otp(email).await.unwrap().unwrap().code
    }

    #[test]
    fn test_generate_code_is_six_digits() {
        for _ in 0..1000 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[tokio::test]
    async fn test_issue_stores_and_mails_code() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, store) = service_with(mailer.clone());

        let issued = service.issue_at(" Ana@Example.com ", Some("Ana"), NOW).await.unwrap();
        assert_eq!(issued.email, "ana@example.com");
        assert_eq!(issued.expires_at, NOW + 600);

        let code = pending_code(&store, "ana@example.com").await;
        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "ana@example.com");
        assert_eq!(sent[0].to_name.as_deref(), Some("Ana"));
        assert!(sent[0].text.contains(&code));
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let (service, store) = service_with(Arc::new(RecordingMailer::default()));
        service.issue_at("ana@example.com", None, NOW).await.unwrap();
        let code = pending_code(&store, "ana@example.com").await;

        service.verify_at("ANA@example.com", &code, NOW + 30).await.unwrap();

        let again = service.verify_at("ana@example.com", &code, NOW + 31).await;
        assert!(matches!(again, Err(OtpError::NotFound)));
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected_and_deleted() {
        let (service, store) = service_with(Arc::new(RecordingMailer::default()));
        service.issue_at("ana@example.com", None, NOW).await.unwrap();
        let code = pending_code(&store, "ana@example.com").await;

        let result = service.verify_at("ana@example.com", &code, NOW + 600).await;
        assert!(matches!(result, Err(OtpError::Expired)));
        assert!(store.get_otp("ana@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_code_valid_until_just_before_expiry() {
        let (service, store) = service_with(Arc::new(RecordingMailer::default()));
        service.issue_at("ana@example.com", None, NOW).await.unwrap();
        let code = pending_code(&store, "ana@example.com").await;

        assert!(service.verify_at("ana@example.com", &code, NOW + 599).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_codes_exhaust_attempts() {
        let (service, store) = service_with(Arc::new(RecordingMailer::default()));
        service.issue_at("ana@example.com", None, NOW).await.unwrap();
        let code = pending_code(&store, "ana@example.com").await;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for remaining in (1..=4).rev() {
            let result = service.verify_at("ana@example.com", wrong, NOW + 1).await;
            match result {
                Err(OtpError::Invalid { remaining_attempts }) => assert_eq!(remaining_attempts, remaining),
                other => panic!("expected Invalid, got {:?}", other),
            }
        }

        let fifth = service.verify_at("ana@example.com", wrong, NOW + 1).await;
        assert!(matches!(fifth, Err(OtpError::TooManyAttempts)));

        // The correct code no longer works either
        let after = service.verify_at("ana@example.com", &code, NOW + 2).await;
        assert!(matches!(after, Err(OtpError::NotFound)));
    }

    /// Memory store with storage round-trip latency
    struct SlowStore {
        inner: Arc<MemoryStore>,
    }

    impl SlowStore {
        async fn pause(&self) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[async_trait]
    impl OtpStore for SlowStore {
        async fn put_otp(&self, record: &OtpRecord) -> Result<(), RepoError> {
            self.pause().await;
            self.inner.put_otp(record).await
        }

        async fn get_otp(&self, email: &str) -> Result<Option<OtpRecord>, RepoError> {
            self.pause().await;
            self.inner.get_otp(email).await
        }

        async fn delete_otp(&self, email: &str) -> Result<(), RepoError> {
            self.pause().await;
            self.inner.delete_otp(email).await
        }

        async fn consume_otp(
            &self,
            email: &str,
            code: &str,
            now: i64,
            max_attempts: u32,
        ) -> Result<OtpCheck, RepoError> {
            self.pause().await;
            self.inner.consume_otp(email, code, now, max_attempts).await
        }
    }

    fn slow_service() -> (OtpService, Arc<MemoryStore>) {
        let inner = Arc::new(MemoryStore::new());
        let service = OtpService::new(
            Arc::new(SlowStore { inner: inner.clone() }),
            Arc::new(RecordingMailer::default()),
            OtpConfig::default(),
            &EmailConfig::default(),
            Metrics::new().unwrap(),
        );
        (service, inner)
    }

    #[tokio::test]
    async fn test_concurrent_guesses_stay_within_attempt_budget() {
        let (service, store) = slow_service();
        service.issue_at("ana@example.com", None, NOW).await.unwrap();
        let code = pending_code(&store, "ana@example.com").await;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let mut guesses = vec![wrong; 50];
        guesses.push(code.as_str());

        let results = futures::future::join_all(
            guesses
                .iter()
                .map(|guess| service.verify_at("ana@example.com", guess, NOW + 1)),
        )
        .await;

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let invalid = results
            .iter()
            .filter(|r| matches!(r, Err(OtpError::Invalid { .. })))
            .count();
        let exhausted = results
            .iter()
            .filter(|r| matches!(r, Err(OtpError::TooManyAttempts)))
            .count();

        // Five wrong guesses spend the budget: four Invalid, then one TooManyAttempts
        assert!(invalid <= 4, "{} wrong guesses were evaluated", invalid);
        assert!(exhausted <= 1);
        assert!(successes <= 1);
        assert_eq!(successes + exhausted, 1);
        assert!(store.get_otp("ana@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_verifies_consume_code_once() {
        let (service, store) = slow_service();
        service.issue_at("ana@example.com", None, NOW).await.unwrap();
        let code = pending_code(&store, "ana@example.com").await;

        let (first, second) = tokio::join!(
            service.verify_at("ana@example.com", &code, NOW + 1),
            service.verify_at("ana@example.com", &code, NOW + 1),
        );

        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn test_reissue_replaces_pending_code() {
        let (service, store) = service_with(Arc::new(RecordingMailer::default()));
        service.issue_at("ana@example.com", None, NOW).await.unwrap();
        let first = pending_code(&store, "ana@example.com").await;
        service.issue_at("ana@example.com", None, NOW + 5).await.unwrap();
        let second = pending_code(&store, "ana@example.com").await;

        let record = store.get_otp("ana@example.com").await.unwrap().unwrap();
        assert_eq!(record.attempts, 0);
        assert_eq!(record.expires_at, NOW + 5 + 600);
        if first != second {
            assert!(service.verify_at("ana@example.com", &first, NOW + 6).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_delivery_failure_removes_code() {
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..RecordingMailer::default()
        });
        let (service, store) = service_with(mailer);

        let result = service.issue_at("ana@example.com", None, NOW).await;
        assert!(matches!(result, Err(OtpError::Delivery(_))));
        assert!(store.get_otp("ana@example.com").await.unwrap().is_none());

        let api: ApiError = result.unwrap_err().into();
        assert_eq!(api.status(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_send_rate_limit() {
        let (service, _) = service_with(Arc::new(RecordingMailer::default()));

        for _ in 0..3 {
            service.issue_at("ana@example.com", None, NOW).await.unwrap();
        }
        let fourth = service.issue_at("ana@example.com", None, NOW).await;
        assert!(matches!(fourth, Err(OtpError::RateLimited(_))));

        // Other addresses are unaffected
        assert!(service.issue_at("bob@example.com", None, NOW).await.is_ok());
    }

    #[test]
    fn test_error_status_mapping() {
        use axum::http::StatusCode;

        assert_eq!(ApiError::from(OtpError::NotFound).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(OtpError::Expired).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(OtpError::Invalid { remaining_attempts: 2 }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(OtpError::TooManyAttempts).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
