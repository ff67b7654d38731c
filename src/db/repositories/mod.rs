//! Repository pattern implementations
//!
//! Storage traits used by the services, plus their DynamoDB implementations.

pub mod card;
pub mod otp;
pub mod user;

pub use card::CardRepository;
pub use otp::OtpRepository;
pub use user::UserRepository;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Serialize;

use crate::db::models::{GeneratedCard, OtpRecord, User, UserProfile};

/// One page of a scan, with an opaque cursor for the next one
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of verifying a user profile
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub user: User,
    /// False when an existing record was updated
    pub created: bool,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create the user, or update the existing record with the same email
    async fn upsert_verified(&self, profile: &UserProfile, now: i64) -> Result<UpsertOutcome, RepoError>;

    async fn get_user(&self, email: &str) -> Result<Option<User>, RepoError>;

    async fn list_users(&self, limit: usize, cursor: Option<&str>) -> Result<Page<User>, RepoError>;
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Store the code, replacing any pending code for the same email
    async fn put_otp(&self, record: &OtpRecord) -> Result<(), RepoError>;

    /// Fetch the pending code; expired records may still be returned
    async fn get_otp(&self, email: &str) -> Result<Option<OtpRecord>, RepoError>;

    async fn delete_otp(&self, email: &str) -> Result<(), RepoError>;

    /// Check `code` and settle the pending OTP in one atomic step.
    ///
    /// A matching live code is deleted. A wrong guess bumps the attempt
    /// counter, and the record is deleted once it reaches `max_attempts` or
    /// is found expired. Concurrent callers never see the same live code twice.
    async fn consume_otp(
        &self,
        email: &str,
        code: &str,
        now: i64,
        max_attempts: u32,
    ) -> Result<OtpCheck, RepoError>;
}

/// How a [`OtpStore::consume_otp`] call settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    /// Code matched and has been deleted
    Verified,
    /// No pending code for the email
    Missing,
    /// Code had expired and has been deleted
    Expired,
    /// Wrong code; `attempts` wrong guesses so far
    Mismatch { attempts: u32 },
    /// Attempt budget spent; the code has been deleted
    Exhausted,
}

#[async_trait]
pub trait CardStore: Send + Sync {
    async fn insert_card(&self, card: &GeneratedCard) -> Result<(), RepoError>;

    async fn list_cards(&self, limit: usize, cursor: Option<&str>) -> Result<Page<GeneratedCard>, RepoError>;
}

/// Errors that can occur in the storage layer
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),

    #[error("Record not found")]
    NotFound,

    #[error("Invalid pagination cursor")]
    InvalidCursor,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Encode a partition key as a pagination cursor
pub fn encode_cursor(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Decode a cursor produced by [`encode_cursor`]
pub fn decode_cursor(cursor: &str) -> Result<String, RepoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.trim())
        .map_err(|_| RepoError::InvalidCursor)?;
    String::from_utf8(bytes).map_err(|_| RepoError::InvalidCursor)
}

/// Clamp a requested page size into DynamoDB's scan limit range
pub fn clamp_limit(limit: usize) -> i32 {
    limit.clamp(1, 1000) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = encode_cursor("ana@example.com");
        assert!(!cursor.contains('='));
        assert_eq!(decode_cursor(&cursor).unwrap(), "ana@example.com");
    }

    #[test]
    fn test_decode_cursor_rejects_garbage() {
        assert!(matches!(decode_cursor("!!not-base64!!"), Err(RepoError::InvalidCursor)));
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(50), 50);
        assert_eq!(clamp_limit(100_000), 1000);
    }
}
