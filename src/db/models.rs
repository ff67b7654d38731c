//! Persisted records
//!
//! Users, one-time passwords and generated cards, with their DynamoDB item
//! encodings. All timestamps are unix seconds.

use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A verified participant.
///
/// Stored in the users table with `email` as partition key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Normalized (lower-case) email, unique
    pub email: String,
    pub name: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_handle: Option<String>,
    pub verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Profile fields supplied at verification time
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub email: String,
    pub name: String,
    pub phone: String,
    pub social_handle: Option<String>,
}

impl User {
    /// Build the record that results from verifying `profile`.
    ///
    /// `existing` is the record before the update, if any; its creation time
    /// is preserved and a missing social handle keeps the previous one.
    pub fn from_profile(profile: &UserProfile, existing: Option<&User>, now: i64) -> Self {
        Self {
            email: profile.email.clone(),
            name: profile.name.clone(),
            phone: profile.phone.clone(),
            social_handle: profile
                .social_handle
                .clone()
                .or_else(|| existing.and_then(|u| u.social_handle.clone())),
            verified: true,
            created_at: existing.map(|u| u.created_at).unwrap_or(now),
            updated_at: now,
        }
    }

    /// UTC calendar day the user registered
    pub fn created_date(&self) -> Option<NaiveDate> {
        date_of(self.created_at)
    }

    /// Parse from DynamoDB item
    pub fn from_dynamodb(item: &HashMap<String, AttributeValue>) -> Option<Self> {
        Some(Self {
            email: get_string(item, "email")?,
            name: get_string(item, "name").unwrap_or_default(),
            phone: get_string(item, "phone").unwrap_or_default(),
            social_handle: get_string(item, "social_handle"),
            verified: get_bool(item, "verified").unwrap_or(false),
            created_at: get_number(item, "created_at").unwrap_or(0),
            updated_at: get_number(item, "updated_at").unwrap_or(0),
        })
    }
}

/// A pending email verification code.
///
/// Stored in the OTP table with `email` as partition key; `expires_at` doubles
/// as the table's TTL attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub email: String,
    pub code: String,
    pub expires_at: i64,
    pub attempts: u32,
    pub created_at: i64,
}

impl OtpRecord {
    pub fn new(email: impl Into<String>, code: impl Into<String>, now: i64, ttl_seconds: u64) -> Self {
        Self {
            email: email.into(),
            code: code.into(),
            expires_at: now + ttl_seconds as i64,
            attempts: 0,
            created_at: now,
        }
    }

    /// A code is dead from `expires_at` onwards
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn matches(&self, code: &str) -> bool {
        self.code == code.trim()
    }

    /// Convert to DynamoDB item
    pub fn to_dynamodb(&self) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("email".to_string(), AttributeValue::S(self.email.clone()));
        item.insert("code".to_string(), AttributeValue::S(self.code.clone()));
        item.insert("expires_at".to_string(), AttributeValue::N(self.expires_at.to_string()));
        item.insert("attempts".to_string(), AttributeValue::N(self.attempts.to_string()));
        item.insert("created_at".to_string(), AttributeValue::N(self.created_at.to_string()));
        item
    }

    /// Parse from DynamoDB item
    pub fn from_dynamodb(item: &HashMap<String, AttributeValue>) -> Option<Self> {
        Some(Self {
            email: get_string(item, "email")?,
            code: get_string(item, "code")?,
            expires_at: get_number(item, "expires_at")?,
            attempts: get_number(item, "attempts").unwrap_or(0) as u32,
            created_at: get_number(item, "created_at").unwrap_or(0),
        })
    }
}

/// A finished postcard.
///
/// Stored in the cards table with `id` as partition key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCard {
    pub id: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dish: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GeneratedCard {
    pub fn new(image_url: impl Into<String>, now: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            image_url: image_url.into(),
            email: None,
            dish: None,
            background: None,
            greeting: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn created_date(&self) -> Option<NaiveDate> {
        date_of(self.created_at)
    }

    /// Convert to DynamoDB item
    pub fn to_dynamodb(&self) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(self.id.clone()));
        item.insert("image_url".to_string(), AttributeValue::S(self.image_url.clone()));
        item.insert("created_at".to_string(), AttributeValue::N(self.created_at.to_string()));
        item.insert("updated_at".to_string(), AttributeValue::N(self.updated_at.to_string()));

        let optional = [
            ("email", &self.email),
            ("dish", &self.dish),
            ("background", &self.background),
            ("greeting", &self.greeting),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                item.insert(key.to_string(), AttributeValue::S(value.clone()));
            }
        }

        item
    }

    /// Parse from DynamoDB item
    pub fn from_dynamodb(item: &HashMap<String, AttributeValue>) -> Option<Self> {
        Some(Self {
            id: get_string(item, "id")?,
            image_url: get_string(item, "image_url")?,
            email: get_string(item, "email"),
            dish: get_string(item, "dish"),
            background: get_string(item, "background"),
            greeting: get_string(item, "greeting"),
            created_at: get_number(item, "created_at").unwrap_or(0),
            updated_at: get_number(item, "updated_at").unwrap_or(0),
        })
    }
}

fn date_of(timestamp: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).map(|dt| dt.date_naive())
}

// DynamoDB attribute helpers

pub(crate) fn get_string(item: &HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

pub(crate) fn get_number(item: &HashMap<String, AttributeValue>, key: &str) -> Option<i64> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
}

pub(crate) fn get_bool(item: &HashMap<String, AttributeValue>, key: &str) -> Option<bool> {
    item.get(key).and_then(|v| v.as_bool().ok()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(social: Option<&str>) -> UserProfile {
        UserProfile {
            email: "ana@example.com".to_string(),
            name: "Ana".to_string(),
            phone: "+15550100".to_string(),
            social_handle: social.map(str::to_string),
        }
    }

    #[test]
    fn test_otp_expiry_boundary() {
        let otp = OtpRecord::new("ana@example.com", "123456", 1_000, 600);
        assert_eq!(otp.expires_at, 1_600);
        assert!(!otp.is_expired(1_599));
        assert!(otp.is_expired(1_600));
    }

    #[test]
    fn test_otp_matches_trims_input() {
        let otp = OtpRecord::new("ana@example.com", "123456", 0, 600);
        assert!(otp.matches(" 123456 "));
        assert!(!otp.matches("654321"));
    }

    #[test]
    fn test_otp_dynamodb_item() {
        let otp = OtpRecord::new("ana@example.com", "123456", 1_000, 600);
        let item = otp.to_dynamodb();
        assert_eq!(item.get("expires_at").unwrap().as_n().unwrap(), "1600");
        assert_eq!(OtpRecord::from_dynamodb(&item), Some(otp));
    }

    #[test]
    fn test_user_from_profile_preserves_creation() {
        let first = User::from_profile(&profile(Some("@ana")), None, 100);
        assert_eq!(first.created_at, 100);
        assert!(first.verified);

        let second = User::from_profile(&profile(None), Some(&first), 200);
        assert_eq!(second.created_at, 100);
        assert_eq!(second.updated_at, 200);
        assert_eq!(second.social_handle.as_deref(), Some("@ana"));
    }

    #[test]
    fn test_card_item_skips_missing_metadata() {
        let mut card = GeneratedCard::new("https://res.cloudinary.com/demo/card.png", 0);
        card.dish = Some("plum pudding".to_string());

        let item = card.to_dynamodb();
        assert!(item.contains_key("dish"));
        assert!(!item.contains_key("greeting"));
        assert_eq!(GeneratedCard::from_dynamodb(&item), Some(card));
    }

    #[test]
    fn test_created_date() {
        // 2024-12-25T10:00:00Z
        let card = GeneratedCard::new("u", 1_735_120_800);
        assert_eq!(card.created_date(), NaiveDate::from_ymd_opt(2024, 12, 25));
    }
}
