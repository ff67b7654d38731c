//! Registration request/response bodies

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::db::{User, UserProfile};
use crate::utils::{non_empty, normalize_email};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendOtpRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,

    #[validate(length(max = 100))]
    #[serde(default)]
    pub name: Option<String>,
}

impl SendOtpRequest {
    /// Canonical email and trimmed optional fields, ready for validation
    pub fn normalized(mut self) -> Self {
        self.email = normalize_email(&self.email);
        self.name = non_empty(self.name.as_deref());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOtpResponse {
    pub message: String,
    pub email: String,
    pub expires_at: i64,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,

    #[serde(alias = "code")]
    #[validate(custom(function = "validate_code"))]
    pub otp: String,

    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub name: String,

    #[validate(custom(function = "validate_phone"))]
    pub phone: String,

    #[validate(length(max = 100))]
    #[serde(default, alias = "socialHandle")]
    pub social_handle: Option<String>,
}

impl VerifyOtpRequest {
    pub fn normalized(mut self) -> Self {
        self.email = normalize_email(&self.email);
        self.otp = self.otp.trim().to_string();
        self.name = self.name.trim().to_string();
        self.phone = self.phone.trim().to_string();
        self.social_handle = non_empty(self.social_handle.as_deref());
        self
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            email: self.email.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            social_handle: self.social_handle.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpResponse {
    pub verified: bool,
    /// False when an existing registration was updated
    pub created: bool,
    pub user: User,
}

fn validate_code(code: &str) -> Result<(), ValidationError> {
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("otp_format").with_message("must be a 6-digit code".into()))
    }
}

/// Digits with optional `+`, spaces, dashes and parentheses; 7 to 15 digits
fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'));
    let digits = phone.chars().filter(char::is_ascii_digit).count();

    if allowed && (7..=15).contains(&digits) {
        Ok(())
    } else {
        Err(ValidationError::new("phone_format").with_message("must be a valid phone number".into()))
    }
}
