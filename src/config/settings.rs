//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Where users, OTPs and cards are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// DynamoDB tables (production)
    Dynamodb,
    /// Process-local maps, lost on restart (development and tests)
    Memory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Dynamodb => write!(f, "dynamodb"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dynamodb" | "dynamo" => Ok(StorageBackend::Dynamodb),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            _ => anyhow::bail!("Invalid storage backend: {}. Expected: dynamodb or memory", s),
        }
    }
}

/// One-time password configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OtpConfig {
    /// Lifetime of an issued code
    pub ttl_seconds: u64,
    /// Wrong guesses allowed before the code is discarded
    pub max_attempts: u32,
    /// Sends allowed per email within `send_window_seconds`
    pub sends_per_window: u32,
    pub send_window_seconds: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600, // 10 minutes
            max_attempts: 5,
            sends_per_window: 3,
            send_window_seconds: 600,
        }
    }
}

/// Transactional email (Brevo) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(skip_serializing)]
    pub brevo_api_key: Option<String>,
    pub brevo_base_url: String,
    pub sender_email: String,
    pub sender_name: String,
    pub otp_subject: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            brevo_api_key: None,
            brevo_base_url: "https://api.brevo.com".to_string(),
            sender_email: "no-reply@postcard.studio".to_string(),
            sender_name: "Postcard Studio".to_string(),
            otp_subject: "Your festive postcard verification code".to_string(),
        }
    }
}

/// FAL AI generation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FalConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub prompt: String,
    pub timeout_seconds: u64,
}

/// Prompt sent with every generation request
pub const DEFAULT_POSTCARD_PROMPT: &str = "Create a warm festive greeting postcard. \
Place the person from the first image in the scene, happily presenting the dish from the second image, \
set against the festive background from the third image. Keep the person's face and identity unchanged, \
soft golden lighting, photorealistic, joyful celebration mood, no text.";

impl Default for FalConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://fal.run".to_string(),
            model: "fal-ai/nano-banana/edit".to_string(),
            prompt: DEFAULT_POSTCARD_PROMPT.to_string(),
            timeout_seconds: 180,
        }
    }
}

/// Clipdrop background removal configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClipdropConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for ClipdropConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://clipdrop-api.co".to_string(),
            timeout_seconds: 60,
        }
    }
}

/// Cloudinary media hosting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
    pub base_url: String,
    /// Folder for raw user uploads
    pub upload_folder: String,
    /// Folder for finished postcards (counted by the dashboard)
    pub generated_folder: String,
    pub timeout_seconds: u64,
}

impl Default for CloudinaryConfig {
    fn default() -> Self {
        Self {
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://api.cloudinary.com".to_string(),
            upload_folder: "postcards/uploads".to_string(),
            generated_folder: "postcards/generated".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl CloudinaryConfig {
    pub fn is_configured(&self) -> bool {
        !self.cloud_name.is_empty() && !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

/// Admin dashboard authentication
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
    pub token_ttl_seconds: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: None,
            jwt_secret: None,
            token_ttl_seconds: 12 * 60 * 60,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Server settings
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    /// Let the server download images from plain-http, loopback and
    /// private-network URLs (local development only)
    pub allow_private_image_hosts: bool,

    // Storage
    pub storage_backend: StorageBackend,

    // AWS settings
    pub aws_region: String,
    pub dynamodb_endpoint_url: Option<String>,

    // DynamoDB table names
    pub dynamodb_users_table: String,
    pub dynamodb_otps_table: String,
    pub dynamodb_cards_table: String,

    pub otp: OtpConfig,
    pub email: EmailConfig,
    pub fal: FalConfig,
    pub clipdrop: ClipdropConfig,
    pub cloudinary: CloudinaryConfig,
    pub admin: AdminConfig,

    /// Retries for transient vendor failures (0 disables)
    pub vendor_max_retries: u32,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let settings = Self {
            // App settings
            app_name: env_or_default("APP_NAME", &defaults.app_name),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),

            // Server settings
            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("PORT", "8000")
                .parse()
                .context("Invalid PORT value")?,
            max_upload_bytes: env_or_default("MAX_UPLOAD_BYTES", "10485760")
                .parse()
                .context("Invalid MAX_UPLOAD_BYTES value")?,
            allow_private_image_hosts: env_parse_or("ALLOW_PRIVATE_IMAGE_HOSTS", false),

            storage_backend: env_or_default("STORAGE_BACKEND", "dynamodb").parse()?,

            // AWS settings
            aws_region: env_or_default("AWS_REGION", "us-east-1"),
            dynamodb_endpoint_url: env_opt("DYNAMODB_ENDPOINT_URL"),

            // DynamoDB table names
            dynamodb_users_table: env_or_default("DYNAMODB_USERS_TABLE", &defaults.dynamodb_users_table),
            dynamodb_otps_table: env_or_default("DYNAMODB_OTPS_TABLE", &defaults.dynamodb_otps_table),
            dynamodb_cards_table: env_or_default("DYNAMODB_CARDS_TABLE", &defaults.dynamodb_cards_table),

            otp: OtpConfig {
                ttl_seconds: env_parse_or("OTP_TTL_SECONDS", defaults.otp.ttl_seconds),
                max_attempts: env_parse_or("OTP_MAX_ATTEMPTS", defaults.otp.max_attempts),
                sends_per_window: env_parse_or("OTP_SENDS_PER_WINDOW", defaults.otp.sends_per_window),
                send_window_seconds: env_parse_or("OTP_SEND_WINDOW_SECONDS", defaults.otp.send_window_seconds),
            },

            email: EmailConfig {
                brevo_api_key: env_opt("BREVO_API_KEY"),
                brevo_base_url: env_or_default("BREVO_BASE_URL", &defaults.email.brevo_base_url),
                sender_email: env_or_default("BREVO_SENDER_EMAIL", &defaults.email.sender_email),
                sender_name: env_or_default("BREVO_SENDER_NAME", &defaults.email.sender_name),
                otp_subject: env_or_default("OTP_EMAIL_SUBJECT", &defaults.email.otp_subject),
            },

            fal: FalConfig {
                api_key: env_opt("FAL_KEY"),
                base_url: env_or_default("FAL_BASE_URL", &defaults.fal.base_url),
                model: env_or_default("FAL_MODEL", &defaults.fal.model),
                prompt: env_or_default("FAL_PROMPT", &defaults.fal.prompt),
                timeout_seconds: env_parse_or("FAL_TIMEOUT_SECONDS", defaults.fal.timeout_seconds),
            },

            clipdrop: ClipdropConfig {
                api_key: env_opt("CLIPDROP_API_KEY"),
                base_url: env_or_default("CLIPDROP_BASE_URL", &defaults.clipdrop.base_url),
                timeout_seconds: env_parse_or("CLIPDROP_TIMEOUT_SECONDS", defaults.clipdrop.timeout_seconds),
            },

            cloudinary: CloudinaryConfig {
                cloud_name: env_or_default("CLOUDINARY_CLOUD_NAME", ""),
                api_key: env_or_default("CLOUDINARY_API_KEY", ""),
                api_secret: env_or_default("CLOUDINARY_API_SECRET", ""),
                base_url: env_or_default("CLOUDINARY_BASE_URL", &defaults.cloudinary.base_url),
                upload_folder: env_or_default("CLOUDINARY_UPLOAD_FOLDER", &defaults.cloudinary.upload_folder),
                generated_folder: env_or_default(
                    "CLOUDINARY_GENERATED_FOLDER",
                    &defaults.cloudinary.generated_folder,
                ),
                timeout_seconds: env_parse_or("CLOUDINARY_TIMEOUT_SECONDS", defaults.cloudinary.timeout_seconds),
            },

            admin: AdminConfig {
                username: env_or_default("ADMIN_USERNAME", &defaults.admin.username),
                password: env_opt("ADMIN_PASSWORD"),
                jwt_secret: env_opt("ADMIN_JWT_SECRET"),
                token_ttl_seconds: env_parse_or("ADMIN_TOKEN_TTL_SECONDS", defaults.admin.token_ttl_seconds),
            },

            vendor_max_retries: env_parse_or("VENDOR_MAX_RETRIES", defaults.vendor_max_retries),
        };

        // Validate settings
        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES must be > 0");
        }

        if self.otp.ttl_seconds == 0 {
            anyhow::bail!("OTP ttl must be > 0");
        }
        if self.otp.max_attempts == 0 {
            anyhow::bail!("OTP max_attempts must be > 0");
        }
        if self.otp.sends_per_window == 0 || self.otp.send_window_seconds == 0 {
            anyhow::bail!("OTP send rate limit must allow at least one send per window");
        }

        if self.admin.token_ttl_seconds == 0 {
            anyhow::bail!("Admin token ttl must be > 0");
        }

        if self.is_production() {
            if self.storage_backend == StorageBackend::Memory {
                tracing::warn!("Running in production with in-memory storage, data is lost on restart!");
            }
            if self.email.brevo_api_key.is_none() {
                tracing::warn!("Running in production without BREVO_API_KEY, OTP emails are only logged!");
            }
            if self.allow_private_image_hosts {
                tracing::warn!("Running in production with ALLOW_PRIVATE_IMAGE_HOSTS, image URLs may reach internal hosts!");
            }
            if self.admin.jwt_secret.is_none() {
                tracing::warn!("Running in production without ADMIN_JWT_SECRET, admin sessions end on restart");
            }
        }

        Ok(())
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "postcard-studio".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 10 * 1024 * 1024,
            allow_private_image_hosts: false,
            storage_backend: StorageBackend::Dynamodb,
            aws_region: "us-east-1".to_string(),
            dynamodb_endpoint_url: None,
            dynamodb_users_table: "postcard-studio-users".to_string(),
            dynamodb_otps_table: "postcard-studio-otps".to_string(),
            dynamodb_cards_table: "postcard-studio-cards".to_string(),
            otp: OtpConfig::default(),
            email: EmailConfig::default(),
            fal: FalConfig::default(),
            clipdrop: ClipdropConfig::default(),
            cloudinary: CloudinaryConfig::default(),
            admin: AdminConfig::default(),
            vendor_max_retries: 2,
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Non-empty environment variable
fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.app_name, "postcard-studio");
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.otp.ttl_seconds, 600);
        assert_eq!(settings.otp.max_attempts, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("development".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("moon".parse::<Environment>().is_err());
    }

    #[test]
    fn test_storage_backend_parsing() {
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert_eq!("DynamoDB".parse::<StorageBackend>().unwrap(), StorageBackend::Dynamodb);
        assert!("postgres".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_otp_ttl() {
        let mut settings = Settings::default();
        settings.otp.ttl_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_cloudinary_configured() {
        let mut settings = Settings::default();
        assert!(!settings.cloudinary.is_configured());
        settings.cloudinary.cloud_name = "demo".to_string();
        settings.cloudinary.api_key = "key".to_string();
        settings.cloudinary.api_secret = "secret".to_string();
        assert!(settings.cloudinary.is_configured());
    }

    #[test]
    fn test_server_addr() {
        let settings = Settings::default();
        assert_eq!(settings.server_addr(), "0.0.0.0:8000");
    }
}
