//! Configuration management module
//!
//! This module handles loading and validating application configuration
//! from environment variables and .env files.

pub mod aws;
pub mod settings;

pub use aws::{create_dynamodb_client, AwsConfigBuilder};
pub use settings::{
    AdminConfig, ClipdropConfig, CloudinaryConfig, EmailConfig, Environment, FalConfig, OtpConfig,
    Settings, StorageBackend, DEFAULT_POSTCARD_PROMPT,
};
