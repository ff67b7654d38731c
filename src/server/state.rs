//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{create_dynamodb_client, Settings, StorageBackend};
use crate::db::{DynamoDbClient, MemoryStore, Storage};
use crate::middleware::{AdminAuth, Metrics};
use crate::services::{
    BrevoMailer, ClipdropClient, CloudinaryClient, DashboardService, FalClient, ImageFetcher,
    LogMailer, Mailer, OtpService, PostcardPipeline,
};
use crate::utils::RetryPolicy;

/// Shared application state
///
/// Cheap to clone; every field is an `Arc` or wraps one.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub storage: Storage,
    pub otp: Arc<OtpService>,
    pub pipeline: Arc<PostcardPipeline>,
    pub dashboard: Arc<DashboardService>,
    /// Absent when Cloudinary credentials are not configured
    pub cloudinary: Option<CloudinaryClient>,
    pub admin_auth: Arc<AdminAuth>,
    pub metrics: Metrics,
    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    /// Build state for the configured storage backend and vendors
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let storage = match settings.storage_backend {
            StorageBackend::Dynamodb => {
                tracing::debug!(
                    region = %settings.aws_region,
                    dynamodb_endpoint = ?settings.dynamodb_endpoint_url,
                    "Creating DynamoDB client"
                );
                let sdk_client = create_dynamodb_client(&settings).await;
                let client = DynamoDbClient::new(Arc::new(settings.clone()), sdk_client);
                Storage::dynamodb(Arc::new(client))
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage, data is lost on restart");
                Storage::memory(Arc::new(MemoryStore::new()))
            }
        };

        let retry = RetryPolicy::vendor(settings.vendor_max_retries);
        let mailer: Arc<dyn Mailer> = match BrevoMailer::new(&settings.email, retry) {
            Ok(mailer) => Arc::new(mailer),
            Err(e) => {
                tracing::warn!(error = %e, "Brevo unavailable, OTP emails will only be logged");
                Arc::new(LogMailer)
            }
        };

        Self::with_parts(settings, storage, mailer)
    }

    /// Build state around an existing storage and mailer
    pub fn with_parts(settings: Settings, storage: Storage, mailer: Arc<dyn Mailer>) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        let metrics = Metrics::new()?;
        let retry = RetryPolicy::vendor(settings.vendor_max_retries);

        let clipdrop = optional("Clipdrop", ClipdropClient::new(&settings.clipdrop, retry.clone()));
        let fal = optional("FAL", FalClient::new(&settings.fal, retry.clone()));
        let cloudinary = optional("Cloudinary", CloudinaryClient::new(&settings.cloudinary, retry.clone()));

        let fetcher = ImageFetcher::new(
            settings.max_upload_bytes,
            Duration::from_secs(settings.clipdrop.timeout_seconds),
            retry,
        )?
        .allow_private_hosts(settings.allow_private_image_hosts);

        let otp = OtpService::new(
            storage.otps.clone(),
            mailer,
            settings.otp.clone(),
            &settings.email,
            metrics.clone(),
        );

        let pipeline = PostcardPipeline::new(
            fetcher,
            clipdrop,
            fal,
            cloudinary.clone(),
            storage.cards.clone(),
            settings.fal.prompt.clone(),
            metrics.clone(),
        );

        let dashboard = DashboardService::new(storage.users.clone(), storage.cards.clone(), cloudinary.clone());
        let admin_auth = AdminAuth::new(&settings.admin);

        tracing::info!(storage = %storage.backend_name(), "Application state initialized successfully");

        Ok(Self {
            settings,
            storage,
            otp: Arc::new(otp),
            pipeline: Arc::new(pipeline),
            dashboard: Arc::new(dashboard),
            cloudinary,
            admin_auth: Arc::new(admin_auth),
            metrics,
            start_time: Instant::now(),
        })
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Vendor client, or `None` (with a warning) when it cannot be built
fn optional<T, E: std::fmt::Display>(service: &str, client: Result<T, E>) -> Option<T> {
    match client {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!(service = %service, error = %e, "Vendor integration disabled");
            None
        }
    }
}
