//! Postcard generation pipeline
//!
//! Strictly sequential relay across vendors:
//!
//! 1. cutout: remove the background of the user photo and host it
//! 2. style: compose person, dish and background with FAL
//! 3. finish: remove the background of the FAL output and host it
//! 4. persist: record the card
//!
//! Only the style stage is fatal. Cutout falls back to the original photo,
//! finish falls back to hosting (or returning) the raw FAL output, and a
//! persistence failure is reported as `saved: false`.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::db::{CardStore, GeneratedCard};
use crate::error::ApiError;
use crate::middleware::metrics::Metrics;
use crate::middleware::rate_limit::{KeyedRateLimiter, RateLimitError};
use crate::services::clipdrop::ClipdropClient;
use crate::services::cloudinary::{CloudinaryClient, UploadSource};
use crate::services::fal::{FalClient, FalError};
use crate::services::images::ImageFetcher;
use crate::utils::{mask_email, non_empty, normalize_email};

/// Generations allowed per email per hour
const GENERATIONS_PER_HOUR: u32 = 10;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Image generation failed: {0}")]
    Generation(#[from] FalError),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Too many generations requested")]
    RateLimited(#[from] RateLimitError),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Generation(e) => ApiError::upstream("FAL", e.to_string()),
            PipelineError::NotConfigured(service) => {
                ApiError::ServiceUnavailable(format!("{} is not configured", service))
            }
            PipelineError::RateLimited(limit) => limit.into(),
        }
    }
}

/// Validated generation input
#[derive(Debug, Clone, Default)]
pub struct PostcardRequest {
    pub user_image_url: String,
    pub dish_image_url: String,
    pub background_image_url: String,
    pub email: Option<String>,
    pub dish: Option<String>,
    pub background: Option<String>,
    pub greeting: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Processed,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub cutout: StageOutcome,
    pub finish: StageOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostcardResult {
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
    pub saved: bool,
    pub stages: StageReport,
}

pub struct PostcardPipeline {
    fetcher: ImageFetcher,
    clipdrop: Option<ClipdropClient>,
    fal: Option<FalClient>,
    cloudinary: Option<CloudinaryClient>,
    cards: Arc<dyn CardStore>,
    prompt: String,
    limiter: KeyedRateLimiter,
    metrics: Metrics,
}

impl PostcardPipeline {
    pub fn new(
        fetcher: ImageFetcher,
        clipdrop: Option<ClipdropClient>,
        fal: Option<FalClient>,
        cloudinary: Option<CloudinaryClient>,
        cards: Arc<dyn CardStore>,
        prompt: impl Into<String>,
        metrics: Metrics,
    ) -> Self {
        Self {
            fetcher,
            clipdrop,
            fal,
            cloudinary,
            cards,
            prompt: prompt.into(),
            limiter: KeyedRateLimiter::new("generate", GENERATIONS_PER_HOUR, Duration::from_secs(3600)),
            metrics,
        }
    }

    pub async fn run(&self, request: PostcardRequest) -> Result<PostcardResult, PipelineError> {
        let fal = self.fal.as_ref().ok_or(PipelineError::NotConfigured("FAL"))?;

        let email = request.email.as_deref().map(normalize_email).filter(|e| !e.is_empty());
        if let Some(email) = &email {
            self.limiter.check(email).await?;
        }

        let (person_url, cutout) = match self.cutout(&request.user_image_url).await {
            Ok(url) => (url, StageOutcome::Processed),
            Err(reason) => {
                tracing::warn!(reason = %reason, "Cutout stage fell back to the original photo");
                self.metrics.record_pipeline_fallback("cutout");
                (request.user_image_url.clone(), StageOutcome::Fallback)
            }
        };

        let inputs = vec![
            person_url,
            request.dish_image_url.clone(),
            request.background_image_url.clone(),
        ];
        let generated_url = fal.generate(&self.prompt, &inputs).await?;

        let (image_url, finish) = match self.finish(&generated_url).await {
            Ok(url) => (url, StageOutcome::Processed),
            Err(reason) => {
                tracing::warn!(reason = %reason, "Finish stage fell back to the generated image");
                self.metrics.record_pipeline_fallback("finish");
                (self.host_raw(&generated_url).await, StageOutcome::Fallback)
            }
        };

        let mut card = GeneratedCard::new(image_url.clone(), Utc::now().timestamp());
        card.email = email;
        card.dish = non_empty(request.dish.as_deref());
        card.background = non_empty(request.background.as_deref());
        card.greeting = non_empty(request.greeting.as_deref());

        let (card_id, saved) = match self.cards.insert_card(&card).await {
            Ok(()) => (Some(card.id.clone()), true),
            Err(e) => {
                tracing::error!(error = %e, "Failed to save generated card");
                (None, false)
            }
        };

        self.metrics.record_card_generated();
        tracing::info!(
            card_id = ?card_id,
            email = ?card.email.as_deref().map(mask_email),
            cutout = ?cutout,
            finish = ?finish,
            "Postcard generated"
        );

        Ok(PostcardResult {
            image_url,
            card_id,
            saved,
            stages: StageReport { cutout, finish },
        })
    }

    /// Background-free copy of `url`, hosted in `folder`
    async fn remove_and_host(&self, url: &str, folder_of: fn(&CloudinaryClient) -> &str) -> Result<String, String> {
        let clipdrop = self.clipdrop.as_ref().ok_or("Clipdrop is not configured")?;
        let cloudinary = self.cloudinary.as_ref().ok_or("Cloudinary is not configured")?;

        let image = self.fetcher.fetch(url).await.map_err(|e| e.to_string())?;
        let cutout = clipdrop.remove_background(&image).await.map_err(|e| e.to_string())?;
        let asset = cloudinary
            .upload(UploadSource::Bytes(cutout), folder_of(cloudinary))
            .await
            .map_err(|e| e.to_string())?;

        Ok(asset.secure_url)
    }

    async fn cutout(&self, user_image_url: &str) -> Result<String, String> {
        self.remove_and_host(user_image_url, CloudinaryClient::upload_folder).await
    }

    async fn finish(&self, generated_url: &str) -> Result<String, String> {
        self.remove_and_host(generated_url, CloudinaryClient::generated_folder).await
    }

    /// Host the unprocessed FAL output, or hand back its URL if that fails
    async fn host_raw(&self, generated_url: &str) -> String {
        let Some(cloudinary) = &self.cloudinary else {
            return generated_url.to_string();
        };

        match cloudinary
            .upload(
                UploadSource::RemoteUrl(generated_url.to_string()),
                cloudinary.generated_folder(),
            )
            .await
        {
            Ok(asset) => asset.secure_url,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to host generated image, returning FAL URL");
                generated_url.to_string()
            }
        }
    }
}
