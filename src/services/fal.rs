//! FAL AI image generation
//!
//! Synchronous run endpoint: `POST {base}/{model}` with a prompt and the
//! input image URLs, answered with `{"images": [{"url": ...}]}`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::FalConfig;
use crate::utils::{is_transient_status, is_transient_transport, truncate_str, RetryPolicy};

#[derive(Error, Debug)]
pub enum FalError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Response contained no images")]
    NoImages,

    #[error("Missing API key")]
    MissingApiKey,
}

impl FalError {
    fn is_transient(&self) -> bool {
        match self {
            FalError::Http(e) => is_transient_transport(e),
            FalError::Api { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_transient_status)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct FalRequest<'a> {
    prompt: &'a str,
    image_urls: &'a [String],
    num_images: u32,
    output_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct FalResponse {
    #[serde(default)]
    images: Vec<FalImage>,
}

#[derive(Debug, Deserialize)]
struct FalImage {
    url: String,
}

#[derive(Clone)]
pub struct FalClient {
    client: Client,
    api_key: String,
    endpoint: String,
    retry: RetryPolicy,
}

impl FalClient {
    pub fn new(config: &FalConfig, retry: RetryPolicy) -> Result<Self, FalError> {
        let api_key = config.api_key.clone().ok_or(FalError::MissingApiKey)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let endpoint = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.model.trim_start_matches('/')
        );

        Ok(Self {
            client,
            api_key,
            endpoint,
            retry,
        })
    }

    async fn generate_once(&self, prompt: &str, image_urls: &[String]) -> Result<String, FalError> {
        let body = FalRequest {
            prompt,
            image_urls,
            num_images: 1,
            output_format: "png",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Key {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(FalError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: FalResponse = serde_json::from_str(&text).map_err(|e| {
            tracing::error!(error = %e, body = %truncate_str(&text, 500), "Failed to parse FAL response");
            FalError::Parse(e.to_string())
        })?;

        parsed
            .images
            .into_iter()
            .map(|image| image.url)
            .find(|url| !url.is_empty())
            .ok_or(FalError::NoImages)
    }

    /// Generate one image from `prompt` and the input images; returns its URL
    pub async fn generate(&self, prompt: &str, image_urls: &[String]) -> Result<String, FalError> {
        tracing::info!(endpoint = %self.endpoint, inputs = image_urls.len(), "Calling FAL generation");

        self.retry
            .run("fal.generate", FalError::is_transient, || self.generate_once(prompt, image_urls))
            .await
    }
}
