//! Clipdrop background removal
//!
//! `POST {base}/remove-background/v1` with the photo as multipart field
//! `image_file`; the response body is the cut-out PNG.

use reqwest::{multipart, Client};
use std::time::Duration;
use thiserror::Error;

use crate::config::ClipdropConfig;
use crate::services::images::ImageBytes;
use crate::utils::{is_transient_status, is_transient_transport, RetryPolicy};

#[derive(Error, Debug)]
pub enum ClipdropError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Empty response body")]
    EmptyResponse,

    #[error("Missing API key")]
    MissingApiKey,
}

impl ClipdropError {
    fn is_transient(&self) -> bool {
        match self {
            ClipdropError::Http(e) => is_transient_transport(e),
            ClipdropError::Api { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_transient_status)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct ClipdropClient {
    client: Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl ClipdropClient {
    pub fn new(config: &ClipdropConfig, retry: RetryPolicy) -> Result<Self, ClipdropError> {
        let api_key = config.api_key.clone().ok_or(ClipdropError::MissingApiKey)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    async fn remove_background_once(&self, image: &ImageBytes) -> Result<ImageBytes, ClipdropError> {
        let part = multipart::Part::bytes(image.data.clone())
            .file_name(image.filename.clone())
            .mime_str(&image.content_type)?;
        let form = multipart::Form::new().part("image_file", part);

        let response = self
            .client
            .post(format!("{}/remove-background/v1", self.base_url))
            .header("x-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClipdropError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let data = response.bytes().await?.to_vec();
        if data.is_empty() {
            return Err(ClipdropError::EmptyResponse);
        }

        Ok(ImageBytes::new(data, "image/png", "cutout.png"))
    }

    /// Cut the subject out of `image`, returning a transparent PNG
    pub async fn remove_background(&self, image: &ImageBytes) -> Result<ImageBytes, ClipdropError> {
        tracing::debug!(bytes = image.len(), "Calling Clipdrop remove-background");

        self.retry
            .run("clipdrop.remove_background", ClipdropError::is_transient, || {
                self.remove_background_once(image)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(base_url: &str) -> ClipdropClient {
        let config = ClipdropConfig {
            api_key: Some("clip-key".to_string()),
            base_url: base_url.to_string(),
            timeout_seconds: 5,
        };
        ClipdropClient::new(&config, RetryPolicy::none()).unwrap()
    }

    fn photo() -> ImageBytes {
        ImageBytes::new(vec![1, 2, 3], "image/jpeg", "photo.jpg")
    }

    #[test]
    fn test_requires_api_key() {
        let result = ClipdropClient::new(&ClipdropConfig::default(), RetryPolicy::none());
        assert!(matches!(result, Err(ClipdropError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_remove_background_returns_png() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/remove-background/v1")
            .match_header("x-api-key", "clip-key")
            .match_body(Matcher::Regex("name=\"image_file\"".to_string()))
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(vec![9, 9, 9])
            .create_async()
            .await;

        let cutout = client(&server.url()).remove_background(&photo()).await.unwrap();

        assert_eq!(cutout.data, vec![9, 9, 9]);
        assert_eq!(cutout.content_type, "image/png");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/remove-background/v1")
            .with_status(402)
            .with_body(r#"{"error":"Not enough credits"}"#)
            .create_async()
            .await;

        let err = client(&server.url()).remove_background(&photo()).await.unwrap_err();
        assert!(matches!(err, ClipdropError::Api { status: 402, .. }));
    }
}
