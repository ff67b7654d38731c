//! Cloudinary media hosting
//!
//! Signed uploads (server-side, or direct from the browser with a signature
//! issued here) and the Admin search API used by the dashboard.
//!
//! Signatures are SHA-256 hex digests of the sorted `key=value` parameters
//! joined by `&`, followed by the API secret. The Cloudinary account must be
//! set to accept SHA-256 signatures.

use chrono::{DateTime, Utc};
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::CloudinaryConfig;
use crate::services::images::ImageBytes;
use crate::utils::{is_transient_status, is_transient_transport, truncate_str, RetryPolicy};

#[derive(Error, Debug)]
pub enum CloudinaryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Cloudinary credentials are not configured")]
    NotConfigured,
}

impl CloudinaryError {
    fn is_transient(&self) -> bool {
        match self {
            CloudinaryError::Http(e) => is_transient_transport(e),
            CloudinaryError::Api { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_transient_status)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Sign upload parameters.
///
/// Empty values are left out, as Cloudinary does when it verifies.
pub fn sign(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parameters a browser needs to upload straight to Cloudinary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedUpload {
    pub signature: String,
    pub timestamp: i64,
    pub api_key: String,
    pub cloud_name: String,
    pub folder: String,
    pub upload_url: String,
}

/// What to upload
#[derive(Debug, Clone)]
pub enum UploadSource {
    Bytes(ImageBytes),
    /// Cloudinary fetches the image itself
    RemoteUrl(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedAsset {
    pub secure_url: String,
    pub public_id: String,
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudinaryResource {
    pub public_id: String,
    #[serde(default)]
    pub secure_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub resources: Vec<CloudinaryResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    expression: String,
    max_results: u32,
    sort_by: [BTreeMap<&'static str, &'static str>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    next_cursor: Option<&'a str>,
}

#[derive(Clone)]
pub struct CloudinaryClient {
    client: Client,
    config: CloudinaryConfig,
    retry: RetryPolicy,
}

impl CloudinaryClient {
    pub fn new(config: &CloudinaryConfig, retry: RetryPolicy) -> Result<Self, CloudinaryError> {
        if !config.is_configured() {
            return Err(CloudinaryError::NotConfigured);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            retry,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/v1_1/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.cloud_name,
            path
        )
    }

    pub fn upload_folder(&self) -> &str {
        &self.config.upload_folder
    }

    pub fn generated_folder(&self) -> &str {
        &self.config.generated_folder
    }

    /// Signature for a direct browser upload into `folder`
    pub fn signed_upload(&self, folder: &str, timestamp: i64) -> SignedUpload {
        let mut params = BTreeMap::new();
        params.insert("folder", folder.to_string());
        params.insert("timestamp", timestamp.to_string());

        SignedUpload {
            signature: sign(&params, &self.config.api_secret),
            timestamp,
            api_key: self.config.api_key.clone(),
            cloud_name: self.config.cloud_name.clone(),
            folder: folder.to_string(),
            upload_url: self.api_url("image/upload"),
        }
    }

    async fn upload_once(&self, source: &UploadSource, folder: &str) -> Result<UploadedAsset, CloudinaryError> {
        let timestamp = Utc::now().timestamp();
        let mut params = BTreeMap::new();
        params.insert("folder", folder.to_string());
        params.insert("timestamp", timestamp.to_string());
        let signature = sign(&params, &self.config.api_secret);

        let file = match source {
            UploadSource::Bytes(image) => multipart::Part::bytes(image.data.clone())
                .file_name(image.filename.clone())
                .mime_str(&image.content_type)?,
            UploadSource::RemoteUrl(url) => multipart::Part::text(url.clone()),
        };

        let form = multipart::Form::new()
            .part("file", file)
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp.to_string())
            .text("folder", folder.to_string())
            .text("signature", signature);

        let response = self
            .client
            .post(self.api_url("image/upload"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CloudinaryError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!(error = %e, body = %truncate_str(&text, 500), "Failed to parse Cloudinary upload response");
            CloudinaryError::Parse(e.to_string())
        })
    }

    /// Upload an image into `folder`
    pub async fn upload(&self, source: UploadSource, folder: &str) -> Result<UploadedAsset, CloudinaryError> {
        let asset = self
            .retry
            .run("cloudinary.upload", CloudinaryError::is_transient, || {
                self.upload_once(&source, folder)
            })
            .await?;

        tracing::info!(public_id = %asset.public_id, folder = %folder, "Uploaded image to Cloudinary");
        Ok(asset)
    }

    async fn search_once(
        &self,
        folder: &str,
        cursor: Option<&str>,
        max_results: u32,
    ) -> Result<SearchPage, CloudinaryError> {
        let mut sort = BTreeMap::new();
        sort.insert("created_at", "desc");

        let body = SearchRequest {
            expression: format!("folder=\"{}\"", folder),
            max_results: max_results.clamp(1, 500),
            sort_by: [sort],
            next_cursor: cursor,
        };

        let response = self
            .client
            .post(self.api_url("resources/search"))
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CloudinaryError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| CloudinaryError::Parse(e.to_string()))
    }

    /// One page of resources in `folder`, newest first
    pub async fn search(
        &self,
        folder: &str,
        cursor: Option<&str>,
        max_results: u32,
    ) -> Result<SearchPage, CloudinaryError> {
        self.retry
            .run("cloudinary.search", CloudinaryError::is_transient, || {
                self.search_once(folder, cursor, max_results)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn config(base_url: &str) -> CloudinaryConfig {
        CloudinaryConfig {
            cloud_name: "demo".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            base_url: base_url.to_string(),
            ..CloudinaryConfig::default()
        }
    }

    #[test]
    fn test_sign_known_vector() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1700000000".to_string());
        params.insert("folder", "postcards/uploads".to_string());

        assert_eq!(
            sign(&params, "abcd"),
            "90cc5badefa99a1d29af0a0409e5cb3711fdc4575d0c396c88851491dd0ad6ad"
        );
    }

    #[test]
    fn test_sign_sorts_and_skips_empty() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1700000000".to_string());
        params.insert("public_id", "card-1".to_string());
        params.insert("folder", "postcards/generated".to_string());
        params.insert("tags", String::new());

        assert_eq!(
            sign(&params, "abcd"),
            "ffb35d87db5efe5335a98e9a1197c9669ce921ac5e44f63eb569144ae13ae463"
        );
    }

    #[test]
    fn test_requires_credentials() {
        let result = CloudinaryClient::new(&CloudinaryConfig::default(), RetryPolicy::none());
        assert!(matches!(result, Err(CloudinaryError::NotConfigured)));
    }

    #[test]
    fn test_signed_upload() {
        let client = CloudinaryClient::new(&config("https://api.cloudinary.com"), RetryPolicy::none()).unwrap();
        let signed = client.signed_upload("postcards/uploads", 1_700_000_000);

        assert_eq!(signed.api_key, "key");
        assert_eq!(signed.cloud_name, "demo");
        assert_eq!(signed.upload_url, "https://api.cloudinary.com/v1_1/demo/image/upload");
        assert_eq!(signed.signature.len(), 64);
    }

    #[tokio::test]
    async fn test_upload_remote_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1_1/demo/image/upload")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("https://fal.media/out.png".to_string()),
                Matcher::Regex("name=\"signature\"".to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"secure_url":"https://res.cloudinary.com/demo/card.png","public_id":"postcards/generated/card"}"#)
            .create_async()
            .await;

        let client = CloudinaryClient::new(&config(&server.url()), RetryPolicy::none()).unwrap();
        let asset = client
            .upload(
                UploadSource::RemoteUrl("https://fal.media/out.png".to_string()),
                "postcards/generated",
            )
            .await
            .unwrap();

        assert_eq!(asset.secure_url, "https://res.cloudinary.com/demo/card.png");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_uses_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1_1/demo/resources/search")
            .match_header("authorization", "Basic a2V5OnNlY3JldA==")
            .match_body(Matcher::PartialJson(json!({
                "expression": "folder=\"postcards/generated\"",
                "max_results": 50
            })))
            .with_status(200)
            .with_body(
                r#"{"total_count":2,"next_cursor":"abc","resources":[
                    {"public_id":"a","secure_url":"https://x/a.png","created_at":"2024-12-24T10:00:00Z"},
                    {"public_id":"b","secure_url":"https://x/b.png","created_at":"2024-12-25T10:00:00Z"}]}"#,
            )
            .create_async()
            .await;

        let client = CloudinaryClient::new(&config(&server.url()), RetryPolicy::none()).unwrap();
        let page = client.search("postcards/generated", None, 50).await.unwrap();

        assert_eq!(page.total_count, 2);
        assert_eq!(page.resources.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
        mock.assert_async().await;
    }
}
