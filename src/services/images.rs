//! Image payloads and remote image download
//!
//! Image URLs come from unauthenticated clients, so downloads are limited to
//! https URLs on public addresses unless private hosts are explicitly allowed.

use reqwest::{redirect, Client, Url};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use thiserror::Error;

use crate::utils::{is_transient_transport, RetryPolicy};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image download failed with status {0}")]
    Status(u16),

    #[error("Not an image: {0}")]
    NotAnImage(String),

    #[error("Image is {actual} bytes, limit is {limit}")]
    TooLarge { actual: usize, limit: usize },

    #[error("Refusing to download from {0}")]
    Blocked(String),
}

/// Raw image with its media type
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBytes {
    pub data: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

impl ImageBytes {
    pub fn new(data: Vec<u8>, content_type: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            data,
            content_type: content_type.into(),
            filename: filename.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Whether a declared media type is an image (`image/png`, `image/jpeg; q=..`)
pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

/// File extension matching an image media type
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        _ => "jpg",
    }
}

/// Whether `ip` is routable on the public internet
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (64..128).contains(&b);
    let reserved = a == 0 || a >= 240;

    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        || shared
        || reserved)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = first & 0xfe00 == 0xfc00;
    let link_local = first & 0xffc0 == 0xfe80;

    !(ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || unique_local || link_local)
}

/// Downloads images referenced by URL (uploaded photos, FAL output)
#[derive(Clone)]
pub struct ImageFetcher {
    client: Client,
    max_bytes: usize,
    retry: RetryPolicy,
    allow_private_hosts: bool,
}

impl ImageFetcher {
    pub fn new(max_bytes: usize, timeout: Duration, retry: RetryPolicy) -> Result<Self, ImageError> {
        // Redirects could lead past the destination check
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            max_bytes,
            retry,
            allow_private_hosts: false,
        })
    }

    /// Also accept plain http and loopback or private-network hosts
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Reject URLs that are not https or that resolve to non-public addresses
    async fn check_destination(&self, url: &str) -> Result<(), ImageError> {
        if self.allow_private_hosts {
            return Ok(());
        }

        let blocked = |reason: &str| ImageError::Blocked(format!("{} ({})", url, reason));

        let parsed = Url::parse(url).map_err(|_| blocked("invalid URL"))?;
        if parsed.scheme() != "https" {
            return Err(blocked("https required"));
        }
        let host = parsed.host_str().ok_or_else(|| blocked("missing host"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        if let Ok(ip) = host.parse::<IpAddr>() {
            return if is_public_ip(ip) {
                Ok(())
            } else {
                Err(blocked("non-public address"))
            };
        }

        // TODO: pin the checked address on the request so a DNS answer that
        // changes between lookup and connect cannot reach a private host.
        let port = parsed.port_or_known_default().unwrap_or(443);
        let addrs: Vec<_> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| blocked("host does not resolve"))?
            .collect();

        if addrs.is_empty() {
            return Err(blocked("host does not resolve"));
        }
        if addrs.iter().any(|addr| !is_public_ip(addr.ip())) {
            return Err(blocked("non-public address"));
        }
        Ok(())
    }

    async fn fetch_once(&self, url: &str) -> Result<ImageBytes, ImageError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_bytes {
                return Err(ImageError::TooLarge {
                    actual: length as usize,
                    limit: self.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        if !is_image_content_type(&content_type) {
            return Err(ImageError::NotAnImage(content_type));
        }

        let data = response.bytes().await?.to_vec();
        if data.len() > self.max_bytes {
            return Err(ImageError::TooLarge {
                actual: data.len(),
                limit: self.max_bytes,
            });
        }

        let filename = format!("image.{}", extension_for(&content_type));
        Ok(ImageBytes::new(data, content_type, filename))
    }

    /// Download `url`, rejecting non-images and oversized bodies
    pub async fn fetch(&self, url: &str) -> Result<ImageBytes, ImageError> {
        self.check_destination(url).await?;

        let is_retryable = |e: &ImageError| match e {
            ImageError::Http(err) => is_transient_transport(err),
            ImageError::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        };

        let image = self
            .retry
            .run("image.fetch", is_retryable, || self.fetch_once(url))
            .await?;

        tracing::debug!(bytes = image.len(), content_type = %image.content_type, "Downloaded image");
        Ok(image)
    }
}
