//! Transactional email
//!
//! Verification codes are delivered through Brevo's SMTP API. Without an API
//! key the [`LogMailer`] stands in and writes the message to the log instead.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmailConfig;
use crate::utils::{is_transient_status, is_transient_transport, mask_email, RetryPolicy};

/// Errors that can occur when sending mail
#[derive(Error, Debug)]
pub enum MailError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail provider rejected the message: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("Mail delivery is not configured")]
    NotConfigured,
}

impl MailError {
    fn is_transient(&self) -> bool {
        match self {
            MailError::Http(e) => is_transient_transport(e),
            MailError::Rejected { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_transient_status)
                .unwrap_or(false),
            MailError::NotConfigured => false,
        }
    }
}

/// A single outgoing message
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl EmailMessage {
    /// Message carrying a verification code
    pub fn verification_code(to_email: &str, subject: &str, code: &str, ttl_minutes: u64) -> Self {
        let text = format!(
            "Your verification code is {code}.\n\nIt expires in {ttl_minutes} minutes. \
             If you did not request it, you can ignore this email."
        );
        let html = format!(
            "<div style=\"font-family:sans-serif\">\
             <p>Your verification code is</p>\
             <p style=\"font-size:28px;font-weight:bold;letter-spacing:6px\">{code}</p>\
             <p>It expires in {ttl_minutes} minutes. If you did not request it, you can ignore this email.</p>\
             </div>"
        );

        Self {
            to_email: to_email.to_string(),
            to_name: None,
            subject: subject.to_string(),
            text,
            html,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

// ============================================================================
// Brevo
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoContact<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoEmail<'a> {
    sender: BrevoContact<'a>,
    to: Vec<BrevoContact<'a>>,
    subject: &'a str,
    html_content: &'a str,
    text_content: &'a str,
}

/// Brevo (`POST /v3/smtp/email`) mailer
#[derive(Clone)]
pub struct BrevoMailer {
    client: Client,
    api_key: String,
    base_url: String,
    sender_email: String,
    sender_name: String,
    retry: RetryPolicy,
}

impl BrevoMailer {
    pub fn new(config: &EmailConfig, retry: RetryPolicy) -> Result<Self, MailError> {
        let api_key = config.brevo_api_key.clone().ok_or(MailError::NotConfigured)?;
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.brevo_base_url.trim_end_matches('/').to_string(),
            sender_email: config.sender_email.clone(),
            sender_name: config.sender_name.clone(),
            retry,
        })
    }

    async fn send_once(&self, message: &EmailMessage) -> Result<(), MailError> {
        let body = BrevoEmail {
            sender: BrevoContact {
                email: &self.sender_email,
                name: Some(&self.sender_name),
            },
            to: vec![BrevoContact {
                email: &message.to_email,
                name: message.to_name.as_deref(),
            }],
            subject: &message.subject,
            html_content: &message.html,
            text_content: &message.text,
        };

        let response = self
            .client
            .post(format!("{}/v3/smtp/email", self.base_url))
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Mailer for BrevoMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        self.retry
            .run("brevo.send", MailError::is_transient, || self.send_once(message))
            .await?;

        tracing::info!(to = %mask_email(&message.to_email), "Email sent via Brevo");
        Ok(())
    }
}

/// Development mailer that only logs messages
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        tracing::warn!(
            to = %mask_email(&message.to_email),
            subject = %message.subject,
            body = %message.text,
            "Mail delivery not configured, logging message instead"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn config(base_url: &str) -> EmailConfig {
        EmailConfig {
            brevo_api_key: Some("brevo-key".to_string()),
            brevo_base_url: base_url.to_string(),
            ..EmailConfig::default()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::vendor(2)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_requires_api_key() {
        let result = BrevoMailer::new(&EmailConfig::default(), RetryPolicy::none());
        assert!(matches!(result, Err(MailError::NotConfigured)));
    }

    #[test]
    fn test_verification_message_contains_code() {
        let message = EmailMessage::verification_code("ana@example.com", "Code", "123456", 10);
        assert!(message.text.contains("123456"));
        assert!(message.html.contains("123456"));
        assert!(message.text.contains("10 minutes"));
    }

    #[tokio::test]
    async fn test_sends_brevo_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/smtp/email")
            .match_header("api-key", "brevo-key")
            .match_body(Matcher::PartialJson(json!({
                "to": [{"email": "ana@example.com"}],
                "subject": "Code",
                "sender": {"email": "no-reply@postcard.studio"}
            })))
            .with_status(201)
            .with_body(r#"{"messageId":"<abc@brevo>"}"#)
            .create_async()
            .await;

        let mailer = BrevoMailer::new(&config(&server.url()), fast_retry()).unwrap();
        let message = EmailMessage::verification_code("ana@example.com", "Code", "123456", 10);

        mailer.send(&message).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/smtp/email")
            .with_status(400)
            .with_body(r#"{"code":"invalid_parameter"}"#)
            .expect(1)
            .create_async()
            .await;

        let mailer = BrevoMailer::new(&config(&server.url()), fast_retry()).unwrap();
        let message = EmailMessage::verification_code("ana@example.com", "Code", "123456", 10);

        let err = mailer.send(&message).await.unwrap_err();
        assert!(matches!(err, MailError::Rejected { status: 400, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/smtp/email")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let mailer = BrevoMailer::new(&config(&server.url()), fast_retry()).unwrap();
        let message = EmailMessage::verification_code("ana@example.com", "Code", "123456", 10);

        assert!(mailer.send(&message).await.is_err());
        mock.assert_async().await;
    }
}
