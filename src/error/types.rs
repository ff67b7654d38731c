//! API error types

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepoError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("Too many attempts: {0}")]
    TooManyAttempts(String),

    #[error("{service} error: {message}")]
    Upstream { service: &'static str, message: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimitExceeded { .. } | ApiError::TooManyAttempts(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateLimitExceeded { .. } => "rate_limited",
            ApiError::TooManyAttempts(_) => "too_many_attempts",
            ApiError::Upstream { .. } => "upstream_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::DatabaseError(_) => "database_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::InvalidCursor => ApiError::bad_request("Invalid pagination cursor"),
            RepoError::NotFound => ApiError::NotFound("Record not found".to_string()),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            ApiError::InvalidRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::TooManyAttempts(msg)
            | ApiError::ServiceUnavailable(msg) => msg.clone(),
            ApiError::Validation(errors) => errors.to_string(),
            ApiError::RateLimitExceeded { retry_after_seconds } => format!(
                "Too many requests. Please retry after {} seconds.",
                retry_after_seconds
            ),
            ApiError::Upstream { service, message } => {
                tracing::error!(service = %service, error = %message, "Upstream service failed");
                format!("{} request failed", service)
            }
            ApiError::DatabaseError(msg) => {
                tracing::error!(error = %msg, "Database error");
                "A database error occurred".to_string()
            }
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                "An internal error occurred".to_string()
            }
        };

        let retry_after = match &self {
            ApiError::RateLimitExceeded { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });

        let mut response = (status, body).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// JSON error body returned by every endpoint
#[derive(Debug, Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
