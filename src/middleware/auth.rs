//! Admin authentication
//!
//! The dashboard logs in with the configured admin credentials and receives
//! an HS256 JWT. Admin routes require it as `Authorization: Bearer <token>`.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::AdminConfig;
use crate::error::ApiError;

pub const ADMIN_ROLE: &str = "admin";

// ============================================================================
// Claims
// ============================================================================

/// JWT claims; inserted into request extensions after authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Token handed back by a successful login
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub expires_at: i64,
}

// ============================================================================
// Authentication Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Admin role required")]
    WrongRole,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Admin login is disabled")]
    LoginDisabled,

    #[error("Token signing failed: {0}")]
    Signing(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken | AuthError::InvalidCredentials => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::WrongRole => ApiError::Forbidden(err.to_string()),
            AuthError::LoginDisabled => {
                ApiError::ServiceUnavailable("Admin login is not configured".to_string())
            }
            AuthError::Signing(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

// ============================================================================
// Token issuing and verification
// ============================================================================

pub struct AdminAuth {
    username: String,
    password: Option<String>,
    token_ttl_seconds: u64,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AdminAuth {
    pub fn new(config: &AdminConfig) -> Self {
        let secret = match &config.jwt_secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                tracing::warn!("ADMIN_JWT_SECRET not set, using a per-process secret; admin sessions end on restart");
                let mut secret = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                secret
            }
        };

        if config.password.is_none() {
            tracing::warn!("ADMIN_PASSWORD not set, admin login is disabled");
        }

        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            token_ttl_seconds: config.token_ttl_seconds,
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
        }
    }

    /// Check credentials and issue a token
    pub fn login(&self, username: &str, password: &str) -> Result<IssuedToken, AuthError> {
        let expected = self.password.as_deref().ok_or(AuthError::LoginDisabled)?;

        // Compare fixed-length digests so the check does not depend on input length
        let user_ok = digest(username) == digest(&self.username);
        let password_ok = digest(password) == digest(expected);
        if !(user_ok && password_ok) {
            tracing::warn!(username = %username, "Admin login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.issue(username, Utc::now().timestamp())?;
        tracing::info!(username = %username, "Admin logged in");
        Ok(token)
    }

    fn issue(&self, subject: &str, now: i64) -> Result<IssuedToken, AuthError> {
        let claims = AdminClaims {
            sub: subject.to_string(),
            role: ADMIN_ROLE.to_string(),
            iat: now,
            exp: now + self.token_ttl_seconds as i64,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            token_type: "Bearer",
            expires_in: self.token_ttl_seconds,
            expires_at: claims.exp,
        })
    }

    /// Validate signature, expiry and role
    pub fn verify(&self, token: &str) -> Result<AdminClaims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<AdminClaims>(token, &self.decoding, &validation).map_err(|e| {
            tracing::debug!(error = %e, "Rejected admin token");
            AuthError::InvalidToken
        })?;

        if data.claims.role != ADMIN_ROLE {
            return Err(AuthError::WrongRole);
        }

        Ok(data.claims)
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Bearer token from the `Authorization` header
pub fn extract_bearer<B>(request: &Request<B>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Middleware guarding admin routes
///
/// # Errors
/// - 401 Unauthorized: missing, malformed or expired token
/// - 403 Forbidden: token without the admin role
pub async fn require_admin(
    State(auth): State<Arc<AdminAuth>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(token) = extract_bearer(&request) else {
        tracing::warn!(path = %request.uri().path(), "Admin request without bearer token");
        return Err(AuthError::MissingToken);
    };

    let claims = auth.verify(token)?;
    tracing::debug!(sub = %claims.sub, "Admin authenticated");

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn config() -> AdminConfig {
        AdminConfig {
            username: "admin".to_string(),
            password: Some("hunter2".to_string()),
            jwt_secret: Some("test-secret".to_string()),
            token_ttl_seconds: 3600,
        }
    }

    #[test]
    fn test_login_and_verify() {
        let auth = AdminAuth::new(&config());
        let issued = auth.login("admin", "hunter2").unwrap();

        assert_eq!(issued.token_type, "Bearer");
        assert_eq!(issued.expires_in, 3600);

        let claims = auth.verify(&issued.token).unwrap();
        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.role, ADMIN_ROLE);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_wrong_credentials() {
        let auth = AdminAuth::new(&config());
        assert!(matches!(auth.login("admin", "nope"), Err(AuthError::InvalidCredentials)));
        assert!(matches!(auth.login("root", "hunter2"), Err(AuthError::InvalidCredentials)));
    }

    #[test]
    fn test_login_disabled_without_password() {
        let auth = AdminAuth::new(&AdminConfig {
            password: None,
            ..config()
        });
        let err = auth.login("admin", "").unwrap_err();
        assert_eq!(ApiError::from(err).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_rejects_expired_and_foreign_tokens() {
        let auth = AdminAuth::new(&config());

        let expired = auth.issue("admin", Utc::now().timestamp() - 7200).unwrap();
        assert!(matches!(auth.verify(&expired.token), Err(AuthError::InvalidToken)));

        let other = AdminAuth::new(&AdminConfig {
            jwt_secret: Some("other-secret".to_string()),
            ..config()
        });
        let foreign = other.login("admin", "hunter2").unwrap();
        assert!(matches!(auth.verify(&foreign.token), Err(AuthError::InvalidToken)));

        assert!(matches!(auth.verify("not-a-jwt"), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_rejects_non_admin_role() {
        let claims = AdminClaims {
            sub: "viewer".to_string(),
            role: "viewer".to_string(),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let auth = AdminAuth::new(&config());
        let err = auth.verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::WrongRole));
        assert_eq!(ApiError::from(err).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_extract_bearer() {
        let request = Request::builder()
            .header("authorization", "Bearer abc.def.ghi")
            .body(())
            .unwrap();
        assert_eq!(extract_bearer(&request), Some("abc.def.ghi"));

        let basic = Request::builder()
            .header("authorization", "Basic Zm9vOmJhcg==")
            .body(())
            .unwrap();
        assert_eq!(extract_bearer(&basic), None);
    }

    #[test]
    fn test_random_secret_when_unset() {
        let a = AdminAuth::new(&AdminConfig {
            jwt_secret: None,
            ..config()
        });
        let b = AdminAuth::new(&AdminConfig {
            jwt_secret: None,
            ..config()
        });

        let token = a.login("admin", "hunter2").unwrap().token;
        assert!(a.verify(&token).is_ok());
        assert!(b.verify(&token).is_err());
    }
}
