//! Email verification and registration endpoints

use axum::{extract::State, Json};
use chrono::Utc;
use validator::Validate;

use crate::error::ApiError;
use crate::schemas::{SendOtpRequest, SendOtpResponse, VerifyOtpRequest, VerifyOtpResponse};
use crate::server::state::AppState;
use crate::utils::mask_email;

/// Email a verification code
///
/// POST /api/send-otp
pub async fn send_otp(
    State(state): State<AppState>,
    Json(request): Json<SendOtpRequest>,
) -> Result<Json<SendOtpResponse>, ApiError> {
    let request = request.normalized();
    request.validate()?;

    let issued = state.otp.issue(&request.email, request.name.as_deref()).await?;

    Ok(Json(SendOtpResponse {
        message: "Verification code sent".to_string(),
        email: issued.email,
        expires_at: issued.expires_at,
        expires_in: state.settings.otp.ttl_seconds,
    }))
}

/// Check the code and register (or update) the user
///
/// POST /api/verify-otp
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, ApiError> {
    let request = request.normalized();
    request.validate()?;

    state.otp.verify(&request.email, &request.otp).await?;

    let outcome = state
        .storage
        .users
        .upsert_verified(&request.profile(), Utc::now().timestamp())
        .await?;

    tracing::info!(
        email = %mask_email(&outcome.user.email),
        created = outcome.created,
        "User verified"
    );

    Ok(Json(VerifyOtpResponse {
        verified: true,
        created: outcome.created,
        user: outcome.user,
    }))
}
