//! Health check endpoints
//!
//! Liveness, readiness and Prometheus metrics for monitoring and container
//! orchestration (Kubernetes, ECS, etc.)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::error::ApiError;
use crate::server::state::AppState;

/// Response for the main health check endpoint
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub uptime_seconds: u64,
}

/// Response for readiness probe
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: ReadinessChecks,
}

/// Individual readiness checks
#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub storage_backend: &'static str,
    pub storage: bool,
    /// Vendor integrations are optional; reported, never gating
    pub cloudinary_configured: bool,
}

#[derive(Serialize)]
pub struct LivenessResponse {
    pub alive: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.settings.app_version.clone(),
        environment: state.settings.environment.to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Readiness probe: storage must be reachable
///
/// GET /ready
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let storage = state.storage.health_check().await;

    let checks = ReadinessChecks {
        storage_backend: state.storage.backend_name(),
        storage,
        cloudinary_configured: state.cloudinary.is_some(),
    };

    let status = if storage {
        StatusCode::OK
    } else {
        tracing::warn!(checks = ?checks, "Readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse { ready: storage, checks }))
}

/// GET /liveness
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { alive: true })
}

/// Prometheus text exposition
///
/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to render metrics: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
