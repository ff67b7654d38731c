//! Postcard generation endpoint

use axum::{extract::State, Json};

use crate::error::ApiError;
use crate::schemas::GenerateRequest;
use crate::server::state::AppState;
use crate::services::PostcardResult;

/// Run the generation pipeline
///
/// POST /api/generate
pub async fn generate_postcard(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<PostcardResult>, ApiError> {
    let request = request.into_postcard()?;
    let result = state.pipeline.run(request).await?;
    Ok(Json(result))
}
