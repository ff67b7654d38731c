//! Admin dashboard endpoints
//!
//! Everything except `login` sits behind the `require_admin` middleware.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use validator::Validate;

use crate::db::{GeneratedCard, Page, User};
use crate::error::ApiError;
use crate::middleware::IssuedToken;
use crate::schemas::{CloudinaryResourcesQuery, LoginRequest, PageQuery, StatsQuery};
use crate::server::state::AppState;
use crate::services::dashboard::today;
use crate::services::{DashboardStats, DateRange, SearchPage};
use crate::utils::normalize_email;

/// POST /api/admin/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<IssuedToken>, ApiError> {
    request.validate()?;
    let token = state.admin_auth.login(request.username.trim(), &request.password)?;
    Ok(Json(token))
}

/// Daily registration, card and hosting counts
///
/// GET /api/admin/stats?from=YYYY-MM-DD&to=YYYY-MM-DD
pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DashboardStats>, ApiError> {
    let range = DateRange::parse(query.from.as_deref(), query.to.as_deref(), today())?;
    let stats = state.dashboard.stats(range).await?;
    Ok(Json(stats))
}

/// GET /api/users?limit=&cursor=
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<User>>, ApiError> {
    let page = state.storage.users.list_users(query.limit(), query.cursor()).await?;
    Ok(Json(page))
}

/// GET /api/users/:email
pub async fn get_user(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<User>, ApiError> {
    let email = normalize_email(&email);
    state
        .storage
        .users
        .get_user(&email)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No user registered with {}", email)))
}

/// GET /api/cards?limit=&cursor=
pub async fn list_cards(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<GeneratedCard>>, ApiError> {
    let page = state.storage.cards.list_cards(query.limit(), query.cursor()).await?;
    Ok(Json(page))
}

/// One page of hosted postcards, newest first
///
/// GET /api/cloudinary-resources?cursor=&max_results=
pub async fn cloudinary_resources(
    State(state): State<AppState>,
    Query(query): Query<CloudinaryResourcesQuery>,
) -> Result<Json<SearchPage>, ApiError> {
    let cloudinary = state
        .cloudinary
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("Image hosting is not configured".to_string()))?;

    let cursor = query.cursor.as_deref().filter(|c| !c.trim().is_empty());
    let page = cloudinary
        .search(cloudinary.generated_folder(), cursor, query.max_results.unwrap_or(50))
        .await
        .map_err(|e| ApiError::upstream("Cloudinary", e.to_string()))?;

    Ok(Json(page))
}
