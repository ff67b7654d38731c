//! Application routing
//!
//! This module defines all HTTP routes for the application.

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderName,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{admin, generate, health, otp, upload};
use crate::middleware::{
    auth::require_admin,
    logging::{log_request, REQUEST_ID_HEADER, TRACE_ID_HEADER},
    metrics::track_metrics,
};
use crate::server::state::AppState;

/// Multipart framing on top of the image itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // Health check routes (no authentication required)
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .route("/liveness", get(health::liveness))
        .route("/metrics", get(health::metrics));

    // Public flow: verify email, upload photo, generate
    let public_routes = Router::new()
        .route("/send-otp", post(otp::send_otp))
        .route("/verify-otp", post(otp::verify_otp))
        .route(
            "/upload",
            post(upload::upload_image).layer(DefaultBodyLimit::max(
                state.settings.max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
            )),
        )
        .route("/cloudinary-signature", get(upload::cloudinary_signature))
        .route("/generate", post(generate::generate_postcard))
        .route("/admin/login", post(admin::login));

    // Dashboard routes, bearer token required
    let admin_routes = Router::new()
        .route("/admin/stats", get(admin::stats))
        .route("/users", get(admin::list_users))
        .route("/users/:email", get(admin::get_user))
        .route("/cards", get(admin::list_cards))
        .route("/cloudinary-resources", get(admin::cloudinary_resources))
        .layer(middleware::from_fn_with_state(
            state.admin_auth.clone(),
            require_admin,
        ));

    Router::new()
        .nest("/api", public_routes.merge(admin_routes))
        .merge(health_routes)
        // Layer order: last added = outermost = runs first
        .layer(middleware::from_fn_with_state(state.metrics.clone(), track_metrics))
        .layer(create_cors_layer())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Permissive CORS; the dashboard and the public site are served elsewhere
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static("retry-after"),
        ])
}
