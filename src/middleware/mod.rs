//! Middleware module
//!
//! Contains HTTP middleware for admin authentication, rate limiting, logging, and metrics.

pub mod auth;
pub mod logging;
pub mod metrics;
pub mod rate_limit;

// Re-export commonly used items
pub use auth::{require_admin, AdminAuth, AdminClaims, AuthError, IssuedToken};
pub use logging::{log_request, TraceId, REQUEST_ID_HEADER, TRACE_ID_HEADER};
pub use metrics::{track_metrics, Metrics};
pub use rate_limit::{KeyedRateLimiter, RateLimitError};
