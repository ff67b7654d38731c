//! Request logging middleware
//!
//! One structured line per request and one per response, correlated by a
//! trace id taken from `x-trace-id` / `x-request-id` or generated.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Trace id of the current request, available to handlers as an extension
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_request(request: &Request) -> Self {
        [TRACE_ID_HEADER, REQUEST_ID_HEADER]
            .iter()
            .find_map(|name| {
                request
                    .headers()
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty() && v.len() <= 128)
            })
            .map(|v| Self(v.to_string()))
            .unwrap_or_default()
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Middleware logging each request and echoing its trace id
pub async fn log_request(mut request: Request, next: Next) -> Response<Body> {
    let start = Instant::now();
    let trace_id = TraceId::from_request(&request);

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    tracing::info!(
        trace_id = %trace_id,
        method = %method,
        path = %path,
        "Incoming request"
    );

    request.extensions_mut().insert(trace_id.clone());

    let span = tracing::info_span!("http_request", trace_id = %trace_id, method = %method, path = %path);
    let mut response = next.run(request).instrument(span).await;

    let status = response.status();
    let duration_ms = format!("{:.2}", start.elapsed().as_secs_f64() * 1000.0);

    match classify(status) {
        Outcome::ServerError => tracing::error!(
            trace_id = %trace_id, method = %method, path = %path,
            status = status.as_u16(), duration_ms = %duration_ms, "Server error"
        ),
        Outcome::ClientError => tracing::warn!(
            trace_id = %trace_id, method = %method, path = %path,
            status = status.as_u16(), duration_ms = %duration_ms, "Client error"
        ),
        Outcome::Ok => tracing::info!(
            trace_id = %trace_id, method = %method, path = %path,
            status = status.as_u16(), duration_ms = %duration_ms, "Request completed"
        ),
    }

    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value.clone());
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Ok,
    ClientError,
    ServerError,
}

fn classify(status: StatusCode) -> Outcome {
    if status.is_server_error() {
        Outcome::ServerError
    } else if status.is_client_error() {
        Outcome::ClientError
    } else {
        Outcome::Ok
    }
}
