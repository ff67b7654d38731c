//! Prometheus metrics
//!
//! Request counters/latency collected by middleware, plus domain counters
//! (OTP sends and verifications, generated cards, pipeline fallbacks).

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Metric handles shared by middleware and services
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    http_requests: IntCounterVec,
    http_duration: HistogramVec,
    otp_sent: IntCounter,
    otp_verifications: IntCounterVec,
    cards_generated: IntCounter,
    pipeline_fallbacks: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("postcard".to_string()), None)?;

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by method, route and status"),
            &["method", "route", "status"],
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["method", "route"],
        )?;
        let otp_sent = IntCounter::new("otp_sent_total", "Verification codes emailed")?;
        let otp_verifications = IntCounterVec::new(
            Opts::new("otp_verifications_total", "OTP verification attempts by outcome"),
            &["outcome"],
        )?;
        let cards_generated = IntCounter::new("cards_generated_total", "Postcards generated")?;
        let pipeline_fallbacks = IntCounterVec::new(
            Opts::new("pipeline_fallbacks_total", "Pipeline stages that fell back to the previous output"),
            &["stage"],
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_duration.clone()))?;
        registry.register(Box::new(otp_sent.clone()))?;
        registry.register(Box::new(otp_verifications.clone()))?;
        registry.register(Box::new(cards_generated.clone()))?;
        registry.register(Box::new(pipeline_fallbacks.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            http_duration,
            otp_sent,
            otp_verifications,
            cards_generated,
            pipeline_fallbacks,
        })
    }

    pub fn record_otp_sent(&self) {
        self.otp_sent.inc();
    }

    pub fn record_otp_verification(&self, outcome: &str) {
        self.otp_verifications.with_label_values(&[outcome]).inc();
    }

    pub fn record_card_generated(&self) {
        self.cards_generated.inc();
    }

    pub fn record_pipeline_fallback(&self, stage: &str) {
        self.pipeline_fallbacks.with_label_values(&[stage]).inc();
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Middleware recording request count and latency
///
/// Routes are labelled by their matched pattern (`/api/users/:email`), never
/// the raw path, to keep label cardinality bounded.
pub async fn track_metrics(
    State(metrics): State<Metrics>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics
        .http_requests
        .with_label_values(&[&method, &route, &status])
        .inc();
    metrics
        .http_duration
        .with_label_values(&[&method, &route])
        .observe(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_domain_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_otp_sent();
        metrics.record_otp_verification("success");
        metrics.record_pipeline_fallback("cutout");

        let text = metrics.render().unwrap();
        assert!(text.contains("postcard_otp_sent_total 1"));
        assert!(text.contains("postcard_otp_verifications_total{outcome=\"success\"} 1"));
        assert!(text.contains("postcard_pipeline_fallbacks_total{stage=\"cutout\"} 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_card_generated();

        assert!(a.render().unwrap().contains("postcard_cards_generated_total 1"));
        assert!(b.render().unwrap().contains("postcard_cards_generated_total 0"));
    }
}
