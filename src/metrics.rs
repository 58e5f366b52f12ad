// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the HTTP-01 proxy.
//!
//! All metrics carry the namespace prefix `acme_http01_proxy_`. They are only
//! exposed when a metrics port is configured, on a listener separate from the
//! challenge router.
//!
//! # Example
//!
//! ```rust,no_run
//! use acme_http01_proxy::metrics::{record_request, RequestOutcome};
//!
//! record_request(RequestOutcome::Forbidden);
//! ```

use crate::constants::METRICS_SERVER_PATH;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::error;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all proxy metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "acme_http01_proxy";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Request Metrics
// ============================================================================

/// Total number of inbound requests by outcome
///
/// Labels:
/// - `outcome`: `forwarded`, `forbidden`, `payload_too_large` or `backend_error`
pub static REQUESTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requests_total"),
        "Total number of inbound requests by outcome",
    );
    let counter = CounterVec::new(opts, &["outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of backend round trips in seconds
pub static BACKEND_REQUEST_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_backend_request_duration_seconds"),
        "Duration of forwarded requests to the ingress backend in seconds",
    )
    .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]);
    let histogram = Histogram::with_opts(opts).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Provisioning Metrics
// ============================================================================

/// Total number of redirect provisioning attempts
///
/// Labels:
/// - `strategy`: `iptables`, `machine-config` or `log-only`
/// - `status`: `success` or `error`
pub static REDIRECT_PROVISIONING_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_redirect_provisioning_total"),
        "Total number of redirect rule provisioning attempts by strategy and status",
    );
    let counter = CounterVec::new(opts, &["strategy", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Terminal state of one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Relayed to the backend
    Forwarded,
    /// Rejected with 403
    Forbidden,
    /// Inbound body unreadable or over the buffer limit, answered with 413
    PayloadTooLarge,
    /// Backend unreachable, answered with 502
    BackendError,
}

impl RequestOutcome {
    /// Label value for this outcome
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forwarded => "forwarded",
            Self::Forbidden => "forbidden",
            Self::PayloadTooLarge => "payload_too_large",
            Self::BackendError => "backend_error",
        }
    }
}

/// Record the outcome of an inbound request
pub fn record_request(outcome: RequestOutcome) {
    REQUESTS_TOTAL.with_label_values(&[outcome.as_str()]).inc();
}

/// Record a backend round trip
pub fn record_backend_duration(duration: Duration) {
    BACKEND_REQUEST_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Record a redirect provisioning attempt
pub fn record_provisioning(strategy: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    REDIRECT_PROVISIONING_TOTAL
        .with_label_values(&[strategy, status])
        .inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

/// Router serving [`METRICS_SERVER_PATH`]
pub fn metrics_router() -> Router {
    Router::new().route(METRICS_SERVER_PATH, get(metrics_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
