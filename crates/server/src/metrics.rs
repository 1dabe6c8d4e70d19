//! Prometheus metrics for the satchel server.
//!
//! Exposes counters for uploads, link issuance and redemption, and sweeper runs.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no user IDs, names, or storage keys, but they do expose
//! aggregate usage. Restrict `/metrics` to scraper addresses at the network
//! layer (firewall, load balancer, or reverse proxy) and never expose it publicly.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload session metrics
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_upload_sessions_created_total",
        "Total number of chunked upload sessions started",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_upload_sessions_completed_total",
        "Total number of chunked uploads assembled and recorded",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_upload_sessions_failed_total",
        "Total number of chunked uploads that failed during assembly",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_upload_sessions_aborted_total",
        "Total number of chunked uploads aborted by their owner",
    )
    .expect("metric creation failed")
});

pub static PARTS_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_parts_uploaded_total",
        "Total number of parts accepted",
    )
    .expect("metric creation failed")
});

pub static DIRECT_UPLOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_direct_uploads_total",
        "Total number of single-request uploads stored",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_bytes_uploaded_total",
        "Total bytes accepted across parts and direct uploads",
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static UPLOAD_COMPLETE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "satchel_upload_complete_duration_seconds",
            "Time taken to assemble and record a chunked upload",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

pub static PART_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "satchel_part_upload_duration_seconds",
            "Time taken to store a single part",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

// Error metrics
pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "satchel_upload_errors_total",
            "Total upload errors by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Link metrics
pub static LINKS_ISSUED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("satchel_links_issued_total", "Total links issued by purpose"),
        &["purpose"],
    )
    .expect("metric creation failed")
});

pub static LINKS_REDEEMED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "satchel_links_redeemed_total",
            "Total links successfully redeemed by purpose",
        ),
        &["purpose"],
    )
    .expect("metric creation failed")
});

pub static LINKS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "satchel_links_rejected_total",
            "Total link redemptions rejected by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Sweeper metrics
pub static SWEEP_RUNS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("satchel_sweep_runs_total", "Total sweeper runs")
        .expect("metric creation failed")
});

pub static SWEEP_DELETED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "satchel_sweep_deleted_total",
            "Total records removed by the sweeper by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static SWEEP_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_sweep_errors_total",
        "Total per-item failures skipped by the sweeper",
    )
    .expect("metric creation failed")
});

pub static SWEEP_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "satchel_sweep_duration_seconds",
            "Time taken by one sweeper run",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// This function is idempotent - subsequent calls after the first are no-ops.
/// This allows safe use in integration tests or when embedding multiple routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOAD_SESSIONS_CREATED.clone()),
            Box::new(UPLOAD_SESSIONS_COMPLETED.clone()),
            Box::new(UPLOAD_SESSIONS_FAILED.clone()),
            Box::new(UPLOAD_SESSIONS_ABORTED.clone()),
            Box::new(PARTS_UPLOADED.clone()),
            Box::new(DIRECT_UPLOADS.clone()),
            Box::new(BYTES_UPLOADED.clone()),
            Box::new(UPLOAD_COMPLETE_DURATION.clone()),
            Box::new(PART_UPLOAD_DURATION.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(LINKS_ISSUED.clone()),
            Box::new(LINKS_REDEEMED.clone()),
            Box::new(LINKS_REJECTED.clone()),
            Box::new(SWEEP_RUNS.clone()),
            Box::new(SWEEP_DELETED.clone()),
            Box::new(SWEEP_ERRORS.clone()),
            Box::new(SWEEP_DURATION.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
