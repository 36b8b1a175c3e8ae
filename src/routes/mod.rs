pub mod extract;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod summary;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Build the HTTP surface over the pipeline.
pub fn router(
    state: AppState,
    prometheus_handle: Arc<PrometheusHandle>,
    max_upload_bytes: usize,
) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/ocr", post(extract::extract_sync))
        .route("/api/v1/ocr/jobs", post(extract::extract_async))
        .route("/api/v1/summary", post(summary::summarize_sync))
        .route("/api/v1/summary/jobs", post(summary::summarize_async))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job_status))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}
