use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Pipeline counters, gauges and batch timings in Prometheus
/// text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the pipeline records.
pub fn describe_pipeline_metrics() {
    metrics::describe_counter!("pipeline_units_total", "Units of work executed by the pool");
    metrics::describe_counter!(
        "pipeline_unit_failures_total",
        "Units of work that returned an error or panicked"
    );
    metrics::describe_counter!(
        "pipeline_pool_overflow_total",
        "Units run on the caller's task because the pool channel was full"
    );
    metrics::describe_counter!(
        "pipeline_admission_rejected_total",
        "Requests refused by the circuit breaker or admission controller"
    );
    metrics::describe_counter!("pipeline_jobs_submitted_total", "Async jobs accepted");
    metrics::describe_counter!("pipeline_jobs_completed_total", "Async jobs completed");
    metrics::describe_counter!("pipeline_jobs_failed_total", "Async jobs that failed");
    metrics::describe_counter!(
        "pipeline_jobs_rejected_total",
        "Async jobs refused because the queue was full"
    );
    metrics::describe_histogram!(
        "pipeline_batch_seconds",
        "Wall time of an OCR or summary batch"
    );
    metrics::describe_gauge!("pipeline_circuit_open", "1 while the circuit breaker is open");
    metrics::describe_gauge!("pipeline_active_jobs", "Jobs currently holding admission");
}
