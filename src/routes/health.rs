use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::pipeline::breaker::CircuitState;
use crate::pipeline::PipelineHealth;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pipeline: PipelineHealth,
}

/// GET /health: Breaker state, load and queue depth.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pipeline = state.pipeline.health();

    // An open breaker means downstream is failing and new work is refused
    let healthy = pipeline.circuit != CircuitState::Open;
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        pipeline,
    };

    (status_code, Json(response))
}
