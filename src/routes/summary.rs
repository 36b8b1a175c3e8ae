use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::PipelineError;
use crate::models::api::{ApiResponse, SubmitResponse, SummaryRequest};
use crate::models::job::{JobPayload, JobStatus};
use crate::models::summary::LevelSummary;

fn validated(request: SummaryRequest) -> Result<SummaryRequest, PipelineError> {
    request
        .validate()
        .map_err(|report| PipelineError::InvalidRequest(report.to_string()))?;
    Ok(request)
}

/// POST /api/v1/summary: Summarize text at a detail level and wait.
pub async fn summarize_sync(
    State(state): State<AppState>,
    Json(request): Json<SummaryRequest>,
) -> Result<Json<ApiResponse<LevelSummary>>, PipelineError> {
    let request = validated(request)?;
    let summary = state
        .pipeline
        .summarize_level(
            &request.text,
            request.total_pages,
            request.level,
            &request.language,
        )
        .await?;
    Ok(Json(ApiResponse::ok(summary)))
}

/// POST /api/v1/summary/jobs: Queue a level summary.
pub async fn summarize_async(
    State(state): State<AppState>,
    Json(request): Json<SummaryRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), PipelineError> {
    let request = validated(request)?;
    let level = request.level;
    let job_id = state
        .pipeline
        .submit_job(JobPayload::Summary {
            text: request.text,
            total_pages: request.total_pages,
            level,
            language: request.language,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            success: true,
            job_id,
            status: JobStatus::Pending,
            message: format!("Level {level} summary queued"),
        }),
    ))
}
