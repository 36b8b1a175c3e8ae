use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::PipelineError;
use crate::models::job::JobSnapshot;

/// GET /api/v1/jobs/{job_id}: Poll an async job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, PipelineError> {
    let snapshot = state.pipeline.job(job_id).await?;
    Ok(Json(snapshot))
}
