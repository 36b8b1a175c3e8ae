use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobStatus;

/// Body of a level summary request.
#[derive(Debug, Deserialize, Validate)]
pub struct SummaryRequest {
    #[garde(length(min = 1))]
    pub text: String,

    #[garde(range(min = 1))]
    pub total_pages: usize,

    #[serde(default = "default_level")]
    #[garde(range(min = 1, max = 10))]
    pub level: u8,

    #[serde(default = "default_summary_language")]
    #[garde(length(min = 1, max = 64))]
    pub language: String,
}

fn default_level() -> u8 {
    1
}

fn default_summary_language() -> String {
    "english".to_string()
}

/// Response after submitting a job to the async queue.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Successful synchronous response wrapping a pipeline output.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
