use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use strum::Display;
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::services::{RasterizeError, UnitError};

/// Why a request was turned away before any work started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    CircuitOpen,
    HighLoad,
}

/// Errors surfaced by the processing core to its callers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Request rejected ({0}) - please retry in a few seconds")]
    AdmissionRejected(RejectReason),

    #[error("Unit {index} failed: {source}")]
    UnitExecutionFailed {
        index: usize,
        #[source]
        source: UnitError,
    },

    #[error("Batch aborted at unit {index}: {source}")]
    BatchAborted {
        index: usize,
        #[source]
        source: UnitError,
    },

    #[error("Queue is full - please try again later")]
    QueueFull,

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Unsupported document type: {0}")]
    UnsupportedDocument(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Document rasterization failed: {0}")]
    Rasterize(#[from] RasterizeError),

    #[error("Scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Rejections that the caller should retry later rather than treat as a failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AdmissionRejected(_) | Self::QueueFull)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AdmissionRejected(RejectReason::CircuitOpen) => StatusCode::SERVICE_UNAVAILABLE,
            Self::AdmissionRejected(RejectReason::HighLoad) | Self::QueueFull => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::JobNotFound(_) => StatusCode::NOT_FOUND,
            Self::UnsupportedDocument(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnitExecutionFailed { .. }
            | Self::BatchAborted { .. }
            | Self::Rasterize(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    retryable: bool,
    /// `not_found` for unknown job ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<JobStatus>,
}

impl PipelineError {
    fn body(&self) -> ErrorBody {
        ErrorBody {
            success: false,
            error: self.to_string(),
            retryable: self.is_retryable(),
            status: matches!(self, Self::JobNotFound(_)).then_some(JobStatus::NotFound),
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
