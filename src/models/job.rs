use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use strum::Display;
use uuid::Uuid;

use super::document::{DocumentKind, OcrOutput};
use super::summary::LevelSummary;

/// Status of a job in the async queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    NotFound,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    Ocr,
    Summary,
}

/// Input of a deferred job. Travels through the pending channel only; the job
/// record keeps the parameters, not the document.
#[derive(Debug, Clone)]
pub enum JobPayload {
    Ocr {
        document: Vec<u8>,
        kind: DocumentKind,
        language: String,
    },
    Summary {
        text: String,
        total_pages: usize,
        level: u8,
        language: String,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Ocr { .. } => JobKind::Ocr,
            Self::Summary { .. } => JobKind::Summary,
        }
    }

    pub fn language(&self) -> &str {
        match self {
            Self::Ocr { language, .. } | Self::Summary { language, .. } => language,
        }
    }
}

/// Result stored on a completed job.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    Ocr(OcrOutput),
    Summary(LevelSummary),
}

/// A job record owned by the queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub language: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<JobOutput>,
    pub error: Option<String>,
    finished: Option<Instant>,
}

impl Job {
    pub fn pending(id: Uuid, payload: &JobPayload) -> Self {
        Self {
            id,
            kind: payload.kind(),
            language: payload.language().to_string(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            finished: None,
        }
    }

    /// Claim the job for processing. Only a pending job can be claimed.
    pub fn start(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    /// Store the outcome. Terminal states are final, so this happens once.
    pub fn finish(&mut self, outcome: Result<JobOutput, String>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        match outcome {
            Ok(output) => {
                self.status = JobStatus::Completed;
                self.result = Some(output);
            }
            Err(error) => {
                self.status = JobStatus::Failed;
                self.error = Some(error);
            }
        }
        self.finished_at = Some(Utc::now());
        self.finished = Some(Instant::now());
        true
    }

    /// Time since the job reached a terminal state.
    pub fn finished_for(&self) -> Option<std::time::Duration> {
        self.finished.map(|at| at.elapsed())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            status: self.status,
            kind: Some(self.kind),
            language: Some(self.language.clone()),
            created_at: Some(self.created_at),
            started_at: self.started_at,
            finished_at: self.finished_at,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// Point-in-time view of a job, as returned to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn not_found(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::NotFound,
            kind: None,
            language: None,
            created_at: None,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}
