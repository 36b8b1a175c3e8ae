use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::error::PipelineError;
use crate::models::api::{ApiResponse, SubmitResponse};
use crate::models::document::{DocumentKind, OcrOutput};
use crate::models::job::{JobPayload, JobStatus};

const DEFAULT_LANGUAGE: &str = "eng";

/// A document read from a multipart upload.
#[derive(Debug)]
pub struct Upload {
    pub document: Vec<u8>,
    pub kind: DocumentKind,
    pub language: String,
}

/// Read the `file` part and optional `language` part of an OCR upload.
pub async fn read_upload(mut multipart: Multipart) -> Result<Upload, PipelineError> {
    let mut document: Option<(Option<String>, Vec<u8>)> = None;
    let mut language = DEFAULT_LANGUAGE.to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| PipelineError::InvalidRequest(err.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| PipelineError::InvalidRequest(err.body_text()))?;
                document = Some((filename, data.to_vec()));
            }
            Some("language") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| PipelineError::InvalidRequest(err.body_text()))?;
                if !value.trim().is_empty() {
                    language = value.trim().to_string();
                }
            }
            _ => {}
        }
    }

    let (filename, document) =
        document.ok_or_else(|| PipelineError::InvalidRequest("missing 'file' part".to_string()))?;
    if document.is_empty() {
        return Err(PipelineError::InvalidRequest("uploaded file is empty".to_string()));
    }
    validate_language(&language)?;

    let kind = DocumentKind::detect(filename.as_deref(), &document)?;
    Ok(Upload {
        document,
        kind,
        language,
    })
}

/// Tesseract language codes such as `eng` or `eng+fra`.
fn validate_language(language: &str) -> Result<(), PipelineError> {
    let valid = language.len() <= 64
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidRequest(format!(
            "invalid OCR language '{language}'"
        )))
    }
}

/// POST /api/v1/ocr: OCR an uploaded document and wait for the text.
pub async fn extract_sync(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<OcrOutput>>, PipelineError> {
    let upload = read_upload(multipart).await?;
    tracing::info!(
        kind = %upload.kind,
        bytes = upload.document.len(),
        language = %upload.language,
        "OCR request received"
    );

    let output = state
        .pipeline
        .extract_document(&upload.document, upload.kind, &upload.language)
        .await?;
    Ok(Json(ApiResponse::ok(output)))
}

/// POST /api/v1/ocr/jobs: Queue an uploaded document for OCR.
pub async fn extract_async(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), PipelineError> {
    let upload = read_upload(multipart).await?;
    let job_id = state
        .pipeline
        .submit_job(JobPayload::Ocr {
            document: upload.document,
            kind: upload.kind,
            language: upload.language,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            success: true,
            job_id,
            status: JobStatus::Pending,
            message: "Document queued for OCR".to_string(),
        }),
    ))
}
