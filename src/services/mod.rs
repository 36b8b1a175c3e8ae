//! External collaborators of the processing core.
//!
//! The pipeline only sees these traits. Production implementations shell out
//! to Tesseract and pdftoppm or call OpenRouter over HTTP; tests substitute
//! scripted fakes.

pub mod llm;
pub mod ocr;
pub mod rasterizer;
pub mod summary;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Recognizes the text of a single page image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(
        &self,
        image: &Path,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, OcrError>;
}

/// Summarizes one chunk of a larger document.
#[async_trait]
pub trait SummaryModel: Send + Sync {
    async fn summarize_chunk(
        &self,
        chunk: &str,
        chunk_index: usize,
        total_chunks: usize,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError>;
}

/// Renders a document into one image per page.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(
        &self,
        document: &[u8],
        cancel: &CancellationToken,
    ) -> Result<RasterizedDocument, RasterizeError>;
}

/// Page images living in a scratch directory that is removed on drop.
#[derive(Debug)]
pub struct RasterizedDocument {
    dir: TempDir,
    pages: Vec<PathBuf>,
}

impl RasterizedDocument {
    pub fn new(dir: TempDir, pages: Vec<PathBuf>) -> Self {
        Self { dir, pages }
    }

    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Failure of a single unit of work, whatever the collaborator.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("worker dropped the unit before replying")]
    WorkerLost,

    #[error("unit panicked")]
    Panicked,
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("failed to launch OCR engine: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("unsupported language '{language}': install the language pack or use 'eng'")]
    UnsupportedLanguage { language: String },

    #[error("tesseract failed: {0}")]
    Engine(String),

    #[error("OCR cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("OPENROUTER_API_KEY is not configured")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("provider returned no choices")]
    EmptyResponse,

    #[error("summary cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum RasterizeError {
    #[error("scratch directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed: {output}")]
    Tool { tool: String, output: String },

    #[error("no pages were converted from the document")]
    NoPages,

    #[error("rasterization cancelled")]
    Cancelled,
}
