//! The processing core: breaker and admission gating in front of the batch
//! executor, with an async job queue for deferred work.

pub mod admission;
pub mod batch;
pub mod breaker;
pub mod jobs;
pub mod pool;

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, RejectReason};
use crate::models::document::{DocumentKind, OcrOutput};
use crate::models::job::{JobOutput, JobPayload, JobSnapshot};
use crate::models::summary::LevelSummary;
use crate::services::summary::{chunk_text_by_pages, plan_level};
use crate::services::{OcrEngine, RasterizeError, Rasterizer, SummaryModel, UnitError};

use admission::{AdmissionController, LoadGuard, LoadSnapshot, MemorySampler, ProcessMemory};
use batch::{BatchExecutor, OcrBatch};
use breaker::{CircuitBreaker, CircuitState};
use jobs::{JobQueue, JobQueueConfig, JobRunner};
use pool::WorkerPool;

/// Downstream services the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub ocr: Arc<dyn OcrEngine>,
    pub summarizer: Arc<dyn SummaryModel>,
    pub rasterizer: Arc<dyn Rasterizer>,
}

/// Health figures of a running pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineHealth {
    pub circuit: CircuitState,
    pub consecutive_failures: u64,
    pub load: LoadSnapshot,
    pub queue_depth: usize,
    pub pool_workers: usize,
    pub pool_queued: usize,
}

struct PipelineCore {
    breaker: CircuitBreaker,
    admission: AdmissionController,
    executor: BatchExecutor,
    collaborators: Collaborators,
}

/// Entry point for OCR and summary work.
///
/// Synchronous calls are checked against the circuit breaker and then the
/// admission controller before any unit runs, and count as an active job
/// until they return. Dropping a synchronous call's future cancels its units.
pub struct Pipeline {
    core: Arc<PipelineCore>,
    queue: Arc<JobQueue>,
}

impl Pipeline {
    /// Build the pipeline and start its pool and queue workers. Must be
    /// called from within a tokio runtime.
    pub fn new(config: &PipelineConfig, collaborators: Collaborators) -> Self {
        Self::with_memory_sampler(config, collaborators, Arc::new(ProcessMemory))
    }

    pub fn with_memory_sampler(
        config: &PipelineConfig,
        collaborators: Collaborators,
        sampler: Arc<dyn MemorySampler>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(config.pool_workers, config.pool_capacity));
        let core = Arc::new(PipelineCore {
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_recovery_window,
            ),
            admission: AdmissionController::new(
                config.max_concurrent_jobs,
                config.memory_ceiling_bytes,
                config.admission_sample_interval,
                sampler,
            ),
            executor: BatchExecutor::new(pool, config.max_units_per_task, config.unit_timeout),
            collaborators,
        });

        let queue = JobQueue::start(
            JobQueueConfig {
                workers: config.queue_workers,
                capacity: config.queue_capacity,
                retention: config.job_retention,
                sweep_interval: config.job_sweep_interval,
            },
            core.clone(),
        );

        Self { core, queue }
    }

    /// OCR page images in order. Failed pages carry an error marker.
    pub async fn run_ocr_batch(
        &self,
        images: &[PathBuf],
        language: &str,
    ) -> Result<OcrBatch, PipelineError> {
        let _load = self.core.admit()?;
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        Ok(self.core.ocr_images(images, language, &cancel).await)
    }

    /// Summarize chunks in order. Any chunk failure fails the whole batch.
    pub async fn run_summary_batch(
        &self,
        chunks: Vec<String>,
        level: u8,
        language: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let _load = self.core.admit()?;
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        tracing::info!(chunks = chunks.len(), level, language, "Running summary batch");
        self.core.summarize_chunks(chunks, language, &cancel).await
    }

    /// OCR a whole document, rasterizing PDFs first.
    pub async fn extract_document(
        &self,
        document: &[u8],
        kind: DocumentKind,
        language: &str,
    ) -> Result<OcrOutput, PipelineError> {
        let _load = self.core.admit()?;
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        self.core.extract(document, kind, language, &cancel).await
    }

    /// Plan, chunk and summarize `text` at the given detail level.
    pub async fn summarize_level(
        &self,
        text: &str,
        total_pages: usize,
        level: u8,
        language: &str,
    ) -> Result<LevelSummary, PipelineError> {
        let _load = self.core.admit()?;
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        self.core
            .summarize_level(text, total_pages, level, language, &cancel)
            .await
    }

    /// Queue a job for background processing and return its id at once.
    pub async fn submit_job(&self, payload: JobPayload) -> Result<Uuid, PipelineError> {
        self.core.check_admission()?;
        self.queue.submit(payload).await
    }

    pub async fn job_status(&self, job_id: Uuid) -> JobSnapshot {
        self.queue.status(job_id).await
    }

    pub async fn job(&self, job_id: Uuid) -> Result<JobSnapshot, PipelineError> {
        self.queue.get(job_id).await
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.core.breaker
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.core.admission
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn health(&self) -> PipelineHealth {
        let pool = self.core.executor.pool();
        PipelineHealth {
            circuit: self.core.breaker.state(),
            consecutive_failures: self.core.breaker.failure_count(),
            load: self.core.admission.snapshot(),
            queue_depth: self.queue.depth(),
            pool_workers: pool.workers(),
            pool_queued: pool.queued(),
        }
    }

    /// Stop queue and pool workers. Queued jobs are abandoned.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.core.executor.pool().shutdown();
        tracing::info!("Pipeline shut down");
    }
}

impl PipelineCore {
    /// Breaker first, then load. Rejections never reach the breaker.
    fn check_admission(&self) -> Result<(), PipelineError> {
        let reason = if self.breaker.is_open() {
            RejectReason::CircuitOpen
        } else if !self.admission.check_load() {
            RejectReason::HighLoad
        } else {
            return Ok(());
        };

        metrics::counter!("pipeline_admission_rejected_total", "reason" => reason.to_string())
            .increment(1);
        tracing::warn!(reason = %reason, "Request rejected");
        Err(PipelineError::AdmissionRejected(reason))
    }

    fn admit(&self) -> Result<LoadGuard<'_>, PipelineError> {
        self.check_admission()?;
        Ok(self.admission.begin())
    }

    async fn ocr_images(
        &self,
        images: &[PathBuf],
        language: &str,
        cancel: &CancellationToken,
    ) -> OcrBatch {
        let batch = self
            .executor
            .run_ocr_batch(self.collaborators.ocr.clone(), images, language, cancel)
            .await;

        if batch.all_failed() && !cancel.is_cancelled() {
            self.breaker.record_failure();
        } else if !batch.pages.is_empty() && batch.failed.len() < batch.pages.len() {
            self.breaker.record_success();
        }
        batch
    }

    async fn extract(
        &self,
        document: &[u8],
        kind: DocumentKind,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<OcrOutput, PipelineError> {
        let batch = if kind.is_image() {
            let dir = tempfile::Builder::new().prefix("ocr-extraction-").tempdir()?;
            let image = staged_page(dir.path(), kind);
            tokio::fs::write(&image, document).await?;
            self.ocr_images(&[image], language, cancel).await
        } else {
            let rasterized = match self.collaborators.rasterizer.rasterize(document, cancel).await {
                Ok(rasterized) => rasterized,
                Err(RasterizeError::Cancelled) => return Err(RasterizeError::Cancelled.into()),
                Err(err) => {
                    self.breaker.record_failure();
                    tracing::error!(error = %err, "Document rasterization failed");
                    return Err(err.into());
                }
            };
            tracing::info!(
                pages = rasterized.pages().len(),
                dir = %rasterized.dir().display(),
                "Document rasterized"
            );
            self.ocr_images(rasterized.pages(), language, cancel).await
        };

        Ok(OcrOutput::new(kind, language, batch.pages, batch.failed))
    }

    async fn summarize_chunks(
        &self,
        chunks: Vec<String>,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PipelineError> {
        let result = self
            .executor
            .run_summary_batch(self.collaborators.summarizer.clone(), chunks, language, cancel)
            .await;

        // An empty batch made no model call and says nothing about its health
        match &result {
            Ok(summaries) if summaries.is_empty() => {}
            Ok(_) => self.breaker.record_success(),
            Err(PipelineError::BatchAborted {
                source: UnitError::Cancelled,
                ..
            }) => {}
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    async fn summarize_level(
        &self,
        text: &str,
        total_pages: usize,
        level: u8,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<LevelSummary, PipelineError> {
        let plan = plan_level(total_pages, level);
        let chunks = chunk_text_by_pages(text, total_pages, plan.pages_per_chunk);
        tracing::info!(
            level = plan.level,
            total_pages,
            pages_per_chunk = plan.pages_per_chunk,
            chunks = chunks.len(),
            "Summarizing document level"
        );

        let chunk_count = chunks.len();
        let summaries = self.summarize_chunks(chunks, language, cancel).await?;

        Ok(LevelSummary {
            original_pages: total_pages,
            language: language.to_string(),
            level: plan,
            chunks: chunk_count,
            summary: summaries.join("\n\n"),
        })
    }
}

#[async_trait]
impl JobRunner for PipelineCore {
    async fn run(
        &self,
        payload: JobPayload,
        cancel: &CancellationToken,
    ) -> Result<JobOutput, PipelineError> {
        let _load = self.admission.begin();
        match payload {
            JobPayload::Ocr {
                document,
                kind,
                language,
            } => self
                .extract(&document, kind, &language, cancel)
                .await
                .map(JobOutput::Ocr),
            JobPayload::Summary {
                text,
                total_pages,
                level,
                language,
            } => self
                .summarize_level(&text, total_pages, level, &language, cancel)
                .await
                .map(JobOutput::Summary),
        }
    }
}

/// Path an uploaded single-page image is written to before OCR.
fn staged_page(dir: &Path, kind: DocumentKind) -> PathBuf {
    dir.join(format!("page-1.{kind}"))
}
