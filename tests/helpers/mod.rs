//! Test helper utilities: scripted collaborators and polling

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use doc_pipeline::config::PipelineConfig;
use doc_pipeline::models::job::JobSnapshot;
use doc_pipeline::pipeline::admission::MemorySampler;
use doc_pipeline::pipeline::{Collaborators, Pipeline};
use doc_pipeline::services::{
    LlmError, OcrEngine, OcrError, RasterizeError, RasterizedDocument, Rasterizer, SummaryModel,
};

/// Page index encoded in a test image path: `3` or `page-3.png` both give 3.
pub fn page_index(image: &Path) -> usize {
    image
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Image paths `0`..`count` for batches that never touch the filesystem.
pub fn image_paths(count: usize) -> Vec<PathBuf> {
    (0..count).map(|i| PathBuf::from(i.to_string())).collect()
}

/// Tracks how many calls run at once.
#[derive(Default)]
pub struct Concurrency {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// OCR engine that sleeps, then returns `text-<index>` or fails on scripted pages.
#[derive(Default)]
pub struct ScriptedOcr {
    pub delay: Duration,
    pub fail_pages: Vec<usize>,
    pub fail_all: AtomicBool,
    pub calls: AtomicUsize,
    pub concurrency: Concurrency,
}

impl ScriptedOcr {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing_pages(pages: &[usize]) -> Self {
        Self {
            fail_pages: pages.to_vec(),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    async fn recognize(
        &self,
        image: &Path,
        _language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.concurrency.enter();
        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = sleep(self.delay) => false,
        };
        self.concurrency.exit();

        if cancelled {
            return Err(OcrError::Cancelled);
        }
        let index = page_index(image);
        if self.fail_all.load(Ordering::SeqCst) || self.fail_pages.contains(&index) {
            return Err(OcrError::Engine(format!("page {index} unreadable")));
        }
        Ok(format!("text-{index}"))
    }
}

/// Summary model returning `summary-<index>` or failing on scripted chunks.
#[derive(Default)]
pub struct ScriptedSummarizer {
    pub delay: Duration,
    pub fail_chunks: Vec<usize>,
    pub calls: AtomicUsize,
}

impl ScriptedSummarizer {
    pub fn failing_chunks(chunks: &[usize]) -> Self {
        Self {
            delay: Duration::from_millis(10),
            fail_chunks: chunks.to_vec(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryModel for ScriptedSummarizer {
    async fn summarize_chunk(
        &self,
        _chunk: &str,
        chunk_index: usize,
        _total_chunks: usize,
        _language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            _ = sleep(self.delay) => {}
        }
        if self.fail_chunks.contains(&chunk_index) {
            return Err(LlmError::EmptyResponse);
        }
        Ok(format!("summary-{chunk_index}"))
    }
}

/// Rasterizer producing `pages` empty page files, or failing like a broken tool.
pub struct FakeRasterizer {
    pub pages: usize,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeRasterizer {
    pub fn with_pages(pages: usize) -> Self {
        Self {
            pages,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            pages: 0,
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        _document: &[u8],
        _cancel: &CancellationToken,
    ) -> Result<RasterizedDocument, RasterizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RasterizeError::Tool {
                tool: "pdftoppm".to_string(),
                output: "Syntax Error: Couldn't read xref table".to_string(),
            });
        }

        let dir = tempfile::tempdir()?;
        let mut pages = Vec::with_capacity(self.pages);
        for page in 0..self.pages {
            let path = dir.path().join(format!("page-{page}.png"));
            tokio::fs::write(&path, b"").await?;
            pages.push(path);
        }
        Ok(RasterizedDocument::new(dir, pages))
    }
}

/// Memory sampler reporting whatever the test sets.
#[derive(Default)]
pub struct FixedMemory {
    pub bytes: AtomicU64,
}

impl FixedMemory {
    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl MemorySampler for FixedMemory {
    fn sample(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

/// Small, fast budget: two workers, no sample caching, short recovery window.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        pool_workers: 2,
        pool_capacity: 4,
        queue_workers: 2,
        queue_capacity: 50,
        max_concurrent_jobs: 10,
        memory_ceiling_bytes: 1024 * 1024 * 1024,
        admission_sample_interval: Duration::ZERO,
        breaker_failure_threshold: 3,
        breaker_recovery_window: Duration::from_millis(200),
        max_units_per_task: 4,
        unit_timeout: Duration::from_secs(5),
        job_retention: Duration::from_secs(60),
        job_sweep_interval: Duration::from_secs(60),
    }
}

/// A pipeline wired to scripted collaborators, with handles kept for assertions.
pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub ocr: Arc<ScriptedOcr>,
    pub summarizer: Arc<ScriptedSummarizer>,
    pub rasterizer: Arc<FakeRasterizer>,
    pub memory: Arc<FixedMemory>,
}

pub fn build_pipeline(
    config: PipelineConfig,
    ocr: ScriptedOcr,
    summarizer: ScriptedSummarizer,
    rasterizer: FakeRasterizer,
) -> TestPipeline {
    let ocr = Arc::new(ocr);
    let summarizer = Arc::new(summarizer);
    let rasterizer = Arc::new(rasterizer);
    let memory = Arc::new(FixedMemory::default());

    let pipeline = Pipeline::with_memory_sampler(
        &config,
        Collaborators {
            ocr: ocr.clone(),
            summarizer: summarizer.clone(),
            rasterizer: rasterizer.clone(),
        },
        memory.clone(),
    );

    TestPipeline {
        pipeline,
        ocr,
        summarizer,
        rasterizer,
        memory,
    }
}

pub fn default_pipeline() -> TestPipeline {
    build_pipeline(
        test_config(),
        ScriptedOcr::default(),
        ScriptedSummarizer::default(),
        FakeRasterizer::with_pages(3),
    )
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    pipeline: &Pipeline,
    job_id: Uuid,
    timeout: Duration,
) -> Result<JobSnapshot, Box<dyn std::error::Error>> {
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        let snapshot = pipeline.job_status(job_id).await;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
        sleep(Duration::from_millis(10)).await;
    }

    Err(format!("Job {job_id} did not complete within {timeout:?}").into())
}
