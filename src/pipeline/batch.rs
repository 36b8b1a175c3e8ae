//! Ordered fan-out/fan-in over the worker pool.
//!
//! A batch is split into contiguous sub-ranges, each driven by its own task
//! that submits its units to the pool one after another. Results are placed by
//! original index, never by completion order, and every task is joined before
//! the batch returns.

use futures::future::join_all;
use futures::FutureExt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::pool::{UnitFuture, WorkerPool};
use crate::error::PipelineError;
use crate::services::{OcrEngine, SummaryModel, UnitError};

/// Per-page OCR output. Failed pages hold an error marker instead of text.
#[derive(Debug, Clone)]
pub struct OcrBatch {
    pub pages: Vec<String>,
    pub failed: Vec<usize>,
}

impl OcrBatch {
    /// Every page failed, which points at the engine rather than the input.
    pub fn all_failed(&self) -> bool {
        !self.pages.is_empty() && self.failed.len() == self.pages.len()
    }
}

/// Text used in place of a page whose OCR failed.
pub fn ocr_error_marker(error: &UnitError) -> String {
    format!("[OCR Error: {error}]")
}

pub struct BatchExecutor {
    pool: Arc<WorkerPool>,
    max_units_per_task: usize,
    unit_timeout: Duration,
}

impl BatchExecutor {
    pub fn new(pool: Arc<WorkerPool>, max_units_per_task: usize, unit_timeout: Duration) -> Self {
        Self {
            pool,
            max_units_per_task: max_units_per_task.max(1),
            unit_timeout,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Units handled by one fan-out task for a batch of `len` units.
    pub fn task_size(&self, len: usize) -> usize {
        (len / self.pool.workers()).clamp(1, self.max_units_per_task)
    }

    /// OCR every image. A failed page becomes an error marker at its index and
    /// the rest of the batch carries on.
    pub async fn run_ocr_batch(
        &self,
        engine: Arc<dyn OcrEngine>,
        images: &[PathBuf],
        language: &str,
        cancel: &CancellationToken,
    ) -> OcrBatch {
        let started = Instant::now();
        let units = images
            .iter()
            .cloned()
            .map(|image| {
                let engine = engine.clone();
                let language = language.to_string();
                let token = cancel.clone();
                self.guard(
                    async move {
                        engine
                            .recognize(&image, &language, &token)
                            .await
                            .map_err(UnitError::from)
                    },
                    cancel,
                )
            })
            .collect();

        let results = self.fan_out(units, cancel, false).await;

        let mut failed = Vec::new();
        let pages = results
            .into_iter()
            .enumerate()
            .map(|(index, result)| match result {
                Ok(text) => text,
                Err(source) => {
                    let marker = ocr_error_marker(&source);
                    let error = PipelineError::UnitExecutionFailed { index, source };
                    tracing::warn!(page = index + 1, error = %error, "OCR unit failed");
                    failed.push(index);
                    marker
                }
            })
            .collect::<Vec<_>>();

        metrics::histogram!("pipeline_batch_seconds", "kind" => "ocr")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            pages = pages.len(),
            failed = failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "OCR batch finished"
        );

        OcrBatch { pages, failed }
    }

    /// Summarize every chunk. The first failure aborts the batch: remaining
    /// units are cancelled, all tasks are joined, and no partial list is
    /// returned.
    pub async fn run_summary_batch(
        &self,
        model: Arc<dyn SummaryModel>,
        chunks: Vec<String>,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PipelineError> {
        let started = Instant::now();
        let batch_cancel = cancel.child_token();
        let total = chunks.len();

        let units = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let model = model.clone();
                let language = language.to_string();
                let token = batch_cancel.clone();
                self.guard(
                    async move {
                        model
                            .summarize_chunk(&chunk, index, total, &language, &token)
                            .await
                            .map_err(UnitError::from)
                    },
                    &batch_cancel,
                )
            })
            .collect();

        let results = self.fan_out(units, &batch_cancel, true).await;
        metrics::histogram!("pipeline_batch_seconds", "kind" => "summary")
            .record(started.elapsed().as_secs_f64());

        let mut summaries = Vec::with_capacity(results.len());
        let mut cancelled = None;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(summary) => summaries.push(summary),
                Err(UnitError::Cancelled) => {
                    cancelled.get_or_insert(index);
                }
                Err(source) => {
                    tracing::error!(chunk = index + 1, total, error = %source, "Summary batch aborted");
                    return Err(PipelineError::BatchAborted { index, source });
                }
            }
        }

        if let Some(index) = cancelled {
            return Err(PipelineError::BatchAborted {
                index,
                source: UnitError::Cancelled,
            });
        }

        tracing::info!(
            chunks = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Summary batch finished"
        );
        Ok(summaries)
    }

    /// Bound a unit by the per-unit timeout and the batch cancellation token.
    fn guard<F>(&self, unit: F, cancel: &CancellationToken) -> UnitFuture
    where
        F: Future<Output = Result<String, UnitError>> + Send + 'static,
    {
        let timeout = self.unit_timeout;
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UnitError::Cancelled),
                result = tokio::time::timeout(timeout, unit) => {
                    result.unwrap_or(Err(UnitError::TimedOut(timeout)))
                }
            }
        }
        .boxed()
    }

    /// Dispatch `units` in contiguous sub-ranges and collect results by index.
    /// With `abort_on_error`, the first failure cancels `cancel` so the other
    /// tasks stop submitting.
    async fn fan_out(
        &self,
        units: Vec<UnitFuture>,
        cancel: &CancellationToken,
        abort_on_error: bool,
    ) -> Vec<Result<String, UnitError>> {
        let len = units.len();
        let task_size = self.task_size(len);
        let mut tasks = Vec::with_capacity(len.div_ceil(task_size));

        let mut units = units.into_iter().enumerate().peekable();
        while units.peek().is_some() {
            let range: Vec<(usize, UnitFuture)> = units.by_ref().take(task_size).collect();
            let indices: Vec<usize> = range.iter().map(|(index, _)| *index).collect();
            let pool = self.pool.clone();
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let mut out = Vec::with_capacity(range.len());
                for (index, unit) in range {
                    if cancel.is_cancelled() {
                        out.push((index, Err(UnitError::Cancelled)));
                        continue;
                    }
                    let result = pool.submit(unit).await;
                    if abort_on_error && result.is_err() {
                        cancel.cancel();
                    }
                    out.push((index, result));
                }
                out
            });
            tasks.push((indices, handle));
        }

        tracing::debug!(units = len, tasks = tasks.len(), task_size, "Batch fanned out");

        let mut slots: Vec<Option<Result<String, UnitError>>> = (0..len).map(|_| None).collect();
        let (indices, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();

        for (indices, joined) in indices.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(results) => {
                    for (index, result) in results {
                        slots[index] = Some(result);
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "Batch task panicked");
                    for index in indices {
                        slots[index] = Some(Err(UnitError::Panicked));
                    }
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(UnitError::WorkerLost)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{LlmError, OcrError};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps longer for earlier pages so completion order is reversed.
    struct ReversedOcr {
        pages: u64,
        fail_page: Option<usize>,
    }

    #[async_trait]
    impl OcrEngine for ReversedOcr {
        async fn recognize(
            &self,
            image: &Path,
            _language: &str,
            _cancel: &CancellationToken,
        ) -> Result<String, OcrError> {
            let index: usize = image.to_str().unwrap().parse().unwrap();
            let delay = (self.pages - index as u64) * 15;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.fail_page == Some(index) {
                return Err(OcrError::Engine("unreadable page".to_string()));
            }
            Ok(format!("text-{index}"))
        }
    }

    struct ScriptedModel {
        fail_chunk: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SummaryModel for ScriptedModel {
        async fn summarize_chunk(
            &self,
            chunk: &str,
            chunk_index: usize,
            _total_chunks: usize,
            _language: &str,
            _cancel: &CancellationToken,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail_chunk == Some(chunk_index) {
                return Err(LlmError::EmptyResponse);
            }
            Ok(format!("summary of {chunk}"))
        }
    }

    fn executor(workers: usize) -> BatchExecutor {
        BatchExecutor::new(
            Arc::new(WorkerPool::new(workers, workers * 2)),
            4,
            Duration::from_secs(5),
        )
    }

    fn images(count: usize) -> Vec<PathBuf> {
        (0..count).map(|i| PathBuf::from(i.to_string())).collect()
    }

    #[tokio::test]
    async fn test_task_size_is_clamped() {
        let exec = executor(2);
        assert_eq!(exec.task_size(0), 1);
        assert_eq!(exec.task_size(1), 1);
        assert_eq!(exec.task_size(6), 3);
        assert_eq!(exec.task_size(100), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ocr_results_follow_input_order() {
        let exec = executor(3);
        let engine = Arc::new(ReversedOcr {
            pages: 9,
            fail_page: None,
        });

        let batch = exec
            .run_ocr_batch(engine, &images(9), "eng", &CancellationToken::new())
            .await;

        let expected: Vec<String> = (0..9).map(|i| format!("text-{i}")).collect();
        assert_eq!(batch.pages, expected);
        assert!(batch.failed.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_ocr_page_becomes_marker_in_place() {
        let exec = executor(2);
        let engine = Arc::new(ReversedOcr {
            pages: 5,
            fail_page: Some(2),
        });

        let batch = exec
            .run_ocr_batch(engine, &images(5), "eng", &CancellationToken::new())
            .await;

        assert_eq!(batch.pages.len(), 5);
        assert_eq!(batch.failed, vec![2]);
        assert!(batch.pages[2].starts_with("[OCR Error:"));
        assert!(batch.pages[2].contains("unreadable page"));
        for i in [0, 1, 3, 4] {
            assert_eq!(batch.pages[i], format!("text-{i}"));
        }
        assert!(!batch.all_failed());
    }

    #[tokio::test]
    async fn test_empty_ocr_batch() {
        let exec = executor(2);
        let engine = Arc::new(ReversedOcr {
            pages: 0,
            fail_page: None,
        });
        let batch = exec
            .run_ocr_batch(engine, &[], "eng", &CancellationToken::new())
            .await;
        assert!(batch.pages.is_empty());
        assert!(!batch.all_failed());
    }

    #[tokio::test]
    async fn test_unit_timeout_is_a_unit_failure() {
        let exec = BatchExecutor::new(
            Arc::new(WorkerPool::new(1, 2)),
            4,
            Duration::from_millis(20),
        );
        let engine = Arc::new(ReversedOcr {
            pages: 10,
            fail_page: None,
        });

        let batch = exec
            .run_ocr_batch(engine, &images(1), "eng", &CancellationToken::new())
            .await;
        assert_eq!(batch.failed, vec![0]);
        assert!(batch.pages[0].contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_summary_results_follow_input_order() {
        let exec = executor(2);
        let model = Arc::new(ScriptedModel {
            fail_chunk: None,
            calls: AtomicUsize::new(0),
        });
        let chunks: Vec<String> = (0..6).map(|i| format!("chunk {i}")).collect();

        let summaries = exec
            .run_summary_batch(model, chunks, "english", &CancellationToken::new())
            .await
            .unwrap();

        let expected: Vec<String> = (0..6).map(|i| format!("summary of chunk {i}")).collect();
        assert_eq!(summaries, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_chunk_aborts_summary_batch() {
        let exec = executor(2);
        let model = Arc::new(ScriptedModel {
            fail_chunk: Some(2),
            calls: AtomicUsize::new(0),
        });
        let chunks: Vec<String> = (0..5).map(|i| format!("chunk {i}")).collect();

        let err = exec
            .run_summary_batch(model, chunks, "english", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::BatchAborted { index, source } => {
                assert_eq!(index, 2);
                assert!(matches!(source, UnitError::Llm(LlmError::EmptyResponse)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_batch_reports_cancellation() {
        let exec = executor(2);
        let model = Arc::new(ScriptedModel {
            fail_chunk: None,
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = exec
            .run_summary_batch(model.clone(), vec!["a".into(), "b".into()], "english", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::BatchAborted {
                source: UnitError::Cancelled,
                ..
            }
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
