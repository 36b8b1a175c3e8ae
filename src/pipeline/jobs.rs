use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::job::{Job, JobOutput, JobPayload, JobSnapshot};

/// Executes the work behind a deferred job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        payload: JobPayload,
        cancel: &CancellationToken,
    ) -> Result<JobOutput, PipelineError>;
}

/// Message carried by the pending channel.
struct QueuedJob {
    job_id: Uuid,
    payload: JobPayload,
}

/// Sizing of the async job queue.
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub workers: usize,
    pub capacity: usize,
    pub retention: Duration,
    pub sweep_interval: Duration,
}

/// In-process async job queue with pollable status.
///
/// Submission never blocks: a full pending channel rejects the job and its
/// record is removed before the id is handed out. Each job is written only by
/// the worker that claimed it; pollers take the read lock.
pub struct JobQueue {
    jobs: RwLock<HashMap<Uuid, Job>>,
    sender: mpsc::Sender<QueuedJob>,
    capacity: usize,
    retention: Duration,
    shutdown: CancellationToken,
}

impl JobQueue {
    /// Create the queue and start its workers and retention sweeper on the
    /// current tokio runtime.
    pub fn start(config: JobQueueConfig, runner: Arc<dyn JobRunner>) -> Arc<Self> {
        let workers = config.workers.max(1);
        let capacity = config.capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let queue = Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            sender,
            capacity,
            retention: config.retention,
            shutdown: CancellationToken::new(),
        });

        for worker_id in 0..workers {
            let queue = queue.clone();
            let receiver = receiver.clone();
            let runner = runner.clone();
            tokio::spawn(async move {
                queue.worker_loop(worker_id, receiver, runner).await;
            });
        }

        let sweeper = queue.clone();
        let sweep_interval = config.sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            sweeper.sweep_loop(sweep_interval).await;
        });

        tracing::info!(workers, capacity, retention_secs = config.retention.as_secs(), "Job queue started");
        queue
    }

    /// Register a job and hand it to the workers.
    pub async fn submit(&self, payload: JobPayload) -> Result<Uuid, PipelineError> {
        let job_id = Uuid::new_v4();
        let kind = payload.kind();
        self.jobs
            .write()
            .await
            .insert(job_id, Job::pending(job_id, &payload));

        if self.sender.try_send(QueuedJob { job_id, payload }).is_err() {
            self.jobs.write().await.remove(&job_id);
            metrics::counter!("pipeline_jobs_rejected_total").increment(1);
            tracing::warn!(capacity = self.capacity, "Job queue full, submission rejected");
            return Err(PipelineError::QueueFull);
        }

        metrics::counter!("pipeline_jobs_submitted_total", "kind" => kind.to_string()).increment(1);
        tracing::info!(job_id = %job_id, kind = %kind, "Job submitted");
        Ok(job_id)
    }

    /// Current view of a job; `not_found` for unknown or evicted ids.
    pub async fn status(&self, job_id: Uuid) -> JobSnapshot {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(Job::snapshot)
            .unwrap_or_else(|| JobSnapshot::not_found(job_id))
    }

    /// Like [`JobQueue::status`], with unknown ids as an error.
    pub async fn get(&self, job_id: Uuid) -> Result<JobSnapshot, PipelineError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(Job::snapshot)
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    /// Jobs waiting in the pending channel.
    pub fn depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// Job records currently retained.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Drop finished jobs older than the retention period.
    pub async fn evict_expired(&self) -> usize {
        let retention = self.retention;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !job.finished_for().is_some_and(|age| age >= retention));
        let evicted = before - jobs.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = jobs.len(), "Evicted expired jobs");
        }
        evicted
    }

    /// Stop the workers and cancel jobs in progress.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
        runner: Arc<dyn JobRunner>,
    ) {
        tracing::debug!(worker_id, "Job worker started");

        loop {
            let queued = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                queued = async { receiver.lock().await.recv().await } => queued,
            };
            let Some(queued) = queued else { break };
            self.process(worker_id, queued, runner.as_ref()).await;
        }

        tracing::debug!(worker_id, "Job worker stopped");
    }

    async fn process(&self, worker_id: usize, queued: QueuedJob, runner: &dyn JobRunner) {
        let job_id = queued.job_id;
        let claimed = match self.jobs.write().await.get_mut(&job_id) {
            Some(job) => job.start(),
            None => false,
        };
        if !claimed {
            tracing::warn!(job_id = %job_id, worker_id, "Job record missing or already claimed");
            return;
        }

        tracing::info!(job_id = %job_id, worker_id, kind = %queued.payload.kind(), "Processing job");
        let started = std::time::Instant::now();
        let outcome = runner
            .run(queued.payload, &self.shutdown.child_token())
            .await
            .map_err(|err| err.to_string());

        match &outcome {
            Ok(_) => {
                metrics::counter!("pipeline_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
            Err(error) => {
                metrics::counter!("pipeline_jobs_failed_total").increment(1);
                tracing::error!(job_id = %job_id, error = %error, "Job failed");
            }
        }

        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.finish(outcome);
        }
    }

    async fn sweep_loop(&self, interval: Duration) {
        // First sweep one full period after start
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.evict_expired().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::{DocumentKind, OcrOutput};
    use crate::models::job::JobStatus;
    use tokio::sync::Semaphore;

    /// Runs OCR jobs as an echo of the language; fails summaries. Each run
    /// waits for a permit so tests control when jobs finish.
    struct GatedRunner {
        gate: Semaphore,
    }

    impl GatedRunner {
        fn open() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
            })
        }

        fn closed() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
            })
        }
    }

    #[async_trait]
    impl JobRunner for GatedRunner {
        async fn run(
            &self,
            payload: JobPayload,
            _cancel: &CancellationToken,
        ) -> Result<JobOutput, PipelineError> {
            let _permit = self.gate.acquire().await.map_err(|_| PipelineError::QueueFull)?;
            match payload {
                JobPayload::Ocr { language, kind, .. } => Ok(JobOutput::Ocr(OcrOutput::new(
                    kind,
                    &language,
                    vec![format!("page in {language}")],
                    vec![],
                ))),
                JobPayload::Summary { .. } => Err(PipelineError::BatchAborted {
                    index: 0,
                    source: crate::services::UnitError::Cancelled,
                }),
            }
        }
    }

    fn config(workers: usize, capacity: usize, retention: Duration) -> JobQueueConfig {
        JobQueueConfig {
            workers,
            capacity,
            retention,
            sweep_interval: Duration::from_secs(3600),
        }
    }

    fn ocr_payload() -> JobPayload {
        JobPayload::Ocr {
            document: b"%PDF".to_vec(),
            kind: DocumentKind::Pdf,
            language: "eng".to_string(),
        }
    }

    fn summary_payload() -> JobPayload {
        JobPayload::Summary {
            text: "text".to_string(),
            total_pages: 1,
            level: 1,
            language: "english".to_string(),
        }
    }

    async fn wait_terminal(queue: &JobQueue, job_id: Uuid) -> JobSnapshot {
        for _ in 0..200 {
            let snapshot = queue.status(job_id).await;
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn test_submitted_job_is_immediately_visible() {
        let runner = GatedRunner::closed();
        let queue = JobQueue::start(config(1, 4, Duration::from_secs(60)), runner.clone());

        let job_id = queue.submit(ocr_payload()).await.unwrap();
        let status = queue.status(job_id).await.status;
        assert!(matches!(status, JobStatus::Pending | JobStatus::Processing));

        runner.gate.add_permits(1);
        let done = wait_terminal(&queue, job_id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.started_at.is_some());
        assert!(done.finished_at.is_some());
        assert!(matches!(done.result, Some(JobOutput::Ocr(_))));
    }

    #[tokio::test]
    async fn test_terminal_status_is_stable() {
        let queue = JobQueue::start(config(2, 4, Duration::from_secs(60)), GatedRunner::open());
        let job_id = queue.submit(summary_payload()).await.unwrap();

        let first = wait_terminal(&queue, job_id).await;
        assert_eq!(first.status, JobStatus::Failed);
        assert!(first.error.unwrap().contains("aborted"));

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert_eq!(queue.status(job_id).await.status, JobStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_burst_beyond_capacity_is_rejected_without_leaking() {
        let runner = GatedRunner::closed();
        let queue = JobQueue::start(config(1, 2, Duration::from_secs(60)), runner.clone());

        let mut accepted = Vec::new();
        let mut rejected = 0;
        for _ in 0..10 {
            match queue.submit(ocr_payload()).await {
                Ok(id) => accepted.push(id),
                Err(PipelineError::QueueFull) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert!(rejected >= 1);
        assert_eq!(queue.len().await, accepted.len());
        assert!(accepted.len() <= 3);

        runner.gate.add_permits(accepted.len());
        for id in accepted {
            assert_eq!(wait_terminal(&queue, id).await.status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let queue = JobQueue::start(config(1, 1, Duration::from_secs(60)), GatedRunner::open());
        let id = Uuid::new_v4();
        assert_eq!(queue.status(id).await.status, JobStatus::NotFound);
        assert!(matches!(queue.get(id).await, Err(PipelineError::JobNotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_finished_jobs_are_evicted_after_retention() {
        let runner = GatedRunner::closed();
        let queue = JobQueue::start(config(1, 4, Duration::from_millis(50)), runner.clone());

        let finished = queue.submit(ocr_payload()).await.unwrap();
        runner.gate.add_permits(1);
        assert_eq!(wait_terminal(&queue, finished).await.status, JobStatus::Completed);

        let waiting = queue.submit(ocr_payload()).await.unwrap();
        assert_eq!(queue.evict_expired().await, 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(queue.evict_expired().await, 1);
        assert_eq!(queue.status(finished).await.status, JobStatus::NotFound);
        assert_ne!(queue.status(waiting).await.status, JobStatus::NotFound);
    }

    #[tokio::test]
    async fn test_sweeper_waits_a_full_period_before_evicting() {
        let runner = GatedRunner::open();
        let queue = JobQueue::start(
            JobQueueConfig {
                workers: 1,
                capacity: 4,
                retention: Duration::ZERO,
                sweep_interval: Duration::from_millis(300),
            },
            runner,
        );

        let job_id = queue.submit(ocr_payload()).await.unwrap();
        assert_eq!(wait_terminal(&queue, job_id).await.status, JobStatus::Completed);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(queue.status(job_id).await.status, JobStatus::NotFound);
    }
}
