use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::services::UnitError;

/// A unit of work that has not started yet. Futures are lazy, so the unit
/// runs on whichever task first polls it.
pub type UnitFuture = BoxFuture<'static, Result<String, UnitError>>;

type UnitResult = Result<String, UnitError>;

struct PoolJob {
    unit: UnitFuture,
    reply: oneshot::Sender<UnitResult>,
}

/// Fixed set of long-lived workers draining a bounded unit channel.
///
/// When the channel is full the submitting task runs the unit itself, so
/// overflow never queues without bound and never blocks the caller forever.
pub struct WorkerPool {
    sender: mpsc::Sender<PoolJob>,
    workers: usize,
    capacity: usize,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Start `workers` worker tasks on the current tokio runtime.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = CancellationToken::new();

        for worker_id in 0..workers {
            let receiver = receiver.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, receiver, shutdown).await;
            });
        }

        tracing::info!(workers, capacity, "Worker pool started");
        Self {
            sender,
            workers,
            capacity,
            shutdown,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units waiting in the channel.
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// Run `unit` on a pool worker, or inline when the pool is saturated.
    pub async fn submit(&self, unit: UnitFuture) -> UnitResult {
        let (reply, response) = oneshot::channel();

        match self.sender.try_send(PoolJob { unit, reply }) {
            Ok(()) => response.await.unwrap_or(Err(UnitError::WorkerLost)),
            Err(mpsc::error::TrySendError::Full(job))
            | Err(mpsc::error::TrySendError::Closed(job)) => {
                metrics::counter!("pipeline_pool_overflow_total").increment(1);
                tracing::debug!("Worker pool saturated, running unit on caller");
                run_unit(job.unit).await
            }
        }
    }

    /// Stop the workers. Units already in the channel are dropped and their
    /// submitters see `WorkerLost`; later submissions run inline.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<PoolJob>>>,
    shutdown: CancellationToken,
) {
    tracing::debug!(worker_id, "Pool worker started");

    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = async { receiver.lock().await.recv().await } => job,
        };
        let Some(job) = job else { break };

        let result = run_unit(job.unit).await;
        // The submitter may have gone away; nothing to deliver then.
        let _ = job.reply.send(result);
    }

    tracing::debug!(worker_id, "Pool worker stopped");
}

async fn run_unit(unit: UnitFuture) -> UnitResult {
    metrics::counter!("pipeline_units_total").increment(1);
    let result = AssertUnwindSafe(unit)
        .catch_unwind()
        .await
        .unwrap_or(Err(UnitError::Panicked));
    if result.is_err() {
        metrics::counter!("pipeline_unit_failures_total").increment(1);
    }
    result
}
