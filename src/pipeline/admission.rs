use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of the process memory figure used for admission.
pub trait MemorySampler: Send + Sync {
    /// Current memory use in bytes.
    fn sample(&self) -> u64;
}

/// Resident set size of this process, read from `/proc/self/status`.
/// Reports zero where procfs is unavailable, which never rejects.
pub struct ProcessMemory;

impl MemorySampler for ProcessMemory {
    fn sample(&self) -> u64 {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| parse_vm_rss(&status))
            .unwrap_or(0)
    }
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    taken_at: Instant,
    memory_bytes: u64,
    high_load: bool,
}

/// Load figures exposed on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LoadSnapshot {
    pub active_jobs: usize,
    pub max_concurrent_jobs: usize,
    pub memory_bytes: Option<u64>,
    pub memory_ceiling_bytes: u64,
}

/// Advisory backpressure: refuses new work when too many jobs are running or
/// the process is using too much memory.
///
/// Memory is sampled at most once per `sample_interval`. A high-load verdict
/// is cached for the same interval and short-circuits checks until it
/// expires. The count is checked and incremented separately, so concurrent
/// callers can overshoot the ceiling slightly.
pub struct AdmissionController {
    active: AtomicUsize,
    max_concurrent_jobs: usize,
    memory_ceiling_bytes: u64,
    sample_interval: Duration,
    sampler: Arc<dyn MemorySampler>,
    last_sample: Mutex<Option<Sample>>,
}

impl AdmissionController {
    pub fn new(
        max_concurrent_jobs: usize,
        memory_ceiling_bytes: u64,
        sample_interval: Duration,
        sampler: Arc<dyn MemorySampler>,
    ) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            memory_ceiling_bytes,
            sample_interval,
            sampler,
            last_sample: Mutex::new(None),
        }
    }

    /// `true` admits the request.
    pub fn check_load(&self) -> bool {
        let active = self.active.load(Ordering::Acquire);
        let mut last = self
            .last_sample
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(sample) = *last {
            if sample.taken_at.elapsed() < self.sample_interval {
                return !sample.high_load && active < self.max_concurrent_jobs;
            }
        }

        let memory_bytes = self.sampler.sample();
        let high_load =
            active >= self.max_concurrent_jobs || memory_bytes > self.memory_ceiling_bytes;
        *last = Some(Sample {
            taken_at: Instant::now(),
            memory_bytes,
            high_load,
        });

        if high_load {
            tracing::warn!(
                active,
                max = self.max_concurrent_jobs,
                memory_bytes,
                ceiling = self.memory_ceiling_bytes,
                "System under high load"
            );
        }
        !high_load
    }

    /// Count a job as running until the guard is dropped.
    pub fn begin(&self) -> LoadGuard<'_> {
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!("pipeline_active_jobs").set(active as f64);
        LoadGuard { controller: self }
    }

    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        let last = *self
            .last_sample
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let memory_bytes = last.map(|sample| sample.memory_bytes);
        LoadSnapshot {
            active_jobs: self.active_jobs(),
            max_concurrent_jobs: self.max_concurrent_jobs,
            memory_bytes,
            memory_ceiling_bytes: self.memory_ceiling_bytes,
        }
    }
}

/// Decrements the concurrent-job count on drop.
pub struct LoadGuard<'a> {
    controller: &'a AdmissionController,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let active = self.controller.active.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::gauge!("pipeline_active_jobs").set(active as f64);
    }
}
