use serde::Deserialize;
use std::time::Duration;

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// OpenRouter API key. Summaries fail per chunk when unset.
    #[serde(default)]
    pub openrouter_api_key: Option<String>,

    /// OpenRouter model identifier
    #[serde(default = "default_openrouter_model")]
    pub openrouter_model: String,

    /// Tesseract executable
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,

    /// pdftoppm executable
    #[serde(default = "default_pdftoppm_cmd")]
    pub pdftoppm_cmd: String,

    /// Rasterization resolution for PDF pages
    #[serde(default = "default_rasterize_dpi")]
    pub rasterize_dpi: u32,

    /// Long-lived workers in the unit pool
    #[serde(default = "default_pool_workers")]
    pub pool_workers: usize,

    /// Pending-unit channel capacity. Defaults to twice the worker count.
    #[serde(default)]
    pub pool_capacity: Option<usize>,

    /// Background workers draining the async job queue
    #[serde(default = "default_queue_workers")]
    pub queue_workers: usize,

    /// Pending-job channel capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Concurrent jobs allowed before admission rejects
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Resident memory ceiling in bytes
    #[serde(default = "default_memory_ceiling_bytes")]
    pub memory_ceiling_bytes: u64,

    /// How long an admission sample stays valid
    #[serde(default = "default_admission_sample_interval_ms")]
    pub admission_sample_interval_ms: u64,

    /// Consecutive failures that trip the circuit breaker
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u64,

    /// Seconds the breaker stays open before allowing a trial
    #[serde(default = "default_breaker_recovery_secs")]
    pub breaker_recovery_secs: u64,

    /// Units handled by one fan-out task
    #[serde(default = "default_max_units_per_task")]
    pub max_units_per_task: usize,

    /// Upper bound on a single OCR or summary call
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,

    /// How long finished jobs stay pollable
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,

    /// How often expired jobs are swept
    #[serde(default = "default_job_sweep_interval_secs")]
    pub job_sweep_interval_secs: u64,

    /// Request body limit for uploads
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_openrouter_model() -> String {
    "google/gemini-2.0-flash-001".to_string()
}

fn default_tesseract_cmd() -> String {
    "tesseract".to_string()
}

fn default_pdftoppm_cmd() -> String {
    "pdftoppm".to_string()
}

fn default_rasterize_dpi() -> u32 {
    100
}

fn default_pool_workers() -> usize {
    2
}

fn default_queue_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    50
}

fn default_max_concurrent_jobs() -> usize {
    10
}

fn default_memory_ceiling_bytes() -> u64 {
    6 * 1024 * 1024 * 1024
}

fn default_admission_sample_interval_ms() -> u64 {
    2_000
}

fn default_breaker_failure_threshold() -> u64 {
    3
}

fn default_breaker_recovery_secs() -> u64 {
    10
}

fn default_max_units_per_task() -> usize {
    4
}

fn default_unit_timeout_secs() -> u64 {
    120
}

fn default_job_retention_secs() -> u64 {
    3_600
}

fn default_job_sweep_interval_secs() -> u64 {
    60
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Typed knobs for the processing core. Counts are clamped to at least one.
    pub fn pipeline(&self) -> PipelineConfig {
        let pool_workers = self.pool_workers.max(1);
        PipelineConfig {
            pool_workers,
            pool_capacity: self.pool_capacity.unwrap_or(pool_workers * 2).max(1),
            queue_workers: self.queue_workers.max(1),
            queue_capacity: self.queue_capacity.max(1),
            max_concurrent_jobs: self.max_concurrent_jobs.max(1),
            memory_ceiling_bytes: self.memory_ceiling_bytes,
            admission_sample_interval: Duration::from_millis(self.admission_sample_interval_ms),
            breaker_failure_threshold: self.breaker_failure_threshold.max(1),
            breaker_recovery_window: Duration::from_secs(self.breaker_recovery_secs),
            max_units_per_task: self.max_units_per_task.max(1),
            unit_timeout: Duration::from_secs(self.unit_timeout_secs.max(1)),
            job_retention: Duration::from_secs(self.job_retention_secs),
            job_sweep_interval: Duration::from_secs(self.job_sweep_interval_secs.max(1)),
        }
    }
}

/// Concurrency and resource budget of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pool_workers: usize,
    pub pool_capacity: usize,
    pub queue_workers: usize,
    pub queue_capacity: usize,
    pub max_concurrent_jobs: usize,
    pub memory_ceiling_bytes: u64,
    pub admission_sample_interval: Duration,
    pub breaker_failure_threshold: u64,
    pub breaker_recovery_window: Duration,
    pub max_units_per_task: usize,
    pub unit_timeout: Duration,
    pub job_retention: Duration,
    pub job_sweep_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_workers: default_pool_workers(),
            pool_capacity: default_pool_workers() * 2,
            queue_workers: default_queue_workers(),
            queue_capacity: default_queue_capacity(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            memory_ceiling_bytes: default_memory_ceiling_bytes(),
            admission_sample_interval: Duration::from_millis(default_admission_sample_interval_ms()),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_recovery_window: Duration::from_secs(default_breaker_recovery_secs()),
            max_units_per_task: default_max_units_per_task(),
            unit_timeout: Duration::from_secs(default_unit_timeout_secs()),
            job_retention: Duration::from_secs(default_job_retention_secs()),
            job_sweep_interval: Duration::from_secs(default_job_sweep_interval_secs()),
        }
    }
}
