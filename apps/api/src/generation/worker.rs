//! Worker pool draining the generation queue.
//!
//! Each of the N workers pulls job ids FIFO, claims the job atomically in
//! the job store, and runs it to a terminal state before taking the next.
//! Queue entries carry no state of their own: a duplicate or stale id loses
//! the claim and is skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::StoreError;
use crate::generation::context::resolve_voice_samples;
use crate::generation::models::{CompletedJob, Delivery, GenerationJob};
use crate::generation::prompts::{article_prompt, PromptInputs};
use crate::generation::queue::WorkQueue;
use crate::generation::store::JobStore;
use crate::llm_client::{GenerationBackend, LlmError, Prompt};
use crate::scoring::ContentScorer;
use crate::voice::store::ProfileStore;

/// Error stored on jobs still running when shutdown gives up waiting.
pub const INTERRUPTED_BY_SHUTDOWN: &str = "Interrupted by shutdown";

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Pool is already running")]
    AlreadyRunning,

    #[error("Pool is not running")]
    NotRunning,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub num_workers: usize,
    /// Generation attempts per job, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub backoff_base: Duration,
    /// Idle wait when the queue is empty.
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 3,
            max_attempts: 2,
            backoff_base: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Delay before attempt `attempt + 1`: `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
}

// ────────────────────────────────────────────────────────────────────────────
// Statistics
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    pub active_workers: usize,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// Queue entries dropped because the claim was lost.
    pub jobs_skipped: u64,
    pub average_job_duration: Duration,
}

impl PoolStats {
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }
}

struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_skipped: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
    /// Job tasks currently running, by job id.
    in_flight: Mutex<HashMap<Uuid, AbortHandle>>,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_skipped: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, outcome: JobOutcome, duration: Duration) {
        let counter = match outcome {
            JobOutcome::Completed => &self.jobs_completed,
            JobOutcome::Failed => &self.jobs_failed,
            JobOutcome::Skipped => {
                self.jobs_skipped.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_job_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            jobs_skipped: self.jobs_skipped.load(Ordering::SeqCst),
            average_job_duration,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Job execution
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// The claim was lost or the job is not queue-delivered.
    Skipped,
}

/// Runs one claimed job end to end: samples, generation with retry,
/// scoring, terminal write.
#[derive(Clone)]
pub struct JobExecutor {
    jobs: Arc<dyn JobStore>,
    profiles: Arc<dyn ProfileStore>,
    llm: Arc<dyn GenerationBackend>,
    scorer: Arc<dyn ContentScorer>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl JobExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        profiles: Arc<dyn ProfileStore>,
        llm: Arc<dyn GenerationBackend>,
        scorer: Arc<dyn ContentScorer>,
        config: &WorkerPoolConfig,
    ) -> Self {
        Self {
            jobs,
            profiles,
            llm,
            scorer,
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub async fn execute(&self, job_id: Uuid) -> JobOutcome {
        let job = match self.jobs.claim(job_id, Delivery::Queue).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) | Err(StoreError::Conflict(_)) => {
                debug!(job_id = %job_id, "Claim lost, skipping queue entry");
                return JobOutcome::Skipped;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to claim job");
                return JobOutcome::Skipped;
            }
        };

        let started = Instant::now();
        let samples = resolve_voice_samples(self.profiles.as_ref(), &job.voice_profile_ids).await;
        let prompt = article_prompt(&PromptInputs {
            topic: &job.topic,
            context: job.context.as_deref(),
            outline: job.outline.as_deref(),
            voice_samples: &samples,
        });

        match self.generate_with_retry(&job, &prompt).await {
            Ok(content) => {
                let metrics = self.scorer.analyze(&content, &job.keywords);
                let duration_ms = started.elapsed().as_millis() as i64;
                let score = metrics.score;
                match self
                    .jobs
                    .complete(job_id, CompletedJob::new(content, metrics, duration_ms))
                    .await
                {
                    Ok(()) => {
                        info!(job_id = %job_id, score, duration_ms, "Job completed");
                        JobOutcome::Completed
                    }
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "Failed to store job result");
                        self.mark_failed(job_id, &format!("Failed to store result: {e}"))
                            .await;
                        JobOutcome::Failed
                    }
                }
            }
            Err(e) => {
                error!(
                    job_id = %job_id,
                    attempts = self.max_attempts,
                    error = %e,
                    "Job failed after exhausting attempts"
                );
                self.mark_failed(job_id, &e.to_string()).await;
                JobOutcome::Failed
            }
        }
    }

    /// Each attempt is a full generation call; the last error is returned
    /// once `max_attempts` is reached.
    async fn generate_with_retry(
        &self,
        job: &GenerationJob,
        prompt: &Prompt,
    ) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Err(e) = self.jobs.record_attempt(job.id).await {
                warn!(job_id = %job.id, error = %e, "Failed to record attempt");
            }
            info!(job_id = %job.id, attempt, max_attempts = self.max_attempts, "Generating");

            match self.llm.generate(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.max_attempts => {
                    let delay = backoff_delay(self.backoff_base, attempt);
                    warn!(
                        job_id = %job.id,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Generation attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn mark_failed(&self, job_id: Uuid, message: &str) {
        if let Err(e) = self.jobs.fail(job_id, message).await {
            error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pool
// ────────────────────────────────────────────────────────────────────────────

pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn WorkQueue>,
    executor: JobExecutor,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, queue: Arc<dyn WorkQueue>, executor: JobExecutor) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            queue,
            executor,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Re-enqueues queue-delivered jobs still PENDING from a previous run,
    /// then spawns the workers.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        match self.recover_pending().await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Re-enqueued pending jobs"),
            Err(e) => warn!(error = %e, "Failed to recover pending jobs"),
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{i}"),
                queue: Arc::clone(&self.queue),
                executor: self.executor.clone(),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                stats: Arc::clone(&self.stats),
            };
            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");
        Ok(())
    }

    async fn recover_pending(&self) -> anyhow::Result<usize> {
        let pending = self.executor.jobs().pending_queue_jobs().await?;
        for id in &pending {
            self.queue.push(*id).await?;
        }
        Ok(pending.len())
    }

    /// Signals every worker and waits for in-flight jobs to finish. Jobs
    /// still running when the timeout expires are aborted and marked FAILED.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.worker_handles.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, drain).await;
        self.is_running.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                for worker in &aborts {
                    worker.abort();
                }
                let interrupted: Vec<_> = self.stats.in_flight.lock().await.drain().collect();
                warn!(
                    interrupted = interrupted.len(),
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Shutdown timed out, failing in-flight jobs"
                );
                for (job_id, task) in interrupted {
                    task.abort();
                    self.executor.mark_failed(job_id, INTERRUPTED_BY_SHUTDOWN).await;
                }
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

struct Worker {
    id: String,
    queue: Arc<dyn WorkQueue>,
    executor: JobExecutor,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.pop().await {
                Ok(Some(job_id)) => self.process(job_id).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = self.shutdown_rx.recv() => break,
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Runs the job on its own task so a panic fails that job only.
    async fn process(&self, job_id: Uuid) {
        let started = Instant::now();
        self.stats.active_workers.fetch_add(1, Ordering::SeqCst);

        let executor = self.executor.clone();
        let task = tokio::spawn(async move { executor.execute(job_id).await });
        self.stats
            .in_flight
            .lock()
            .await
            .insert(job_id, task.abort_handle());
        let result = task.await;
        self.stats.in_flight.lock().await.remove(&job_id);

        let outcome = match result {
            Ok(outcome) => outcome,
            // aborted by shutdown, which records the failure itself
            Err(e) if e.is_cancelled() => JobOutcome::Failed,
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "Job task panicked");
                self.executor
                    .mark_failed(job_id, "Internal error while processing job")
                    .await;
                JobOutcome::Failed
            }
        };

        self.stats.active_workers.fetch_sub(1, Ordering::SeqCst);
        self.stats.record(outcome, started.elapsed());
    }
}
