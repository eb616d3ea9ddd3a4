//! In-memory doubles for the stores, the queue and the external
//! capabilities. Test builds only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db::StoreError;
use crate::generation::models::{CompletedJob, Delivery, GenerationJob, JobStatus};
use crate::generation::queue::{QueueError, WorkQueue};
use crate::generation::store::{not_found, wrong_state, JobStore};
use crate::llm_client::{FragmentStream, GenerationBackend, LlmError, Prompt, FRAGMENT_BUFFER};
use crate::scoring::HeuristicScorer;
use crate::state::AppState;
use crate::voice::embedding::{Embedder, EmbeddingError};
use crate::voice::models::VoiceProfile;
use crate::voice::store::ProfileStore;

// ────────────────────────────────────────────────────────────────────────────
// Job store
// ────────────────────────────────────────────────────────────────────────────

/// Jobs kept in insertion order; every method holds the lock for the whole
/// read-check-write, which gives the same atomicity as the conditional
/// UPDATEs in Postgres.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<GenerationJob>>,
}

impl MemoryJobStore {
    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<GenerationJob> {
        self.jobs.lock().unwrap().clone()
    }

    fn with_job<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut GenerationJob) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.iter_mut().find(|j| j.id == id).ok_or_else(|| not_found(id))?;
        f(job)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &GenerationJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(StoreError::Conflict(format!("Job {} already exists", job.id)));
        }
        jobs.push(job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<GenerationJob, StoreError> {
        self.with_job(id, |job| Ok(job.clone()))
    }

    async fn claim(&self, id: Uuid, delivery: Delivery) -> Result<GenerationJob, StoreError> {
        self.with_job(id, |job| {
            if job.delivery != delivery {
                return Err(StoreError::Conflict(format!(
                    "Job {id} is delivered via {}",
                    job.delivery.as_str()
                )));
            }
            if job.status != JobStatus::Pending {
                return Err(wrong_state(id, job.status, "PENDING"));
            }
            job.status = JobStatus::Processing;
            job.updated_at = Utc::now();
            Ok(job.clone())
        })
    }

    async fn record_attempt(&self, id: Uuid) -> Result<i32, StoreError> {
        self.with_job(id, |job| {
            if job.status != JobStatus::Processing {
                return Err(wrong_state(id, job.status, "PROCESSING"));
            }
            job.attempts += 1;
            Ok(job.attempts)
        })
    }

    async fn complete(&self, id: Uuid, result: CompletedJob) -> Result<(), StoreError> {
        self.with_job(id, |job| {
            if job.status != JobStatus::Processing {
                return Err(wrong_state(id, job.status, "PROCESSING"));
            }
            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.content = Some(result.content);
            job.metrics = Some(Json(result.metrics));
            job.duration_ms = Some(result.duration_ms);
            job.token_usage = Some(result.token_usage);
            job.error = None;
            job.completed_at = Some(now);
            job.updated_at = now;
            Ok(())
        })
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        self.with_job(id, |job| {
            if job.status.is_terminal() {
                return Err(wrong_state(id, job.status, "PENDING or PROCESSING"));
            }
            let now = Utc::now();
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.content = None;
            job.metrics = None;
            job.completed_at = Some(now);
            job.updated_at = now;
            Ok(())
        })
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: usize,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .rev()
            .filter(|j| j.owner_id == owner_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn pending_queue_jobs(&self) -> Result<Vec<Uuid>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending && j.delivery == Delivery::Queue)
            .map(|j| j.id)
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Profile store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<Vec<VoiceProfile>>,
}

fn profile_not_found(id: Uuid) -> StoreError {
    StoreError::NotFound(format!("Voice profile {id}"))
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn insert(&self, profile: &VoiceProfile) -> Result<(), StoreError> {
        self.profiles.lock().unwrap().push(profile.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<VoiceProfile, StoreError> {
        self.profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| profile_not_found(id))
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<VoiceProfile>, StoreError> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn update(&self, profile: &VoiceProfile) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().unwrap();
        let slot = profiles
            .iter_mut()
            .find(|p| p.id == profile.id)
            .ok_or_else(|| profile_not_found(profile.id))?;
        *slot = profile.clone();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().unwrap();
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            return Err(profile_not_found(id));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Queue
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<VecDeque<Uuid>>,
    unavailable: bool,
}

impl MemoryQueue {
    /// A queue whose pushes always fail.
    pub fn unavailable() -> Self {
        Self {
            entries: Mutex::default(),
            unavailable: true,
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn push(&self, job_id: Uuid) -> Result<(), QueueError> {
        if self.unavailable {
            return Err(QueueError::ConnectionFailed("queue unavailable".to_string()));
        }
        self.entries.lock().unwrap().push_back(job_id);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Uuid>, QueueError> {
        Ok(self.entries.lock().unwrap().pop_front())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.entries.lock().unwrap().len())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Generation backend
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    Reply(String),
    Fail(String),
}

/// Generation backend answering from a script. Failures carry the call
/// number, e.g. `upstream failure #2`.
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    fragments: Vec<String>,
    stream_error: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedBackend {
    fn build(steps: Vec<Step>, fallback: Step, fragments: Vec<String>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            fragments,
            stream_error: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::default(),
        }
    }

    /// Always returns `text`; streams it as a single fragment.
    pub fn replying(text: &str) -> Self {
        Self::build(Vec::new(), Step::Reply(text.to_string()), Vec::new())
    }

    /// Every call fails, including opening a stream.
    pub fn failing() -> Self {
        Self::build(Vec::new(), Step::Fail("upstream failure".to_string()), Vec::new())
    }

    /// One scripted answer per call, then failures.
    pub fn sequence(steps: Vec<Result<&str, &str>>) -> Self {
        let steps = steps
            .into_iter()
            .map(|s| match s {
                Ok(text) => Step::Reply(text.to_string()),
                Err(msg) => Step::Fail(msg.to_string()),
            })
            .collect();
        Self::build(steps, Step::Fail("upstream failure".to_string()), Vec::new())
    }

    /// Streams `fragments` in order; blocking calls return them joined.
    pub fn streaming(fragments: Vec<&str>) -> Self {
        let fragments: Vec<String> = fragments.into_iter().map(str::to_string).collect();
        Self::build(Vec::new(), Step::Reply(fragments.concat()), fragments)
    }

    /// Fails the stream after the last fragment.
    pub fn with_stream_error(mut self, message: &str) -> Self {
        self.stream_error = Some(message.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_step(&self, prompt: &Prompt) -> (usize, Step) {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().unwrap().push(prompt.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        (call, step)
    }
}

fn scripted_failure(message: &str, call: usize) -> LlmError {
    LlmError::Api {
        status: 502,
        message: format!("{message} #{call}"),
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, prompt: &Prompt) -> Result<String, LlmError> {
        match self.next_step(prompt) {
            (_, Step::Reply(text)) => Ok(text),
            (call, Step::Fail(message)) => Err(scripted_failure(&message, call)),
        }
    }

    async fn generate_stream(&self, prompt: &Prompt) -> Result<FragmentStream, LlmError> {
        let (call, step) = self.next_step(prompt);
        let fragments = if self.fragments.is_empty() {
            match step {
                Step::Reply(text) => vec![text],
                Step::Fail(message) => return Err(scripted_failure(&message, call)),
            }
        } else {
            self.fragments.clone()
        };
        let stream_error = self.stream_error.clone();

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(async move {
            for fragment in fragments {
                if tx.send(Ok(fragment)).await.is_err() {
                    return;
                }
            }
            if let Some(message) = stream_error {
                let _ = tx.send(Err(LlmError::Stream(message))).await;
            }
        });
        Ok(rx)
    }
}

/// Panics on every call.
pub struct PanickingBackend;

#[async_trait]
impl GenerationBackend for PanickingBackend {
    async fn generate(&self, _prompt: &Prompt) -> Result<String, LlmError> {
        panic!("backend exploded");
    }

    async fn generate_stream(&self, _prompt: &Prompt) -> Result<FragmentStream, LlmError> {
        panic!("backend exploded");
    }
}

/// Never answers.
pub struct HangingBackend;

#[async_trait]
impl GenerationBackend for HangingBackend {
    async fn generate(&self, _prompt: &Prompt) -> Result<String, LlmError> {
        std::future::pending().await
    }

    async fn generate_stream(&self, _prompt: &Prompt) -> Result<FragmentStream, LlmError> {
        std::future::pending().await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Embedder
// ────────────────────────────────────────────────────────────────────────────

/// Deterministic embedder: counts alphanumeric characters into
/// `dimensions` buckets.
pub struct FixedEmbedder {
    dimensions: usize,
    fail: bool,
}

impl FixedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            dimensions: 0,
            fail: true,
        }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for c in text.to_lowercase().chars().filter(|c| c.is_alphanumeric()) {
            vector[(c as u32 as usize) % self.dimensions] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::Unavailable("model offline".to_string()));
        }
        Ok(self.vector(text))
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

// ────────────────────────────────────────────────────────────────────────────
// App state
// ────────────────────────────────────────────────────────────────────────────

/// Router state backed entirely by in-memory doubles.
pub fn app_state(llm: ScriptedBackend) -> (AppState, Arc<MemoryJobStore>) {
    let jobs = Arc::new(MemoryJobStore::default());
    let state = AppState::new(
        jobs.clone(),
        Arc::new(MemoryQueue::default()),
        Arc::new(MemoryProfileStore::default()),
        Arc::new(FixedEmbedder::new(16)),
        Arc::new(llm),
        Arc::new(HeuristicScorer::default()),
    );
    (state, jobs)
}
