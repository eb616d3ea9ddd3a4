//! Live generation sessions for stream-delivered jobs.
//!
//! A session claims its job before the first fragment, forwards fragments as
//! `chunk` events in arrival order, and finishes with exactly one `done` or
//! `error` event. The job record is written regardless of whether anyone is
//! still listening.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::context::resolve_voice_samples;
use crate::generation::models::{CompletedJob, Delivery, GenerationJob};
use crate::generation::prompts::{article_prompt, PromptInputs};
use crate::generation::store::JobStore;
use crate::generation::worker::INTERRUPTED_BY_SHUTDOWN;
use crate::llm_client::{GenerationBackend, LlmError};
use crate::scoring::ContentScorer;
use crate::voice::store::ProfileStore;

/// Capacity of the event channel between a session and its subscriber.
pub const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Chunk { content: String, accumulated: String },
    Done { content: String },
    Error { error: String },
}

impl StreamEvent {
    /// SSE event name; matches the `type` discriminator.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk { .. })
    }
}

/// Parameters of `open`. `outline` and `voice_profile_ids` fall back to the
/// values stored on the job when absent.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub job_id: Uuid,
    pub topic: String,
    pub outline: Option<String>,
    pub voice_profile_ids: Option<Vec<Uuid>>,
}

#[derive(Clone)]
pub struct StreamSessions {
    jobs: Arc<dyn JobStore>,
    profiles: Arc<dyn ProfileStore>,
    llm: Arc<dyn GenerationBackend>,
    scorer: Arc<dyn ContentScorer>,
    /// Running sessions, by job id.
    active: Arc<Mutex<HashMap<Uuid, AbortHandle>>>,
}

struct SessionInputs {
    topic: String,
    outline: Option<String>,
    voice_profile_ids: Vec<Uuid>,
}

impl StreamSessions {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        profiles: Arc<dyn ProfileStore>,
        llm: Arc<dyn GenerationBackend>,
        scorer: Arc<dyn ContentScorer>,
    ) -> Self {
        Self {
            jobs,
            profiles,
            llm,
            scorer,
            active: Arc::default(),
        }
    }

    /// Claims the job for streaming and starts generating.
    ///
    /// Fails with `NotFound` for an unknown job and `Conflict` when the job
    /// is queue-delivered or already claimed, so a job has at most one
    /// subscriber and is never also run by the worker pool.
    pub async fn open(&self, request: StreamRequest) -> Result<mpsc::Receiver<StreamEvent>, AppError> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(AppError::Validation("topic cannot be empty".to_string()));
        }

        let job = self.jobs.claim(request.job_id, Delivery::Stream).await?;
        info!(job_id = %job.id, "Streaming session opened");

        let inputs = SessionInputs {
            topic: topic.to_string(),
            outline: request
                .outline
                .filter(|o| !o.trim().is_empty())
                .or_else(|| job.outline.clone()),
            voice_profile_ids: request
                .voice_profile_ids
                .unwrap_or_else(|| job.voice_profile_ids.clone()),
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let job_id = job.id;
        let task = tokio::spawn(self.clone().run(job, inputs, tx.clone()));
        self.active.lock().await.insert(job_id, task.abort_handle());

        let jobs = Arc::clone(&self.jobs);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let result = task.await;
            active.lock().await.remove(&job_id);
            match result {
                Ok(()) => {}
                // `interrupt_all` has already written the terminal state
                Err(e) if e.is_cancelled() => {
                    emit(
                        &tx,
                        StreamEvent::Error {
                            error: INTERRUPTED_BY_SHUTDOWN.to_string(),
                        },
                    )
                    .await;
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Streaming session panicked");
                    let message = "Internal error while streaming";
                    if let Err(e) = jobs.fail(job_id, message).await {
                        error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
                    }
                    emit(
                        &tx,
                        StreamEvent::Error {
                            error: message.to_string(),
                        },
                    )
                    .await;
                }
            }
        });

        Ok(rx)
    }

    /// Aborts every running session and marks its job FAILED. Subscribers
    /// still connected receive a final `error` event.
    pub async fn interrupt_all(&self) -> usize {
        let sessions: Vec<_> = self.active.lock().await.drain().collect();
        for (job_id, task) in &sessions {
            task.abort();
            if let Err(e) = self.jobs.fail(*job_id, INTERRUPTED_BY_SHUTDOWN).await {
                warn!(job_id = %job_id, error = %e, "Failed to mark interrupted job as failed");
            }
        }
        sessions.len()
    }

    async fn run(self, job: GenerationJob, inputs: SessionInputs, tx: mpsc::Sender<StreamEvent>) {
        let started = Instant::now();
        let samples = resolve_voice_samples(self.profiles.as_ref(), &inputs.voice_profile_ids).await;
        let prompt = article_prompt(&PromptInputs {
            topic: &inputs.topic,
            context: job.context.as_deref(),
            outline: inputs.outline.as_deref(),
            voice_samples: &samples,
        });

        let mut fragments = match self.llm.generate_stream(&prompt).await {
            Ok(fragments) => fragments,
            Err(e) => return self.fail(job.id, e, &tx).await,
        };

        let mut accumulated = String::new();
        while let Some(item) = fragments.recv().await {
            match item {
                Ok(fragment) if fragment.is_empty() => continue,
                Ok(fragment) => {
                    accumulated.push_str(&fragment);
                    emit(
                        &tx,
                        StreamEvent::Chunk {
                            content: fragment,
                            accumulated: accumulated.clone(),
                        },
                    )
                    .await;
                }
                Err(e) => return self.fail(job.id, e, &tx).await,
            }
        }

        let metrics = self.scorer.analyze(&accumulated, &job.keywords);
        let duration_ms = started.elapsed().as_millis() as i64;
        let result = CompletedJob::new(accumulated.clone(), metrics, duration_ms);

        match self.jobs.complete(job.id, result).await {
            Ok(()) => {
                info!(job_id = %job.id, duration_ms, "Streaming job completed");
                emit(&tx, StreamEvent::Done { content: accumulated }).await;
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to store streamed result");
                let message = format!("Failed to store result: {e}");
                if let Err(e) = self.jobs.fail(job.id, &message).await {
                    error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
                }
                emit(&tx, StreamEvent::Error { error: message }).await;
            }
        }
    }

    /// Persists FAILED, then reports the same message to the subscriber.
    async fn fail(&self, job_id: Uuid, err: LlmError, tx: &mpsc::Sender<StreamEvent>) {
        let message = err.to_string();
        warn!(job_id = %job_id, error = %message, "Streaming job failed");
        if let Err(e) = self.jobs.fail(job_id, &message).await {
            error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
        }
        emit(tx, StreamEvent::Error { error: message }).await;
    }
}

/// A gone subscriber is not an error: the session keeps going.
async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    let _ = tx.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::jobs::submit_job;
    use crate::generation::models::{CreateJobRequest, JobStatus};
    use crate::scoring::HeuristicScorer;
    use crate::testing::{
        HangingBackend, MemoryJobStore, MemoryProfileStore, MemoryQueue, PanickingBackend,
        ScriptedBackend,
    };
    use std::time::Duration;

    fn sessions_with(llm: Arc<dyn GenerationBackend>) -> (StreamSessions, Arc<MemoryJobStore>) {
        let jobs = Arc::new(MemoryJobStore::default());
        let sessions = StreamSessions::new(
            jobs.clone(),
            Arc::new(MemoryProfileStore::default()),
            llm,
            Arc::new(HeuristicScorer::default()),
        );
        (sessions, jobs)
    }

    fn sessions(llm: ScriptedBackend) -> (StreamSessions, Arc<MemoryJobStore>, Arc<ScriptedBackend>) {
        let llm = Arc::new(llm);
        let (sessions, jobs) = sessions_with(llm.clone());
        (sessions, jobs, llm)
    }

    async fn stream_job(jobs: &MemoryJobStore, delivery: Delivery) -> Uuid {
        let request = CreateJobRequest {
            owner_id: Uuid::new_v4(),
            topic: "Streaming".to_string(),
            context: None,
            outline: Some("1. Intro".to_string()),
            voice_profile_ids: None,
            keywords: None,
            delivery: Some(delivery),
        };
        submit_job(jobs, &MemoryQueue::default(), request)
            .await
            .unwrap()
            .id
    }

    fn open_request(job_id: Uuid) -> StreamRequest {
        StreamRequest {
            job_id,
            topic: "Streaming".to_string(),
            outline: None,
            voice_profile_ids: None,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn chunk(content: &str, accumulated: &str) -> StreamEvent {
        StreamEvent::Chunk {
            content: content.to_string(),
            accumulated: accumulated.to_string(),
        }
    }

    #[tokio::test]
    async fn test_fragments_arrive_in_order_then_done() {
        let (sessions, jobs, _) = sessions(ScriptedBackend::streaming(vec!["A", "B", "C"]));
        let id = stream_job(&jobs, Delivery::Stream).await;

        let events = collect(sessions.open(open_request(id)).await.unwrap()).await;

        assert_eq!(
            events,
            vec![
                chunk("A", "A"),
                chunk("B", "AB"),
                chunk("C", "ABC"),
                StreamEvent::Done {
                    content: "ABC".to_string()
                },
            ]
        );
        let job = jobs.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.content.as_deref(), Some("ABC"));
        assert!(job.metrics.is_some());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_persisted_and_terminal() {
        let (sessions, jobs, _) = sessions(
            ScriptedBackend::streaming(vec!["A", "B"]).with_stream_error("connection reset"),
        );
        let id = stream_job(&jobs, Delivery::Stream).await;

        let events = collect(sessions.open(open_request(id)).await.unwrap()).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[1], chunk("B", "AB"));
        match &events[2] {
            StreamEvent::Error { error } => assert!(error.contains("connection reset")),
            other => panic!("expected error event, got {other:?}"),
        }
        let job = jobs.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("connection reset"));
        assert!(job.content.is_none());
    }

    #[tokio::test]
    async fn test_provider_refusal_emits_single_error() {
        let (sessions, jobs, _) = sessions(ScriptedBackend::failing());
        let id = stream_job(&jobs, Delivery::Stream).await;

        let events = collect(sessions.open(open_request(id)).await.unwrap()).await;

        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        assert_eq!(events[0].name(), "error");
        assert_eq!(jobs.get(id).await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_empty_completion_is_persisted_as_completed() {
        let (sessions, jobs, _) = sessions(ScriptedBackend::replying(""));
        let id = stream_job(&jobs, Delivery::Stream).await;

        let events = collect(sessions.open(open_request(id)).await.unwrap()).await;

        assert_eq!(
            events,
            vec![StreamEvent::Done {
                content: String::new()
            }]
        );
        let job = jobs.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.content.as_deref(), Some(""));
        assert_eq!(job.metrics.as_ref().unwrap().word_count, 0);
    }

    #[tokio::test]
    async fn test_panicking_session_fails_job_and_reports_error() {
        let (sessions, jobs) = sessions_with(Arc::new(PanickingBackend));
        let id = stream_job(&jobs, Delivery::Stream).await;

        let events = collect(sessions.open(open_request(id)).await.unwrap()).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "error");
        let job = jobs.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn test_interrupt_all_fails_running_sessions() {
        let (sessions, jobs) = sessions_with(Arc::new(HangingBackend));
        let id = stream_job(&jobs, Delivery::Stream).await;

        let rx = sessions.open(open_request(id)).await.unwrap();
        assert_eq!(sessions.interrupt_all().await, 1);

        let events = collect(rx).await;
        assert_eq!(
            events,
            vec![StreamEvent::Error {
                error: INTERRUPTED_BY_SHUTDOWN.to_string()
            }]
        );
        let job = jobs.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(INTERRUPTED_BY_SHUTDOWN));
        assert_eq!(sessions.interrupt_all().await, 0);
    }

    #[tokio::test]
    async fn test_disconnected_subscriber_still_completes_job() {
        let (sessions, jobs, _) = sessions(ScriptedBackend::streaming(vec!["A", "B", "C"]));
        let id = stream_job(&jobs, Delivery::Stream).await;

        drop(sessions.open(open_request(id)).await.unwrap());

        for _ in 0..200 {
            if jobs.get(id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let job = jobs.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.content.as_deref(), Some("ABC"));
    }

    #[tokio::test]
    async fn test_stored_outline_is_used_when_none_given() {
        let (sessions, jobs, llm) = sessions(ScriptedBackend::streaming(vec!["A"]));
        let id = stream_job(&jobs, Delivery::Stream).await;

        collect(sessions.open(open_request(id)).await.unwrap()).await;

        let prompts = llm.prompts();
        assert_eq!(
            prompts[0].user_messages[1],
            "Follow this outline structure:\n1. Intro"
        );
    }

    #[tokio::test]
    async fn test_queue_delivered_job_cannot_be_streamed() {
        let (sessions, jobs, llm) = sessions(ScriptedBackend::streaming(vec!["A"]));
        let id = stream_job(&jobs, Delivery::Queue).await;

        let err = sessions.open(open_request(id)).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(jobs.get(id).await.unwrap().status, JobStatus::Pending);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_second_open_conflicts() {
        let (sessions, jobs, _) = sessions(ScriptedBackend::streaming(vec!["A"]));
        let id = stream_job(&jobs, Delivery::Stream).await;

        let first = sessions.open(open_request(id)).await.unwrap();
        let err = sessions.open(open_request(id)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        collect(first).await;
    }

    #[tokio::test]
    async fn test_open_validates_before_claiming() {
        let (sessions, jobs, _) = sessions(ScriptedBackend::streaming(vec!["A"]));
        let id = stream_job(&jobs, Delivery::Stream).await;

        let mut request = open_request(id);
        request.topic = "  ".to_string();
        assert!(matches!(
            sessions.open(request).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(jobs.get(id).await.unwrap().status, JobStatus::Pending);

        assert!(matches!(
            sessions.open(open_request(Uuid::new_v4())).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_event_wire_format() {
        let value = serde_json::to_value(chunk("B", "AB")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "chunk", "content": "B", "accumulated": "AB"})
        );
        let value = serde_json::to_value(StreamEvent::Error {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"type": "error", "error": "boom"}));
    }
}
