//! Axum route handlers for the Generation API.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::error;
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::jobs::{job_status, list_jobs, submit_job, JobView};
use crate::generation::models::{CreateJobRequest, Delivery, JobStatus, JobSummary};
use crate::generation::prompts::outline_prompt;
use crate::generation::streaming::{StreamEvent, StreamRequest};
use crate::llm_client::GenerationBackend;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub delivery: Delivery,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub owner_id: Uuid,
    pub limit: Option<usize>,
}

/// Query string of the streaming endpoint. `voice_profile_ids` is a
/// comma-separated list.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub job_id: Uuid,
    #[serde(default)]
    pub topic: String,
    pub outline: Option<String>,
    pub voice_profile_ids: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OutlineRequest {
    #[serde(default)]
    pub topic: String,
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OutlineResponse {
    pub outline: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/generate
///
/// Persists a PENDING job. Queue-delivered jobs are picked up by the worker
/// pool; stream-delivered jobs wait for `GET /api/v1/generate/stream`.
pub async fn handle_submit(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let job = submit_job(state.jobs.as_ref(), state.queue.as_ref(), request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: job.status,
            delivery: job.delivery,
        }),
    ))
}

/// GET /api/v1/generate?owner_id=&limit=
pub async fn handle_list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobSummary>>, AppError> {
    Ok(Json(
        list_jobs(state.jobs.as_ref(), params.owner_id, params.limit).await?,
    ))
}

/// GET /api/v1/generate/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, AppError> {
    Ok(Json(job_status(state.jobs.as_ref(), id).await?))
}

/// GET /api/v1/generate/stream?job_id=&topic=&outline=&voice_profile_ids=
///
/// Server-sent events named after their `type`: `chunk`, then one `done`
/// or `error`.
pub async fn handle_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let voice_profile_ids = params
        .voice_profile_ids
        .as_deref()
        .map(parse_id_list)
        .transpose()?;

    let events = state
        .streams
        .open(StreamRequest {
            job_id: params.job_id,
            topic: params.topic,
            outline: params.outline,
            voice_profile_ids,
        })
        .await?;

    let stream =
        ReceiverStream::new(events).map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /api/v1/generate/outline
pub async fn handle_outline(
    State(state): State<AppState>,
    Json(request): Json<OutlineRequest>,
) -> Result<Json<OutlineResponse>, AppError> {
    let topic = request.topic.trim();
    if topic.is_empty() {
        return Err(AppError::Validation("topic cannot be empty".to_string()));
    }
    let context = request.context.as_deref().filter(|c| !c.trim().is_empty());

    let outline = state.llm.generate(&outline_prompt(topic, context)).await?;
    Ok(Json(OutlineResponse { outline }))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn parse_id_list(raw: &str) -> Result<Vec<Uuid>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s)
                .map_err(|_| AppError::Validation(format!("invalid voice profile id '{s}'")))
        })
        .collect()
}

fn to_sse_event(event: &StreamEvent) -> Event {
    let base = Event::default().event(event.name());
    match base.clone().json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            error!("Failed to encode stream event: {}", e);
            base.data(format!(r#"{{"type":"{}"}}"#, event.name()))
        }
    }
}
