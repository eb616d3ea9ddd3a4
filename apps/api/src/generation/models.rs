use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::scoring::ContentMetrics;

/// Lifecycle of a job: PENDING → PROCESSING → {COMPLETED, FAILED}.
/// Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which entry point owns a job. A job is consumed by exactly one of them:
/// the worker pool (`Queue`) or a live streaming session (`Stream`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    #[default]
    Queue,
    Stream,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Queue => "queue",
            Delivery::Stream => "stream",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl TryFrom<String> for JobStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(UnknownVariant {
                kind: "job status",
                value,
            }),
        }
    }
}

impl TryFrom<String> for Delivery {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "queue" => Ok(Delivery::Queue),
            "stream" => Ok(Delivery::Stream),
            _ => Err(UnknownVariant {
                kind: "delivery",
                value,
            }),
        }
    }
}

/// A unit of requested generation work and its lifecycle record.
///
/// `content` and `metrics` are set iff COMPLETED; `error` iff FAILED.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct GenerationJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub topic: String,
    pub context: Option<String>,
    pub outline: Option<String>,
    pub voice_profile_ids: Vec<Uuid>,
    pub keywords: Vec<String>,
    #[sqlx(try_from = "String")]
    pub delivery: Delivery,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub content: Option<String>,
    pub error: Option<String>,
    pub metrics: Option<Json<ContentMetrics>>,
    /// Generation attempts started so far. Telemetry only.
    pub attempts: i32,
    pub duration_ms: Option<i64>,
    pub token_usage: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    /// A fresh PENDING record for a validated spec.
    pub fn pending(owner_id: Uuid, spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            topic: spec.topic,
            context: spec.context,
            outline: spec.outline,
            voice_profile_ids: spec.voice_profile_ids,
            keywords: spec.keywords,
            delivery: spec.delivery,
            status: JobStatus::Pending,
            content: None,
            error: None,
            metrics: None,
            attempts: 0,
            duration_ms: None,
            token_usage: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Validated, normalized job parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub topic: String,
    pub context: Option<String>,
    pub outline: Option<String>,
    pub voice_profile_ids: Vec<Uuid>,
    pub keywords: Vec<String>,
    pub delivery: Delivery,
}

/// Request body for job submission. Every field but `owner_id` and `topic`
/// may be omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub owner_id: Uuid,
    #[serde(default)]
    pub topic: String,
    pub context: Option<String>,
    pub outline: Option<String>,
    pub voice_profile_ids: Option<Vec<Uuid>>,
    pub keywords: Option<Vec<String>>,
    pub delivery: Option<Delivery>,
}

/// Result fields written together with the COMPLETED transition.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub content: String,
    pub metrics: ContentMetrics,
    pub duration_ms: i64,
    pub token_usage: i32,
}

impl CompletedJob {
    pub fn new(content: String, metrics: ContentMetrics, duration_ms: i64) -> Self {
        let token_usage = estimate_tokens(&content);
        Self {
            content,
            metrics,
            duration_ms,
            token_usage,
        }
    }
}

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> i32 {
    text.chars().count().div_ceil(4) as i32
}

/// Listing view.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub topic: String,
    pub status: JobStatus,
    pub score: Option<u32>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<GenerationJob> for JobSummary {
    fn from(job: GenerationJob) -> Self {
        Self {
            id: job.id,
            topic: job.topic,
            status: job.status,
            score: job.metrics.as_ref().map(|m| m.score),
            error: job.error,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}
