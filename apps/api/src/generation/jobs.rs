//! Job submission and lookup. Validation happens before anything is
//! persisted; queue delivery enqueues the id once the PENDING record exists.

use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::models::{CreateJobRequest, Delivery, GenerationJob, JobSpec, JobSummary};
use crate::generation::queue::WorkQueue;
use crate::generation::store::JobStore;
use crate::scoring::recommendations::{recommendations, score_label};

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// Full status view: the persisted record plus derived scoring advice.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: GenerationJob,
    pub score_label: Option<&'static str>,
    pub recommendations: Vec<String>,
}

impl From<GenerationJob> for JobView {
    fn from(job: GenerationJob) -> Self {
        let (score_label, recommendations) = match &job.metrics {
            Some(metrics) => (Some(score_label(metrics.score)), recommendations(metrics)),
            None => (None, Vec::new()),
        };
        Self {
            job,
            score_label,
            recommendations,
        }
    }
}

/// Validates and normalizes a submission. Blank optional strings count as
/// absent; keywords are trimmed and de-duplicated keeping first occurrence.
pub fn validate_request(request: CreateJobRequest) -> Result<(Uuid, JobSpec), AppError> {
    let topic = request.topic.trim();
    if topic.is_empty() {
        return Err(AppError::Validation("topic cannot be empty".to_string()));
    }

    let mut keywords: Vec<String> = Vec::new();
    for keyword in request.keywords.unwrap_or_default() {
        let keyword = keyword.trim();
        if !keyword.is_empty() && !keywords.iter().any(|k| k == keyword) {
            keywords.push(keyword.to_string());
        }
    }

    let mut voice_profile_ids: Vec<Uuid> = Vec::new();
    for id in request.voice_profile_ids.unwrap_or_default() {
        if !voice_profile_ids.contains(&id) {
            voice_profile_ids.push(id);
        }
    }

    let spec = JobSpec {
        topic: topic.to_string(),
        context: non_blank(request.context),
        outline: non_blank(request.outline),
        voice_profile_ids,
        keywords,
        delivery: request.delivery.unwrap_or_default(),
    };
    Ok((request.owner_id, spec))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Persists a PENDING job and, for queue delivery, enqueues it.
///
/// If the enqueue fails the record is marked FAILED so it never sits in
/// PENDING without a consumer.
pub async fn submit_job(
    jobs: &dyn JobStore,
    queue: &dyn WorkQueue,
    request: CreateJobRequest,
) -> Result<GenerationJob, AppError> {
    let (owner_id, spec) = validate_request(request)?;
    let job = GenerationJob::pending(owner_id, spec);
    jobs.create(&job).await?;

    if job.delivery == Delivery::Queue {
        if let Err(e) = queue.push(job.id).await {
            error!(job_id = %job.id, error = %e, "Failed to enqueue job");
            if let Err(store_err) = jobs.fail(job.id, &format!("Failed to enqueue: {e}")).await {
                error!(job_id = %job.id, error = %store_err, "Failed to mark job as failed");
            }
            return Err(e.into());
        }
    }

    info!(
        job_id = %job.id,
        delivery = job.delivery.as_str(),
        owner_id = %owner_id,
        "Job submitted"
    );
    Ok(job)
}

pub async fn job_status(jobs: &dyn JobStore, id: Uuid) -> Result<JobView, AppError> {
    Ok(JobView::from(jobs.get(id).await?))
}

/// Recent jobs for an owner, newest first. `limit` defaults to 20, max 100.
pub async fn list_jobs(
    jobs: &dyn JobStore,
    owner_id: Uuid,
    limit: Option<usize>,
) -> Result<Vec<JobSummary>, AppError> {
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let records = jobs.list_by_owner(owner_id, limit).await?;
    Ok(records.into_iter().map(JobSummary::from).collect())
}
