//! Job repository. Every status transition is a single conditional UPDATE,
//! so concurrent writers cannot move a job backwards or claim it twice.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::StoreError;
use crate::generation::models::{CompletedJob, Delivery, GenerationJob, JobStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &GenerationJob) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<GenerationJob, StoreError>;

    /// Atomically moves a PENDING job of the given delivery mode to
    /// PROCESSING. Exactly one concurrent caller wins; the rest get
    /// `Conflict`.
    async fn claim(&self, id: Uuid, delivery: Delivery) -> Result<GenerationJob, StoreError>;

    /// Bumps the attempt counter of a PROCESSING job.
    async fn record_attempt(&self, id: Uuid) -> Result<i32, StoreError>;

    /// PROCESSING → COMPLETED, storing content and metrics in the same write.
    async fn complete(&self, id: Uuid, result: CompletedJob) -> Result<(), StoreError>;

    /// Any non-terminal state → FAILED.
    async fn fail(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_by_owner(&self, owner_id: Uuid, limit: usize)
        -> Result<Vec<GenerationJob>, StoreError>;

    /// Ids of queue-delivered jobs still waiting, oldest first.
    async fn pending_queue_jobs(&self) -> Result<Vec<Uuid>, StoreError>;
}

pub(crate) fn not_found(id: Uuid) -> StoreError {
    StoreError::NotFound(format!("Job {id}"))
}

pub(crate) fn wrong_state(id: Uuid, status: JobStatus, wanted: &str) -> StoreError {
    StoreError::Conflict(format!("Job {id} is {status}, expected {wanted}"))
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Turns a zero-row conditional update into NotFound or Conflict.
    async fn explain_miss(&self, id: Uuid, wanted: &str) -> StoreError {
        match self.get(id).await {
            Ok(job) => wrong_state(id, job.status, wanted),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &GenerationJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, owner_id, topic, context, outline, voice_profile_ids, keywords,
                 delivery, status, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, $11)
            "#,
        )
        .bind(job.id)
        .bind(job.owner_id)
        .bind(&job.topic)
        .bind(&job.context)
        .bind(&job.outline)
        .bind(&job.voice_profile_ids)
        .bind(&job.keywords)
        .bind(job.delivery.as_str())
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<GenerationJob, StoreError> {
        sqlx::query_as::<_, GenerationJob>("SELECT * FROM generation_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(id))
    }

    async fn claim(&self, id: Uuid, delivery: Delivery) -> Result<GenerationJob, StoreError> {
        let claimed = sqlx::query_as::<_, GenerationJob>(
            r#"
            UPDATE generation_jobs
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING' AND delivery = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(delivery.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match claimed {
            Some(job) => Ok(job),
            None => match self.get(id).await {
                Ok(job) if job.delivery != delivery => Err(StoreError::Conflict(format!(
                    "Job {id} is delivered via {}, not {}",
                    job.delivery.as_str(),
                    delivery.as_str()
                ))),
                Ok(job) => Err(wrong_state(id, job.status, "PENDING")),
                Err(e) => Err(e),
            },
        }
    }

    async fn record_attempt(&self, id: Uuid) -> Result<i32, StoreError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE generation_jobs
            SET attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            RETURNING attempts
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match attempts {
            Some(n) => Ok(n),
            None => Err(self.explain_miss(id, "PROCESSING").await),
        }
    }

    async fn complete(&self, id: Uuid, result: CompletedJob) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'COMPLETED', content = $2, metrics = $3, duration_ms = $4,
                token_usage = $5, error = NULL, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id)
        .bind(&result.content)
        .bind(Json(&result.metrics))
        .bind(result.duration_ms)
        .bind(result.token_usage)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.explain_miss(id, "PROCESSING").await);
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'FAILED', error = $2, content = NULL, metrics = NULL,
                completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.explain_miss(id, "PENDING or PROCESSING").await);
        }
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: usize,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        Ok(sqlx::query_as::<_, GenerationJob>(
            r#"
            SELECT * FROM generation_jobs
            WHERE owner_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn pending_queue_jobs(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT id FROM generation_jobs
            WHERE status = 'PENDING' AND delivery = 'queue'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }
}
