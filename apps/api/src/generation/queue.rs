//! Redis-backed FIFO of job ids awaiting the worker pool.
//!
//! Entries are only hints: the job record is the source of truth and a
//! worker must claim the job before doing any work, so a duplicate or stale
//! entry is skipped rather than processed twice.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Malformed queue entry '{0}'")]
    MalformedEntry(String),
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn push(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Next job id in FIFO order, or `None` when the queue is empty.
    async fn pop(&self) -> Result<Option<Uuid>, QueueError>;

    async fn len(&self) -> Result<usize, QueueError>;
}

#[derive(Clone)]
pub struct RedisQueue {
    redis: ConnectionManager,
    queue_name: String,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            redis,
            queue_name: queue_name.to_string(),
        })
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn push(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, job_id.to_string())
            .await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Uuid>, QueueError> {
        let mut conn = self.redis.clone();
        let entry: Option<String> = redis::cmd("RPOP")
            .arg(&self.queue_name)
            .query_async(&mut conn)
            .await?;

        entry
            .map(|raw| Uuid::parse_str(&raw).map_err(|_| QueueError::MalformedEntry(raw)))
            .transpose()
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.llen(&self.queue_name).await?)
    }
}
