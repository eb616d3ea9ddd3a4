mod config;
mod db;
mod errors;
mod generation;
mod llm_client;
mod routes;
mod scoring;
mod state;
#[cfg(test)]
mod testing;
mod voice;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::generation::queue::{RedisQueue, WorkQueue};
use crate::generation::store::{JobStore, PgJobStore};
use crate::generation::worker::{JobExecutor, WorkerPool, WorkerPoolConfig};
use crate::llm_client::{GenerationBackend, LlmClient};
use crate::routes::build_router;
use crate::scoring::{ContentScorer, HeuristicScorer};
use crate::state::AppState;
use crate::voice::embedding::{shared_model, Embedder, EmbeddingSettings};
use crate::voice::store::{PgProfileStore, ProfileStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SolidWriter API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db.clone()));
    let profiles: Arc<dyn ProfileStore> = Arc::new(PgProfileStore::new(db));

    // Initialize Redis work queue
    let queue: Arc<dyn WorkQueue> =
        Arc::new(RedisQueue::connect(&config.redis_url, &config.queue_name).await?);
    info!("Redis queue '{}' connected", config.queue_name);

    // Initialize LLM client
    let client = LlmClient::new(
        config.openrouter_api_key.clone(),
        config.generation_model.clone(),
    );
    info!("LLM client initialized (model: {})", client.model());
    let llm: Arc<dyn GenerationBackend> = Arc::new(client);

    // Register the embedding model; it loads on first use
    let embedder = shared_model(EmbeddingSettings {
        api_url: config.embedding_api_url.clone(),
        api_key: config.embedding_api_key.clone(),
        model: config.embedding_model.clone(),
    });
    info!("Embedding model registered: {}", embedder.model_name());

    let scorer: Arc<dyn ContentScorer> = Arc::new(HeuristicScorer::new(config.reading_wpm));

    // Start the worker pool
    let pool_config = WorkerPoolConfig::new(config.worker_concurrency)
        .with_max_attempts(config.job_max_attempts)
        .with_backoff_base(config.job_backoff)
        .with_shutdown_timeout(config.shutdown_timeout);
    let executor = JobExecutor::new(
        Arc::clone(&jobs),
        Arc::clone(&profiles),
        Arc::clone(&llm),
        Arc::clone(&scorer),
        &pool_config,
    );
    let mut workers = WorkerPool::new(pool_config, Arc::clone(&queue), executor);
    workers.start().await?;

    // Build app state
    let state = AppState::new(jobs, queue, profiles, embedder, llm, scorer);
    let streams = state.streams.clone();

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict allowed origins once the web client's domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let interrupted = streams.interrupt_all().await;
    if interrupted > 0 {
        info!("Interrupted {} streaming sessions", interrupted);
    }

    if workers.is_running() {
        if let Err(e) = workers.shutdown().await {
            error!("Worker pool shutdown failed: {}", e);
        }
    }
    let stats = workers.stats();
    info!(
        "Worker pool processed {} jobs ({} completed, {} failed, avg {}ms)",
        stats.total_processed(),
        stats.jobs_completed,
        stats.jobs_failed,
        stats.average_job_duration.as_millis()
    );
    info!("SolidWriter API stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
