use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_GENERATION_MODEL: &str = "moonshotai/kimi-k2-thinking";
const DEFAULT_EMBEDDING_API_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_QUEUE_NAME: &str = "solidwriter:generation";

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub openrouter_api_key: String,
    pub generation_model: String,
    pub embedding_api_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    pub worker_concurrency: usize,
    pub job_max_attempts: u32,
    pub job_backoff: Duration,
    pub shutdown_timeout: Duration,
    pub queue_name: String,
    pub reading_wpm: u32,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            openrouter_api_key: require_env("OPENROUTER_API_KEY")?,
            generation_model: env_or("GENERATION_MODEL", DEFAULT_GENERATION_MODEL),
            embedding_api_url: env_or("EMBEDDING_API_URL", DEFAULT_EMBEDDING_API_URL),
            embedding_api_key: env_or("EMBEDDING_API_KEY", ""),
            embedding_model: env_or("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 3)?,
            job_max_attempts: parse_env("JOB_MAX_ATTEMPTS", 2)?,
            job_backoff: Duration::from_millis(parse_env("JOB_BACKOFF_MS", 2000)?),
            shutdown_timeout: Duration::from_secs(parse_env("SHUTDOWN_TIMEOUT_SECS", 60)?),
            queue_name: env_or("QUEUE_NAME", DEFAULT_QUEUE_NAME),
            reading_wpm: parse_env("READING_WPM", 200)?,
            port: parse_env("PORT", 8080)?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
