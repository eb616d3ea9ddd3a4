//! Embedding capability: turns text into a fixed-length vector.
//!
//! The HTTP model is expensive to warm up, so it lives behind `LazyEmbedder`:
//! loaded at most once on first use, then shared read-only by every caller.
//! `shared_model()` holds the process-wide instance; components receive it as
//! an `Arc<dyn Embedder>` so tests can inject a fake instead.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

/// Probe text used to discover the model's output dimensions at load time.
const WARMUP_TEXT: &str = "warm-up";

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Embedding API returned no vector")]
    EmptyVector,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Model identifier recorded alongside stored embeddings.
    fn model_name(&self) -> &str;
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP embedder (OpenAI-compatible /embeddings endpoint)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    client: Client,
    settings: EmbeddingSettings,
}

impl HttpEmbedder {
    /// Builds the client and issues one probe request to learn the vector size.
    pub async fn load(settings: EmbeddingSettings) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let embedder = Self { client, settings };
        let dimensions = embedder.request(WARMUP_TEXT).await?.len();

        info!(
            "Embedding model {} loaded ({} dimensions)",
            embedder.settings.model, dimensions
        );
        Ok(embedder)
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut request = self.client.post(&self.settings.api_url).json(&EmbeddingRequest {
            model: &self.settings.model,
            input: text,
        });
        if !self.settings.api_key.is_empty() {
            request = request.bearer_auth(&self.settings.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: EmbeddingResponse = response.json().await?;
        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbeddingError::EmptyVector)?;

        if vector.is_empty() {
            return Err(EmbeddingError::EmptyVector);
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(text).await
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lazily-initialised shared model
// ────────────────────────────────────────────────────────────────────────────

type Loader =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Embedder>, EmbeddingError>> + Send + Sync>;

/// Wraps an embedder whose construction is deferred until the first `embed`.
/// Concurrent first callers wait on the same initialisation; a failed load is
/// not cached, so the next call retries it.
pub struct LazyEmbedder {
    model: String,
    loader: Loader,
    cell: OnceCell<Arc<dyn Embedder>>,
}

impl LazyEmbedder {
    pub fn new<F>(model: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Arc<dyn Embedder>, EmbeddingError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            model: model.into(),
            loader: Box::new(loader),
            cell: OnceCell::new(),
        }
    }

    /// Lazy wrapper around an `HttpEmbedder` built from `settings`.
    pub fn http(settings: EmbeddingSettings) -> Self {
        let model = settings.model.clone();
        Self::new(model, move || {
            let settings = settings.clone();
            Box::pin(async move {
                let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::load(settings).await?);
                Ok(embedder)
            })
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    async fn model(&self) -> Result<&Arc<dyn Embedder>, EmbeddingError> {
        self.cell.get_or_try_init(|| (self.loader)()).await
    }
}

#[async_trait]
impl Embedder for LazyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.model().await?.embed(text).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

static SHARED_MODEL: OnceLock<Arc<LazyEmbedder>> = OnceLock::new();

/// Returns the process-wide embedding model, registering it on first call.
/// Later calls ignore `settings` and return the existing instance.
pub fn shared_model(settings: EmbeddingSettings) -> Arc<LazyEmbedder> {
    SHARED_MODEL
        .get_or_init(|| Arc::new(LazyEmbedder::http(settings)))
        .clone()
}
