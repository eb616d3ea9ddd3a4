/// LLM Client: the single point of entry for all text-generation calls.
///
/// ARCHITECTURAL RULE: No other module may call the generation provider directly.
/// All LLM interactions MUST go through `GenerationBackend`.
///
/// Provider: OpenRouter chat completions (OpenAI-compatible wire format).
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const MAX_RATE_LIMIT_RETRIES: u32 = 2;
/// Capacity of the fragment channel between the HTTP reader and its consumer.
pub const FRAGMENT_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Stream error: {0}")]
    Stream(String),
}

/// A fully-assembled chat prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    /// User turns, sent in order after the system message.
    pub user_messages: Vec<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Receiving half of an incremental generation. Yields fragments in
/// generation order; an `Err` item is terminal. The channel closes without an
/// error only when the provider signals completion.
pub type FragmentStream = mpsc::Receiver<Result<String, LlmError>>;

/// The generation capability. Carried in `AppState` as `Arc<dyn GenerationBackend>`.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Blocking mode: returns the full text once generation finishes.
    async fn generate(&self, prompt: &Prompt) -> Result<String, LlmError>;

    /// Incremental mode: returns as soon as the provider accepts the request.
    async fn generate_stream(&self, prompt: &Prompt) -> Result<FragmentStream, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorEnvelope {
    error: ProviderError,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// OpenRouter-backed generation client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends a chat request and returns the successful response.
    /// Retries only on 429 with exponential backoff; every other failure is
    /// returned to the caller, which owns the job-level retry policy.
    async fn send(&self, prompt: &Prompt, stream: bool) -> Result<Response, LlmError> {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: &prompt.system,
        }];
        messages.extend(prompt.user_messages.iter().map(|m| ChatMessage {
            role: "user",
            content: m,
        }));

        let request_body = ChatRequest {
            model: &self.model,
            messages,
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
            stream,
        };

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Generation provider rate limited, retrying after {}ms...",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(OPENROUTER_API_URL)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await?;

            let status = response.status();
            if status.as_u16() == 429 {
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ProviderErrorEnvelope>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response);
        }

        Err(LlmError::RateLimited {
            retries: MAX_RATE_LIMIT_RETRIES,
        })
    }
}

#[async_trait]
impl GenerationBackend for LlmClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let completion: ChatCompletion = self.send(prompt, false).await?.json().await?;

        if let Some(usage) = &completion.usage {
            debug!(
                "Generation succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn generate_stream(&self, prompt: &Prompt) -> Result<FragmentStream, LlmError> {
        let response = self.send(prompt, true).await?;
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);

        tokio::spawn(forward_fragments(response.bytes_stream(), tx));

        Ok(rx)
    }
}

/// Splits the provider body into lines and forwards each fragment. A body
/// that ends before `data: [DONE]` is reported as a stream error.
async fn forward_fragments<S, B, E>(body: S, tx: mpsc::Sender<Result<String, LlmError>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<LlmError>,
{
    futures::pin_mut!(body);
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(c) => pending.extend_from_slice(c.as_ref()),
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        }

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            if !forward_line(&String::from_utf8_lossy(&line), &tx).await {
                return;
            }
        }
    }

    // last line may lack its newline
    if !pending.is_empty() && !forward_line(&String::from_utf8_lossy(&pending), &tx).await {
        return;
    }

    let _ = tx
        .send(Err(LlmError::Stream("stream ended before [DONE]".to_string())))
        .await;
}

/// Returns false once forwarding must stop: completion, a provider error, or
/// a dropped consumer.
async fn forward_line(line: &str, tx: &mpsc::Sender<Result<String, LlmError>>) -> bool {
    let item = match parse_sse_line(line) {
        SseLine::Skip => return true,
        SseLine::Done => return false,
        SseLine::Fragment(text) => Ok(text),
        SseLine::Failed(err) => Err(err),
    };
    let terminal = item.is_err();
    tx.send(item).await.is_ok() && !terminal
}

// ────────────────────────────────────────────────────────────────────────────
// SSE parsing
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum SseLine {
    Skip,
    Done,
    Fragment(String),
    Failed(LlmError),
}

/// Interprets one line of the provider's event stream.
fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        // blank separators, ": keep-alive" comments, event/id fields
        return SseLine::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseLine::Done;
    }

    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(c) => c,
        Err(e) => return SseLine::Failed(LlmError::Parse(e)),
    };
    if let Some(error) = chunk.error {
        return SseLine::Failed(LlmError::Stream(error.message));
    }

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) if !text.is_empty() => SseLine::Fragment(text),
        _ => SseLine::Skip,
    }
}
