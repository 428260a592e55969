//! Embedding capability and its hosted implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not configured.
//! - **[`GeminiEmbedder`]**: Google Generative Language `embedContent`, with task types.
//! - **[`OpenAIEmbedder`]**: the OpenAI `/v1/embeddings` endpoint.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides vector utilities used by the index store:
//! - [`l2_distance`]: Euclidean distance between two vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` encoding
//!
//! # Embedding Mode
//!
//! Every call states whether the text is a stored document or a query
//! ([`EmbedMode`]). Gemini maps this to `RETRIEVAL_DOCUMENT` /
//! `RETRIEVAL_QUERY`; the other backends ignore it.
//!
//! # Retry Strategy
//!
//! All hosted providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Timeouts → retry for [`EmbedMode::Document`], fail immediately for
//!   [`EmbedMode::Query`] so a question is answered without context promptly
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Each request is bounded by `timeout_secs`, so a query embedding gives up
//! after one timeout and a document chunk after at most `max_retries + 1`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// Whether a text is being stored or searched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Document,
    Query,
}

/// Trait for embedding backends.
///
/// One call to [`embed`](Embedder::embed) makes at most one logical request
/// to the external service (plus retries); nothing is cached.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed one text, returning its vector.
    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>, EmbeddingError>;
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"gemini"` | [`GeminiEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
///
/// # Errors
///
/// Returns an error for unknown provider names or if a provider cannot be
/// initialized (missing model or API key).
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "gemini" => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// An embedder that fails every call.
///
/// Used when `embedding.provider = "disabled"`. Indexing with it reports
/// every document as failed; retrieval with it finds no context.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str, _mode: EmbedMode) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

// ============ Shared HTTP plumbing ============

/// Settings every hosted provider shares.
struct HttpSettings {
    client: reqwest::Client,
    max_retries: u32,
    timeout: Duration,
    dims: Option<usize>,
}

impl HttpSettings {
    fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
            timeout,
            dims: config.dims,
        })
    }

    /// Send the request built by `build`, retrying transient failures.
    async fn send_json<F>(
        &self,
        provider: &str,
        mode: EmbedMode,
        build: F,
    ) -> Result<Value, EmbeddingError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = match build(&self.client).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    if mode == EmbedMode::Query {
                        return Err(EmbeddingError::Timeout(self.timeout));
                    }
                    last_err = Some(EmbeddingError::Timeout(self.timeout));
                    continue;
                }
                Err(e) => {
                    last_err = Some(EmbeddingError::Network {
                        provider: provider.to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<Value>()
                    .await
                    .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()));
            }

            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                last_err = Some(EmbeddingError::RateLimited {
                    provider: provider.to_string(),
                    body,
                });
                continue;
            }
            if status.is_server_error() {
                last_err = Some(EmbeddingError::Api {
                    provider: provider.to_string(),
                    status: status.as_u16(),
                    body,
                });
                continue;
            }

            return Err(EmbeddingError::Api {
                provider: provider.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Err(last_err.unwrap_or_else(|| EmbeddingError::Network {
            provider: provider.to_string(),
            message: "embedding failed after retries".to_string(),
        }))
    }

    /// Reject empty vectors and, when `dims` is configured, wrong lengths.
    fn check_dims(&self, vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        if vector.is_empty() {
            return Err(EmbeddingError::MalformedResponse(
                "empty embedding vector".to_string(),
            ));
        }
        if let Some(dims) = self.dims {
            if vector.len() != dims {
                return Err(EmbeddingError::MalformedResponse(format!(
                    "expected {} dimensions, got {}",
                    dims,
                    vector.len()
                )));
            }
        }
        Ok(vector)
    }
}

fn json_to_vec(values: &[Value]) -> Result<Vec<f32>, EmbeddingError> {
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                EmbeddingError::MalformedResponse(format!("non-numeric embedding value {}", v))
            })
        })
        .collect()
}

pub(crate) fn api_key(var: &str) -> anyhow::Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}

// ============ Gemini Provider ============

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Embedder backed by the Gemini `embedContent` endpoint.
///
/// Requires `GEMINI_API_KEY`. The model defaults to `embedding-001`.
pub struct GeminiEmbedder {
    model: String,
    base_url: String,
    api_key: String,
    http: HttpSettings,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "embedding-001".to_string());
        let model = model.trim_start_matches("models/").to_string();
        Ok(Self {
            model,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            api_key: api_key("GEMINI_API_KEY")?,
            http: HttpSettings::new(config)?,
        })
    }
}

fn gemini_task_type(mode: EmbedMode) -> &'static str {
    match mode {
        EmbedMode::Document => "RETRIEVAL_DOCUMENT",
        EmbedMode::Query => "RETRIEVAL_QUERY",
    }
}

/// Parse `{"embedding": {"values": [...]}}`.
fn parse_gemini_response(json: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = json
        .get("embedding")
        .and_then(|e| e.get("values"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            EmbeddingError::MalformedResponse("missing embedding.values array".to_string())
        })?;
    json_to_vec(values)
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/v1beta/models/{}:embedContent", self.base_url, self.model);
        let body = serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": gemini_task_type(mode),
        });

        let json = self
            .http
            .send_json("Gemini", mode, |client| {
                client
                    .post(&url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(&body)
            })
            .await?;

        self.http.check_dims(parse_gemini_response(&json)?)
    }
}

// ============ OpenAI Provider ============

/// Embedder backed by the OpenAI embeddings API.
///
/// Requires `OPENAI_API_KEY` and `embedding.model`.
pub struct OpenAIEmbedder {
    model: String,
    base_url: String,
    api_key: String,
    http: HttpSettings,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        Ok(Self {
            model,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key: api_key("OPENAI_API_KEY")?,
            http: HttpSettings::new(config)?,
        })
    }
}

/// Parse `{"data": [{"embedding": [...]}]}`, taking the first entry.
fn parse_openai_response(json: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbeddingError::MalformedResponse("missing data[0].embedding".to_string())
        })?;
    json_to_vec(embedding)
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let json = self
            .http
            .send_json("OpenAI", mode, |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await?;

        self.http.check_dims(parse_openai_response(&json)?)
    }
}

// ============ Ollama Provider ============

/// Embedder backed by a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    url: String,
    http: HttpSettings,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            http: HttpSettings::new(config)?,
        })
    }
}

/// Parse `{"embeddings": [[...]]}`, taking the first vector.
fn parse_ollama_response(json: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::MalformedResponse("missing embeddings[0]".to_string()))?;
    json_to_vec(embedding)
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embed", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let json = self
            .http
            .send_json("Ollama", mode, |client| client.post(&url).json(&body))
            .await?;

        self.http.check_dims(parse_ollama_response(&json)?)
    }
}

// ============ Vector utilities ============

/// Squared Euclidean distance. Callers must pass equal-length slices.
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Euclidean (L2) distance between two vectors.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    l2_distance_squared(a, b).sqrt()
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// ```rust
/// use knowledge_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
