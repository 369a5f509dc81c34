//! Embeddings module for Vantage — multi-backend embedding support
//!
//! Provides an `EmbeddingBackend` trait with implementations for:
//! - **Remote** — cloud embeddings via an HTTP inference API (768-dim)
//! - **ONNX** — local embeddings via `all-MiniLM-L6-v2` (384-dim)
//! - **Remote-fallback** — remote with graceful degradation to `Ok(None)`
//!
//! Also owns the provider-boundary helpers shared by every backend:
//! content hashing for staleness detection and character-budget truncation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Default remote embedding dimensions
pub const REMOTE_DIMENSIONS: usize = 768;

/// Default ONNX (all-MiniLM-L6-v2) embedding dimensions
pub const ONNX_DIMENSIONS: usize = 384;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text. Returns `None` if embedding is unavailable
    /// (used in fallback mode to signal graceful degradation).
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError>;

    /// Embed a search query. Backends that support task-type hints can
    /// override this to use `retrieval_query` instead of `retrieval_document`.
    /// Defaults to calling `embed()`.
    async fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        self.embed(text).await
    }

    /// Returns the embedding dimension (e.g., 768 or 384).
    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Task type hint for the remote embedding API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    RetrievalDocument,
    RetrievalQuery,
}

/// Embedding generation errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing embedding in response")]
    MissingEmbedding,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },

    #[error("ONNX model not found at {path}")]
    ModelNotFound { path: String },

    #[error("ONNX inference error: {0}")]
    OnnxInference(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Pipeline initialization failed: {0}")]
    Initialization(String),

    #[error("Embedding worker is no longer running")]
    WorkerUnavailable,
}

// ============================================================================
// Provider-boundary helpers
// ============================================================================

/// One embedded unit of content as produced by the pipeline: the vector plus
/// a hash of the *original, untruncated* source text so callers can detect
/// staleness without re-embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub content_hash: String,
}

/// SHA-256 hex digest of the source text.
///
/// Always computed over the full input, never the truncated form handed to
/// the model — a change anywhere in the document must change the hash.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncate `text` to roughly the model's context budget.
///
/// Over-long input is truncated by estimated character count rather than
/// rejected. The cut lands on a char boundary; a budget of zero returns the
/// empty string.
pub fn truncate_for_model(text: &str, max_chars: usize) -> &str {
    if text.chars().count() <= max_chars {
        return text;
    }
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

// ============================================================================
// Config types
// ============================================================================

/// Remote embedding client configuration
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl RemoteConfig {
    pub fn new(api_key: Option<String>, model: String, dimensions: usize) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("VANTAGE_EMBED_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model,
            dimensions,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// ONNX backend configuration
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimensions: usize,
}

/// Configuration union for the backend factory.
pub enum BackendConfig {
    Remote(RemoteConfig),
    Onnx(OnnxConfig),
    RemoteFallback(RemoteConfig),
}

/// Create the appropriate backend from configuration.
pub fn create_backend(config: BackendConfig) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    match config {
        BackendConfig::Remote(c) => Ok(Box::new(RemoteEmbeddingClient::new(c)?)),
        BackendConfig::Onnx(c) => {
            Ok(Box::new(crate::onnx_embedder::OnnxEmbeddingClient::new(c)?))
        }
        BackendConfig::RemoteFallback(c) => Ok(Box::new(FallbackEmbeddingClient::new(c)?)),
    }
}

/// Create a backend from application settings.
///
/// Reads `[embedding] backend` to select ONNX, remote, or remote-with-fallback.
pub fn create_backend_from_settings(
    settings: &crate::config::EmbeddingSettings,
) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    let config = match settings.backend.as_str() {
        "remote" => BackendConfig::Remote(remote_config_from(settings)),
        "remote-fallback" => BackendConfig::RemoteFallback(remote_config_from(settings)),
        _ => {
            // Default: "onnx"
            let (model_path, tokenizer_path) =
                crate::onnx_embedder::resolve_onnx_paths(&settings.onnx_model_path);
            BackendConfig::Onnx(OnnxConfig {
                model_path,
                tokenizer_path,
                dimensions: settings.onnx_dimensions as usize,
            })
        }
    };
    create_backend(config)
}

fn remote_config_from(settings: &crate::config::EmbeddingSettings) -> RemoteConfig {
    RemoteConfig {
        api_key: std::env::var("VANTAGE_EMBED_API_KEY").unwrap_or_default(),
        model: settings.remote_model.clone(),
        dimensions: settings.remote_dimensions as usize,
        max_retries: settings.max_retries as usize,
        retry_delay_ms: settings.retry_delay_ms,
    }
}

// ============================================================================
// Remote API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_type: Option<TaskType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// RemoteEmbeddingClient
// ============================================================================

/// Remote embedding client — calls an HTTP embedding inference API.
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingClient {
    client: Client,
    config: RemoteConfig,
    base_url: String,
}

impl RemoteEmbeddingClient {
    pub fn new(config: RemoteConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, "https://embed.vantage.dev".to_string())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: RemoteConfig, base_url: String) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Generate an embedding for the given text (direct call, returns raw Vec)
    pub async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalDocument).await
    }

    /// Generate an embedding with a specific task type
    pub async fn embed_with_task(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.embed_once(text, task_type)).await;

        match result {
            Ok(vec) => Ok(vec),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All embedding retry attempts failed"
                );
                Err(EmbeddingError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn embed_once(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/v1/models/{}:embed", self.base_url, self.config.model);

        let request = EmbedRequest {
            model: self.config.model.clone(),
            input: text.to_string(),
            task_type: Some(task_type),
            dimensions: Some(self.config.dimensions),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Embedding API error");

            return Err(EmbeddingError::Api { code, message });
        }

        let embed_response: EmbedResponse = response.json().await?;

        let values = embed_response.embedding;

        if values.is_empty() {
            return Err(EmbeddingError::MissingEmbedding);
        }

        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        self.embed_raw(text).await.map(Some)
    }

    async fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalQuery)
            .await
            .map(Some)
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "remote"
    }
}

// ============================================================================
// FallbackEmbeddingClient
// ============================================================================

/// Wraps `RemoteEmbeddingClient`. On any error, logs a warning and returns
/// `Ok(None)` so the caller degrades to non-semantic behavior instead of
/// failing outright.
pub struct FallbackEmbeddingClient {
    inner: RemoteEmbeddingClient,
}

impl FallbackEmbeddingClient {
    pub fn new(config: RemoteConfig) -> Result<Self, EmbeddingError> {
        Ok(Self {
            inner: RemoteEmbeddingClient::new(config)?,
        })
    }

    #[cfg(test)]
    pub fn with_base_url(config: RemoteConfig, base_url: String) -> Result<Self, EmbeddingError> {
        Ok(Self {
            inner: RemoteEmbeddingClient::with_base_url(config, base_url)?,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for FallbackEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        match self.inner.embed_raw(text).await {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Remote embedding failed — continuing without a vector (recency-only retrieval)"
                );
                Ok(None)
            }
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        match self.inner.embed_with_task(text, TaskType::RetrievalQuery).await {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Remote query embedding failed — continuing without a vector (recency-only retrieval)"
                );
                Ok(None)
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn name(&self) -> &str {
        "remote-fallback"
    }
}

// ============================================================================
// TESTS
// ============================================================================
