use thiserror::Error;
use vantage_core::embeddings::EmbeddingError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// No resume text is present. The one hard failure in the engine — a
    /// profile must never be built from an empty string.
    #[error("Profile unavailable: no resume text present")]
    ProfileUnavailable,

    /// The backend degraded (returned no vector) where one was required.
    #[error("Embedding unavailable")]
    EmbeddingUnavailable,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Content store error: {0}")]
    Store(String),
}
