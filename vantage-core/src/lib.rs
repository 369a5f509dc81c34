pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod onnx_embedder;
pub mod pipeline;

pub use config::{
    EmbeddingSettings, ImprovementsConfig, RetrievalConfig, ScoringConfig, VantageConfig,
};
pub use embeddings::{
    content_hash, create_backend, create_backend_from_settings, truncate_for_model, BackendConfig,
    Embedded, EmbeddingBackend, EmbeddingError, FallbackEmbeddingClient, OnnxConfig, RemoteConfig,
    RemoteEmbeddingClient, ONNX_DIMENSIONS, REMOTE_DIMENSIONS,
};
pub use error::VantageError;
pub use index::{
    cosine_similarity, EmbeddingRecord, EntityType, QueryOptions, ScoredRecord, VectorIndex,
};
pub use onnx_embedder::OnnxEmbeddingClient;
pub use pipeline::{EmbeddingPipeline, InitProgress, InitStage};
