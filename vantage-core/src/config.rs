use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct VantageConfig {
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub improvements: ImprovementsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingSettings {
    /// Backend selector: "onnx", "remote", or "remote-fallback".
    pub backend: String,
    pub remote_model: String,
    pub remote_dimensions: u32,
    pub onnx_model_path: String,
    pub onnx_dimensions: u32,
    /// Model context budget, in tokens.
    pub max_input_tokens: u32,
    /// Truncation estimate; MiniLM-family English text averages ~3 chars/token.
    pub chars_per_token: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: "onnx".to_string(),
            remote_model: "embed-v1".to_string(),
            remote_dimensions: 768,
            onnx_model_path: String::new(),
            onnx_dimensions: 384,
            max_input_tokens: 256,
            chars_per_token: 3,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Scoring tunables. The raw-similarity band is empirical and model-specific;
/// changing the embedding model means recalibrating `similarity_floor` and
/// `similarity_ceiling` here, not editing scorer code.
#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    pub similarity_floor: f32,
    pub similarity_ceiling: f32,
    pub score_floor: f32,
    pub score_ceiling: f32,
    pub requirements_weight: f32,
    /// Minimum extracted-section length (chars) before the requirements
    /// sub-embedding is trusted.
    pub min_requirements_chars: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.30,
            similarity_ceiling: 0.65,
            score_floor: 40.0,
            score_ceiling: 95.0,
            requirements_weight: 0.6,
            min_requirements_chars: 80,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    pub story_limit: usize,
    pub document_limit: usize,
    pub per_query_limit: usize,
    pub similarity_threshold: f32,
    pub max_requirement_queries: usize,
    /// Length (chars) of the job-description prefix used for the fallback query.
    pub fallback_query_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            story_limit: 8,
            document_limit: 3,
            per_query_limit: 5,
            similarity_threshold: 0.25,
            max_requirement_queries: 5,
            fallback_query_chars: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImprovementsConfig {
    /// How many past tailoring sessions to mine, most recent first.
    pub max_source_jobs: usize,
    /// Minimum length (chars) for each side of a change pair.
    pub min_fragment_chars: usize,
    /// Token-overlap ceiling above which two texts count as near-duplicates.
    pub near_duplicate_ceiling: f32,
}

impl Default for ImprovementsConfig {
    fn default() -> Self {
        Self {
            max_source_jobs: 5,
            min_fragment_chars: 25,
            near_duplicate_ceiling: 0.85,
        }
    }
}

impl VantageConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
