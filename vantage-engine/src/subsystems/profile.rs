//! Candidate profile manager — assembles and caches the profile embedding
//!
//! The profile is derived, not stored: a deterministic concatenation of
//! resume, additional context, stories, and documents, embedded once and
//! reused across every job comparison. The cached vector is keyed by a cheap
//! fingerprint of the built text; the cache is invalidated either by the
//! fingerprint changing or by an explicit `invalidate()` call from the
//! content-store collaborator. There is no hidden subscription to input
//! changes.

use std::sync::Mutex;

use vantage_core::pipeline::EmbeddingPipeline;

use crate::error::EngineError;
use crate::store::ProfileInputs;

/// Number of characters taken from each end of the text for the fingerprint.
const FINGERPRINT_AFFIX_CHARS: usize = 64;

/// Build the profile text from its inputs, in fixed field order: resume,
/// additional context, stories, documents. Pure and deterministic.
///
/// Fails fast with [`EngineError::ProfileUnavailable`] when no resume text is
/// present — an empty profile must never be embedded.
pub fn build_profile_text(inputs: &ProfileInputs) -> Result<String, EngineError> {
    let resume = inputs
        .resume_text
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(EngineError::ProfileUnavailable)?;

    let mut sections = vec![format!("Resume:\n{resume}")];

    if let Some(context) = inputs
        .additional_context
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sections.push(format!("Additional Context:\n{context}"));
    }

    for story in &inputs.stories {
        sections.push(format!("Story: {}\n{}", story.title, story.content));
    }

    for document in &inputs.documents {
        sections.push(format!(
            "Document: {}\n{}",
            document.name,
            document.indexable_text()
        ));
    }

    Ok(sections.join("\n\n"))
}

/// Cheap fingerprint of the profile text: byte length plus both affixes.
/// Deliberately not a cryptographic hash — it only needs to catch input
/// edits, and gets recomputed on every read.
pub fn profile_fingerprint(text: &str) -> String {
    let head: String = text.chars().take(FINGERPRINT_AFFIX_CHARS).collect();
    let tail: String = {
        let mut reversed: Vec<char> = text.chars().rev().take(FINGERPRINT_AFFIX_CHARS).collect();
        reversed.reverse();
        reversed.into_iter().collect()
    };
    format!("{}:{}:{}", text.len(), head, tail)
}

struct CachedProfile {
    profile_hash: String,
    vector: Vec<f32>,
}

/// Owns the profile embedding cache. The (hash, vector) pair is always
/// replaced together under one lock, so a reader can never observe a vector
/// computed from different inputs than its hash.
pub struct CandidateProfileManager {
    pipeline: EmbeddingPipeline,
    cache: Mutex<Option<CachedProfile>>,
}

impl CandidateProfileManager {
    pub fn new(pipeline: EmbeddingPipeline) -> Self {
        Self {
            pipeline,
            cache: Mutex::new(None),
        }
    }

    /// Return the profile vector for these inputs, reusing the cached
    /// embedding when the fingerprint matches. On a miss, embeds and replaces
    /// the cache atomically.
    pub async fn profile_vector(&self, inputs: &ProfileInputs) -> Result<Vec<f32>, EngineError> {
        let text = build_profile_text(inputs)?;
        let fingerprint = profile_fingerprint(&text);

        if let Some(vector) = self.cached_vector(&fingerprint) {
            tracing::debug!("Profile vector cache hit");
            return Ok(vector);
        }

        let embedded = self
            .pipeline
            .embed(&text)
            .await?
            .ok_or(EngineError::EmbeddingUnavailable)?;

        let vector = embedded.vector;
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            *cache = Some(CachedProfile {
                profile_hash: fingerprint,
                vector: vector.clone(),
            });
        }
        tracing::debug!(dimensions = vector.len(), "Profile vector cache refreshed");

        Ok(vector)
    }

    /// Forcibly clear the cache. The content-store collaborator calls this
    /// whenever resume, context, stories, or documents change.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = None;
        tracing::debug!("Profile vector cache invalidated");
    }

    fn cached_vector(&self, fingerprint: &str) -> Option<Vec<f32>> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .as_ref()
            .filter(|c| c.profile_hash == fingerprint)
            .map(|c| c.vector.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use vantage_core::config::EmbeddingSettings;
    use vantage_core::embeddings::{EmbeddingBackend, EmbeddingError};
    use crate::store::{DocumentItem, Story};

    struct CountingBackend {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        async fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(vec![0.25; 8]))
        }
        fn dimensions(&self) -> usize {
            8
        }
        fn name(&self) -> &str {
            "counting"
        }
    }

    fn counting_pipeline() -> (EmbeddingPipeline, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_factory = Arc::clone(&calls);
        let pipeline = EmbeddingPipeline::spawn(
            move || {
                Ok(Box::new(CountingBackend {
                    calls: Arc::clone(&calls_in_factory),
                }) as Box<dyn EmbeddingBackend>)
            },
            &EmbeddingSettings::default(),
        );
        (pipeline, calls)
    }

    fn inputs_with_resume() -> ProfileInputs {
        ProfileInputs {
            resume_text: Some("Senior backend engineer, 8 years Go".to_string()),
            additional_context: Some("Open to remote roles".to_string()),
            stories: vec![Story {
                id: "s1".to_string(),
                title: "Payments migration".to_string(),
                content: "Led migration of the payments stack".to_string(),
                created_at: Utc::now(),
            }],
            documents: vec![DocumentItem {
                id: "d1".to_string(),
                name: "design doc".to_string(),
                content: "A long design document".to_string(),
                summary: Some("Summarized design doc".to_string()),
                use_summary: true,
                created_at: Utc::now(),
            }],
        }
    }

    #[test]
    fn test_build_profile_text_field_order() {
        let text = build_profile_text(&inputs_with_resume()).unwrap();

        let resume_pos = text.find("Resume:").unwrap();
        let context_pos = text.find("Additional Context:").unwrap();
        let story_pos = text.find("Story: Payments migration").unwrap();
        let doc_pos = text.find("Document: design doc").unwrap();

        assert!(resume_pos < context_pos);
        assert!(context_pos < story_pos);
        assert!(story_pos < doc_pos);
    }

    #[test]
    fn test_build_profile_text_uses_document_summary_when_flagged() {
        let text = build_profile_text(&inputs_with_resume()).unwrap();
        assert!(text.contains("Summarized design doc"));
        assert!(!text.contains("A long design document"));
    }

    #[test]
    fn test_build_profile_text_is_deterministic() {
        let inputs = inputs_with_resume();
        assert_eq!(
            build_profile_text(&inputs).unwrap(),
            build_profile_text(&inputs).unwrap()
        );
    }

    #[test]
    fn test_missing_resume_fails_fast() {
        let inputs = ProfileInputs {
            resume_text: None,
            ..inputs_with_resume()
        };
        match build_profile_text(&inputs) {
            Err(EngineError::ProfileUnavailable) => {}
            other => panic!("Expected ProfileUnavailable, got: {other:?}"),
        }
    }

    #[test]
    fn test_whitespace_resume_fails_fast() {
        let inputs = ProfileInputs {
            resume_text: Some("   \n  ".to_string()),
            ..inputs_with_resume()
        };
        assert!(matches!(
            build_profile_text(&inputs),
            Err(EngineError::ProfileUnavailable)
        ));
    }

    #[test]
    fn test_fingerprint_changes_with_any_edit() {
        let base = build_profile_text(&inputs_with_resume()).unwrap();
        let mut edited_inputs = inputs_with_resume();
        edited_inputs.additional_context =
            Some("Open to remote roles. Prefers small teams.".to_string());
        let edited = build_profile_text(&edited_inputs).unwrap();

        assert_ne!(profile_fingerprint(&base), profile_fingerprint(&edited));
    }

    #[tokio::test]
    async fn test_identical_inputs_hit_the_cache() {
        let (pipeline, calls) = counting_pipeline();
        let manager = CandidateProfileManager::new(pipeline);
        let inputs = inputs_with_resume();

        let first = manager.profile_vector(&inputs).await.unwrap();
        let second = manager.profile_vector(&inputs).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "Rebuilding from identical inputs must not re-invoke the backend"
        );
    }

    #[tokio::test]
    async fn test_changed_input_re_embeds() {
        let (pipeline, calls) = counting_pipeline();
        let manager = CandidateProfileManager::new(pipeline);

        let inputs = inputs_with_resume();
        manager.profile_vector(&inputs).await.unwrap();

        let mut changed = inputs_with_resume();
        changed.additional_context =
            Some("Open to remote roles. Now also interested in infra.".to_string());
        manager.profile_vector(&changed).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_re_embed() {
        let (pipeline, calls) = counting_pipeline();
        let manager = CandidateProfileManager::new(pipeline);
        let inputs = inputs_with_resume();

        manager.profile_vector(&inputs).await.unwrap();
        manager.invalidate();
        manager.profile_vector(&inputs).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_degraded_backend_surfaces_embedding_unavailable() {
        struct NoneBackend;

        #[async_trait]
        impl EmbeddingBackend for NoneBackend {
            async fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
                Ok(None)
            }
            fn dimensions(&self) -> usize {
                8
            }
            fn name(&self) -> &str {
                "none"
            }
        }

        let pipeline = EmbeddingPipeline::spawn(
            || Ok(Box::new(NoneBackend) as Box<dyn EmbeddingBackend>),
            &EmbeddingSettings::default(),
        );
        let manager = CandidateProfileManager::new(pipeline);

        match manager.profile_vector(&inputs_with_resume()).await {
            Err(EngineError::EmbeddingUnavailable) => {}
            other => panic!("Expected EmbeddingUnavailable, got: {other:?}"),
        }
    }
}
