//! Content-store boundary — domain models and the read-access trait
//!
//! The store behind this trait (database, sync layer, whatever) is an
//! external collaborator. Two contracts come with it:
//!
//! 1. Whenever resume text, additional context, stories, or documents change,
//!    the store's settings-change path MUST call
//!    [`crate::subsystems::profile::CandidateProfileManager::invalidate`] —
//!    the profile manager does not watch for changes itself.
//! 2. Entity deletions MUST be forwarded to
//!    [`crate::subsystems::indexer::remove_entity`] so the vector index drops
//!    the orphaned record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved behavioral/accomplishment story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// An uploaded supporting document (portfolio, writing sample, past review).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentItem {
    pub id: String,
    pub name: String,
    pub content: String,
    pub summary: Option<String>,
    /// When set, downstream consumers use the summary instead of full content.
    pub use_summary: bool,
    pub created_at: DateTime<Utc>,
}

impl DocumentItem {
    /// The text this document contributes to profiles, the index, and
    /// retrieval output: the summary when flagged and present, otherwise the
    /// full content.
    pub fn indexable_text(&self) -> &str {
        if self.use_summary {
            if let Some(summary) = &self.summary {
                return summary;
            }
        }
        &self.content
    }
}

/// A tracked job posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: String,
    pub title: String,
    pub company: String,
    pub description: String,
    /// The resume the user started from for this job, if one was attached.
    pub original_resume: Option<String>,
    /// The AI-tailored resume produced for this job, if tailoring happened.
    pub tailored_resume: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything that feeds the candidate profile, in one read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileInputs {
    pub resume_text: Option<String>,
    pub additional_context: Option<String>,
    pub stories: Vec<Story>,
    pub documents: Vec<DocumentItem>,
}

/// Read access to candidate content. Implemented by the storage collaborator.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn resume_text(&self) -> anyhow::Result<Option<String>>;
    async fn additional_context(&self) -> anyhow::Result<Option<String>>;
    async fn stories(&self) -> anyhow::Result<Vec<Story>>;
    async fn documents(&self) -> anyhow::Result<Vec<DocumentItem>>;
    async fn jobs(&self) -> anyhow::Result<Vec<JobPosting>>;

    /// Convenience read of everything the profile builder needs.
    async fn profile_inputs(&self) -> anyhow::Result<ProfileInputs> {
        Ok(ProfileInputs {
            resume_text: self.resume_text().await?,
            additional_context: self.additional_context().await?,
            stories: self.stories().await?,
            documents: self.documents().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(use_summary: bool, summary: Option<&str>) -> DocumentItem {
        DocumentItem {
            id: "d1".to_string(),
            name: "portfolio".to_string(),
            content: "full content".to_string(),
            summary: summary.map(String::from),
            use_summary,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_indexable_text_prefers_summary_when_flagged() {
        assert_eq!(doc(true, Some("the summary")).indexable_text(), "the summary");
    }

    #[test]
    fn test_indexable_text_falls_back_to_content() {
        assert_eq!(doc(true, None).indexable_text(), "full content");
        assert_eq!(doc(false, Some("the summary")).indexable_text(), "full content");
    }
}
