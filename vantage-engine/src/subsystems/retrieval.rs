//! Multi-query retrieval engine — targeted context selection for AI prompts
//!
//! Instead of one broad search, each task type derives a small set of
//! targeted queries (requirements, gaps, the user's message, ...), issues
//! them concurrently against the vector index, merges hits by entity
//! identity, and fills story/document slots independently. Source tags are
//! preserved through deduplication so a selection stays explainable.
//!
//! Retrieval never fails for infrastructure reasons: if the embedding
//! subsystem is unavailable or every query errors, it degrades to the most
//! recently created stories/documents and reports `used_semantic_search =
//! false`.

use std::collections::{BTreeSet, HashMap};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use vantage_core::config::RetrievalConfig;
use vantage_core::embeddings::truncate_for_model;
use vantage_core::index::{EntityType, QueryOptions, ScoredRecord, VectorIndex};
use vantage_core::pipeline::EmbeddingPipeline;

use crate::error::EngineError;
use crate::store::{DocumentItem, Story};

/// Which AI task the retrieved context will feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalTask {
    CoverLetter,
    ResumeTailoring,
    InterviewPrep,
    Chat,
}

/// Which extraction rule produced a query. Preserved through deduplication
/// for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceTag {
    Requirement,
    Gap,
    MissingKeyword,
    UserMessage,
    JobTitle,
    JdFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub text: String,
    pub source_tag: SourceTag,
}

/// Task-specific inputs. Populate what the task has; extraction rules skip
/// empty fields.
#[derive(Debug, Clone, Default)]
pub struct RetrievalInputs {
    pub job_title: Option<String>,
    pub job_description: Option<String>,
    /// Requirement strings parsed out of the job description.
    pub requirements: Vec<String>,
    /// Gaps surfaced by resume analysis.
    pub gaps: Vec<String>,
    /// Keywords the resume is missing.
    pub missing_keywords: Vec<String>,
    /// The user's free-text chat message.
    pub user_message: Option<String>,
    /// Free-form additional context, appended verbatim.
    pub additional_context: Option<String>,
    /// Pre-rendered improvements section (see `improvements` subsystem).
    pub improvements_text: Option<String>,
}

/// One selected entity after deduplication: its best similarity across all
/// queries that hit it, plus the union of their source tags.
#[derive(Debug, Clone)]
pub struct DeduplicatedHit {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub best_similarity: f32,
    pub source_tags: BTreeSet<SourceTag>,
}

/// Retrieval output.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub context_text: String,
    pub selected_stories: Vec<Story>,
    pub selected_documents: Vec<DocumentItem>,
    pub queries_used: Vec<RetrievalQuery>,
    pub used_semantic_search: bool,
}

/// Derive the query set for a task. Rules are declarative and ordered; when
/// none fires and a job description exists, a fallback query is synthesized
/// from its prefix so the engine never runs on zero queries while any text
/// is available.
pub fn extract_queries(
    task: RetrievalTask,
    inputs: &RetrievalInputs,
    config: &RetrievalConfig,
) -> Vec<RetrievalQuery> {
    let mut queries = Vec::new();

    let push = |text: &str, tag: SourceTag, queries: &mut Vec<RetrievalQuery>| {
        let text = text.trim();
        if !text.is_empty() {
            queries.push(RetrievalQuery {
                text: text.to_string(),
                source_tag: tag,
            });
        }
    };

    match task {
        RetrievalTask::CoverLetter => {
            for requirement in inputs.requirements.iter().take(config.max_requirement_queries) {
                push(requirement, SourceTag::Requirement, &mut queries);
            }
            if let Some(title) = &inputs.job_title {
                push(title, SourceTag::JobTitle, &mut queries);
            }
        }
        RetrievalTask::ResumeTailoring => {
            for gap in &inputs.gaps {
                push(gap, SourceTag::Gap, &mut queries);
            }
            for keyword in &inputs.missing_keywords {
                push(keyword, SourceTag::MissingKeyword, &mut queries);
            }
            for requirement in inputs.requirements.iter().take(config.max_requirement_queries) {
                push(requirement, SourceTag::Requirement, &mut queries);
            }
        }
        RetrievalTask::InterviewPrep => {
            for requirement in inputs.requirements.iter().take(config.max_requirement_queries) {
                push(requirement, SourceTag::Requirement, &mut queries);
            }
            if let Some(title) = &inputs.job_title {
                push(title, SourceTag::JobTitle, &mut queries);
            }
        }
        RetrievalTask::Chat => {
            if let Some(message) = &inputs.user_message {
                push(message, SourceTag::UserMessage, &mut queries);
            }
        }
    }

    if queries.is_empty() {
        if let Some(jd) = inputs
            .job_description
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            queries.push(RetrievalQuery {
                text: truncate_for_model(jd, config.fallback_query_chars).to_string(),
                source_tag: SourceTag::JdFallback,
            });
        }
    }

    queries
}

/// Merge per-query results by entity identity: one hit per entity, keeping
/// its single best similarity and the union of matching source tags. Output
/// is sorted best-first (entity id breaks exact ties for determinism).
fn merge_hits(per_query: Vec<(SourceTag, Vec<ScoredRecord>)>) -> Vec<DeduplicatedHit> {
    let mut merged: HashMap<(EntityType, String), DeduplicatedHit> = HashMap::new();

    for (tag, records) in per_query {
        for scored in records {
            let key = (scored.record.entity_type, scored.record.entity_id.clone());
            match merged.get_mut(&key) {
                Some(hit) => {
                    hit.best_similarity = hit.best_similarity.max(scored.similarity);
                    hit.source_tags.insert(tag);
                }
                None => {
                    let mut source_tags = BTreeSet::new();
                    source_tags.insert(tag);
                    merged.insert(
                        key,
                        DeduplicatedHit {
                            entity_type: scored.record.entity_type,
                            entity_id: scored.record.entity_id,
                            best_similarity: scored.similarity,
                            source_tags,
                        },
                    );
                }
            }
        }
    }

    let mut hits: Vec<DeduplicatedHit> = merged.into_values().collect();
    hits.sort_by(|a, b| {
        b.best_similarity
            .partial_cmp(&a.best_similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    hits
}

pub struct MultiQueryRetriever {
    pipeline: EmbeddingPipeline,
    config: RetrievalConfig,
}

impl MultiQueryRetriever {
    pub fn new(pipeline: EmbeddingPipeline, config: RetrievalConfig) -> Self {
        Self { pipeline, config }
    }

    /// Retrieve and format supporting context for a task. Infallible by
    /// design: semantic search failures degrade to recency selection.
    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        stories: &[Story],
        documents: &[DocumentItem],
        task: RetrievalTask,
        inputs: &RetrievalInputs,
    ) -> RetrievedContext {
        let queries = extract_queries(task, inputs, &self.config);

        let mut used_semantic_search = false;
        let mut selected_stories = Vec::new();
        let mut selected_documents = Vec::new();

        if !queries.is_empty() {
            match self.semantic_hits(index, &queries).await {
                Ok(hits) => {
                    used_semantic_search = true;
                    (selected_stories, selected_documents) =
                        self.select_content(&hits, stories, documents);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Semantic retrieval degraded, selecting by recency");
                }
            }
        }

        if !used_semantic_search {
            selected_stories = most_recent_stories(stories, self.config.story_limit);
            selected_documents = most_recent_documents(documents, self.config.document_limit);
        }

        let context_text =
            format_context(task, &selected_stories, &selected_documents, inputs);

        RetrievedContext {
            context_text,
            selected_stories,
            selected_documents,
            queries_used: queries,
            used_semantic_search,
        }
    }

    /// Run all queries concurrently. A single query's failure contributes
    /// zero results; only all queries failing degrades the whole pass.
    async fn semantic_hits(
        &self,
        index: &VectorIndex,
        queries: &[RetrievalQuery],
    ) -> Result<Vec<DeduplicatedHit>, EngineError> {
        self.pipeline.initialize().await?;

        let searches = queries.iter().map(|query| self.run_query(index, query));
        let outcomes = join_all(searches).await;

        let mut per_query = Vec::new();
        let mut any_succeeded = false;

        for (query, outcome) in queries.iter().zip(outcomes) {
            match outcome {
                Ok(records) => {
                    any_succeeded = true;
                    per_query.push((query.source_tag, records));
                }
                Err(e) => {
                    tracing::warn!(
                        source_tag = ?query.source_tag,
                        error = %e,
                        "Retrieval query failed, contributing zero results"
                    );
                }
            }
        }

        if !any_succeeded {
            return Err(EngineError::EmbeddingUnavailable);
        }

        Ok(merge_hits(per_query))
    }

    async fn run_query(
        &self,
        index: &VectorIndex,
        query: &RetrievalQuery,
    ) -> Result<Vec<ScoredRecord>, EngineError> {
        let embedded = self
            .pipeline
            .embed_query(&query.text)
            .await?
            .ok_or(EngineError::EmbeddingUnavailable)?;

        Ok(index.query(
            &embedded.vector,
            &QueryOptions {
                limit: self.config.per_query_limit,
                threshold: self.config.similarity_threshold,
                entity_types: Some(vec![EntityType::Story, EntityType::Document]),
            },
        ))
    }

    /// Fill story and document slots independently from the merged ranking,
    /// so a flood of relevant stories cannot starve document selection.
    fn select_content(
        &self,
        hits: &[DeduplicatedHit],
        stories: &[Story],
        documents: &[DocumentItem],
    ) -> (Vec<Story>, Vec<DocumentItem>) {
        let mut selected_stories = Vec::new();
        let mut selected_documents = Vec::new();

        for hit in hits {
            match hit.entity_type {
                EntityType::Story => {
                    if selected_stories.len() < self.config.story_limit {
                        if let Some(story) = stories.iter().find(|s| s.id == hit.entity_id) {
                            selected_stories.push(story.clone());
                        }
                    }
                }
                EntityType::Document => {
                    if selected_documents.len() < self.config.document_limit {
                        if let Some(document) =
                            documents.iter().find(|d| d.id == hit.entity_id)
                        {
                            selected_documents.push(document.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        (selected_stories, selected_documents)
    }
}

fn most_recent_stories(stories: &[Story], limit: usize) -> Vec<Story> {
    let mut sorted: Vec<Story> = stories.to_vec();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted.truncate(limit);
    sorted
}

fn most_recent_documents(documents: &[DocumentItem], limit: usize) -> Vec<DocumentItem> {
    let mut sorted: Vec<DocumentItem> = documents.to_vec();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted.truncate(limit);
    sorted
}

fn story_section_label(task: RetrievalTask) -> &'static str {
    match task {
        RetrievalTask::CoverLetter => "Relevant Experiences",
        RetrievalTask::ResumeTailoring => "Experiences That Could Address Gaps",
        RetrievalTask::InterviewPrep => "Relevant Interview Examples",
        RetrievalTask::Chat => "Relevant Background",
    }
}

/// Concatenate selected content into labeled sections joined with explicit
/// separators.
fn format_context(
    task: RetrievalTask,
    stories: &[Story],
    documents: &[DocumentItem],
    inputs: &RetrievalInputs,
) -> String {
    let mut sections = Vec::new();

    if !stories.is_empty() {
        let body = stories
            .iter()
            .map(|story| format!("{}:\n{}", story.title, story.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        sections.push(format!("## {}\n\n{}", story_section_label(task), body));
    }

    if !documents.is_empty() {
        let body = documents
            .iter()
            .map(|document| format!("{}:\n{}", document.name, document.indexable_text()))
            .collect::<Vec<_>>()
            .join("\n\n");
        sections.push(format!("## Supporting Documents\n\n{}", body));
    }

    if let Some(improvements) = inputs
        .improvements_text
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sections.push(improvements.to_string());
    }

    if let Some(context) = inputs
        .additional_context
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sections.push(format!("## Additional Context\n\n{}", context));
    }

    sections.join("\n\n---\n\n")
}

// ============================================================================
// TESTS
// ============================================================================
