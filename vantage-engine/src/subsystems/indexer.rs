//! Content indexer — keeps the vector index in step with the content store
//!
//! Batch-indexes stories and documents: entities whose content hash is
//! unchanged are skipped, changed or new ones are embedded one at a time
//! (each item's failure is isolated), and records whose entity no longer
//! exists in the store are pruned. External deletion events are forwarded
//! through [`remove_entity`].

use std::collections::HashSet;

use anyhow::Result;

use vantage_core::embeddings::content_hash;
use vantage_core::index::{EmbeddingRecord, EntityType, VectorIndex};
use vantage_core::pipeline::EmbeddingPipeline;

use crate::store::ContentStore;

/// What one sync pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: usize,
}

/// One full sync pass over stories and documents.
pub async fn sync_index(
    store: &dyn ContentStore,
    pipeline: &EmbeddingPipeline,
    index: &VectorIndex,
) -> Result<IndexReport> {
    let stories = store.stories().await?;
    let documents = store.documents().await?;

    let mut report = IndexReport::default();

    for story in &stories {
        index_entity(
            pipeline,
            index,
            EntityType::Story,
            &story.id,
            &story.content,
            &mut report,
        )
        .await;
    }

    for document in &documents {
        index_entity(
            pipeline,
            index,
            EntityType::Document,
            &document.id,
            document.indexable_text(),
            &mut report,
        )
        .await;
    }

    let live_stories: HashSet<&str> = stories.iter().map(|s| s.id.as_str()).collect();
    let live_documents: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();
    prune_missing(index, EntityType::Story, &live_stories, &mut report);
    prune_missing(index, EntityType::Document, &live_documents, &mut report);

    tracing::info!(
        indexed = report.indexed,
        skipped = report.skipped,
        failed = report.failed,
        removed = report.removed,
        "Content index synced"
    );

    Ok(report)
}

/// Embed and upsert one entity unless its cached embedding is still fresh.
async fn index_entity(
    pipeline: &EmbeddingPipeline,
    index: &VectorIndex,
    entity_type: EntityType,
    entity_id: &str,
    text: &str,
    report: &mut IndexReport,
) {
    let hash = content_hash(text);
    if index.contains_fresh(entity_type, entity_id, &hash) {
        report.skipped += 1;
        return;
    }

    match pipeline.embed(text).await {
        Ok(Some(embedded)) => {
            index.upsert(EmbeddingRecord {
                entity_type,
                entity_id: entity_id.to_string(),
                vector: embedded.vector,
                content_hash: embedded.content_hash,
            });
            report.indexed += 1;
        }
        Ok(None) => {
            tracing::warn!(
                entity_id = %entity_id,
                "Embedding unavailable for entity, leaving it unindexed"
            );
            report.failed += 1;
        }
        Err(e) => {
            tracing::warn!(
                entity_id = %entity_id,
                error = %e,
                "Failed to embed entity, continuing"
            );
            report.failed += 1;
        }
    }
}

fn prune_missing(
    index: &VectorIndex,
    entity_type: EntityType,
    live_ids: &HashSet<&str>,
    report: &mut IndexReport,
) {
    for id in index.ids_of_type(entity_type) {
        if !live_ids.contains(id.as_str()) && index.remove(entity_type, &id) {
            tracing::debug!(entity_id = %id, "Pruned index record for deleted entity");
            report.removed += 1;
        }
    }
}

/// Forwarding hook for external deletion events (called by the content-store
/// collaborator when an entity is deleted).
pub fn remove_entity(index: &VectorIndex, entity_type: EntityType, entity_id: &str) {
    if index.remove(entity_type, entity_id) {
        tracing::info!(entity_id = %entity_id, "Removed index record for deleted entity");
    }
}

// ============================================================================
// TESTS
// ============================================================================
