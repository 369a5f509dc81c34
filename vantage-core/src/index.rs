//! In-memory vector index — pure nearest-neighbor store over entity embeddings
//!
//! Holds at most one record per (entity type, entity id). Records are replaced
//! wholesale when their content hash changes, never mutated in place, so a
//! reader can never observe a half-updated record set. The index knows nothing
//! about job matching or retrieval policy.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// What kind of entity a record embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Job,
    Story,
    Qa,
    Note,
    Document,
    CoverLetter,
    Profile,
}

/// One embedded unit of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub vector: Vec<f32>,
    pub content_hash: String,
}

/// A query hit: the record plus its cosine similarity to the query vector.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: EmbeddingRecord,
    pub similarity: f32,
}

/// Query parameters. `threshold` is a hard cutoff — records below it are
/// excluded, not down-ranked. `entity_types` is an allow-list; `None` means
/// all types.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub limit: usize,
    pub threshold: f32,
    pub entity_types: Option<Vec<EntityType>>,
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value between -1.0 and 1.0. Zero-magnitude vectors yield 0.0.
///
/// # Panics
/// Panics if vectors have different dimensions.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(
        a.len(),
        b.len(),
        "Vectors must have same dimension: {} vs {}",
        a.len(),
        b.len()
    );

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

struct Slot {
    record: EmbeddingRecord,
    /// Insertion sequence; similarity ties rank earlier-inserted records
    /// first. Replacement keeps the original sequence.
    seq: u64,
}

struct Inner {
    slots: HashMap<(EntityType, String), Slot>,
    next_seq: u64,
}

/// Thread-safe in-memory vector index.
pub struct VectorIndex {
    inner: RwLock<Inner>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                slots: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Insert or wholesale-replace the record for its (type, id) key.
    pub fn upsert(&self, record: EmbeddingRecord) {
        let key = (record.entity_type, record.entity_id.clone());
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;
        match inner.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().record = record;
            }
            Entry::Vacant(vacant) => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                vacant.insert(Slot { record, seq });
            }
        }
    }

    /// Remove the record for (type, id). Returns whether one existed.
    pub fn remove(&self, entity_type: EntityType, entity_id: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .slots
            .remove(&(entity_type, entity_id.to_string()))
            .is_some()
    }

    /// True if a record exists for (type, id) with exactly this content hash —
    /// i.e. the cached embedding is not stale.
    pub fn contains_fresh(&self, entity_type: EntityType, entity_id: &str, hash: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .slots
            .get(&(entity_type, entity_id.to_string()))
            .map(|slot| slot.record.content_hash == hash)
            .unwrap_or(false)
    }

    /// Ids of all records of a given type (for pruning against a live set).
    pub fn ids_of_type(&self, entity_type: EntityType) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .slots
            .keys()
            .filter(|(t, _)| *t == entity_type)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rank records by cosine similarity to `query`, strictly descending,
    /// ties broken by insertion order. Records with a dimension mismatch are
    /// skipped rather than compared.
    pub fn query(&self, query: &[f32], options: &QueryOptions) -> Vec<ScoredRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        let mut hits: Vec<(f32, u64, EmbeddingRecord)> = inner
            .slots
            .values()
            .filter(|slot| match &options.entity_types {
                Some(allowed) => allowed.contains(&slot.record.entity_type),
                None => true,
            })
            .filter(|slot| slot.record.vector.len() == query.len())
            .map(|slot| {
                let similarity = cosine_similarity(query, &slot.record.vector);
                (similarity, slot.seq, slot.record.clone())
            })
            .filter(|(similarity, _, _)| *similarity >= options.threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        hits.truncate(options.limit);

        hits.into_iter()
            .map(|(similarity, _, record)| ScoredRecord { record, similarity })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(entity_type: EntityType, id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            entity_type,
            entity_id: id.to_string(),
            vector,
            content_hash: format!("hash-{id}"),
        }
    }

    fn all_types_options(limit: usize, threshold: f32) -> QueryOptions {
        QueryOptions {
            limit,
            threshold,
            entity_types: None,
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert_relative_eq!(cosine_similarity(&a, &a), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_relative_eq!(cosine_similarity(&a, &b), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        assert_relative_eq!(cosine_similarity(&a, &b), -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector_is_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_relative_eq!(cosine_similarity(&a, &b), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_query_ranks_descending() {
        let index = VectorIndex::new();
        index.upsert(record(EntityType::Story, "far", vec![0.0, 1.0]));
        index.upsert(record(EntityType::Story, "near", vec![1.0, 0.1]));
        index.upsert(record(EntityType::Story, "mid", vec![1.0, 1.0]));

        let hits = index.query(&[1.0, 0.0], &all_types_options(10, -1.0));

        let ids: Vec<&str> = hits.iter().map(|h| h.record.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn test_query_threshold_is_hard_cutoff() {
        let index = VectorIndex::new();
        index.upsert(record(EntityType::Story, "aligned", vec![1.0, 0.0]));
        index.upsert(record(EntityType::Story, "orthogonal", vec![0.0, 1.0]));

        let hits = index.query(&[1.0, 0.0], &all_types_options(10, 0.5));

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.entity_id, "aligned");
    }

    #[test]
    fn test_query_type_filter_is_allow_list() {
        let index = VectorIndex::new();
        index.upsert(record(EntityType::Story, "s1", vec![1.0, 0.0]));
        index.upsert(record(EntityType::Document, "d1", vec![1.0, 0.0]));
        index.upsert(record(EntityType::Job, "j1", vec![1.0, 0.0]));

        let options = QueryOptions {
            limit: 10,
            threshold: -1.0,
            entity_types: Some(vec![EntityType::Story, EntityType::Document]),
        };
        let hits = index.query(&[1.0, 0.0], &options);

        assert_eq!(hits.len(), 2);
        assert!(hits
            .iter()
            .all(|h| h.record.entity_type != EntityType::Job));
    }

    #[test]
    fn test_query_ties_break_by_insertion_order() {
        let index = VectorIndex::new();
        index.upsert(record(EntityType::Story, "first", vec![1.0, 0.0]));
        index.upsert(record(EntityType::Story, "second", vec![1.0, 0.0]));
        index.upsert(record(EntityType::Story, "third", vec![1.0, 0.0]));

        let hits = index.query(&[1.0, 0.0], &all_types_options(10, -1.0));

        let ids: Vec<&str> = hits.iter().map(|h| h.record.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_upsert_replaces_wholesale_and_keeps_order() {
        let index = VectorIndex::new();
        index.upsert(record(EntityType::Story, "a", vec![1.0, 0.0]));
        index.upsert(record(EntityType::Story, "b", vec![1.0, 0.0]));

        // Replace "a" with a new vector and hash; it keeps its tie-break rank.
        let mut replacement = record(EntityType::Story, "a", vec![1.0, 0.0]);
        replacement.content_hash = "hash-a-v2".to_string();
        index.upsert(replacement);

        assert_eq!(index.len(), 2);
        let hits = index.query(&[1.0, 0.0], &all_types_options(10, -1.0));
        assert_eq!(hits[0].record.entity_id, "a");
        assert_eq!(hits[0].record.content_hash, "hash-a-v2");
    }

    #[test]
    fn test_same_id_different_type_are_distinct() {
        let index = VectorIndex::new();
        index.upsert(record(EntityType::Story, "42", vec![1.0, 0.0]));
        index.upsert(record(EntityType::Document, "42", vec![0.0, 1.0]));

        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_remove() {
        let index = VectorIndex::new();
        index.upsert(record(EntityType::Story, "gone", vec![1.0, 0.0]));

        assert!(index.remove(EntityType::Story, "gone"));
        assert!(!index.remove(EntityType::Story, "gone"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_contains_fresh() {
        let index = VectorIndex::new();
        index.upsert(record(EntityType::Document, "d1", vec![1.0, 0.0]));

        assert!(index.contains_fresh(EntityType::Document, "d1", "hash-d1"));
        assert!(!index.contains_fresh(EntityType::Document, "d1", "other-hash"));
        assert!(!index.contains_fresh(EntityType::Document, "missing", "hash-d1"));
    }

    #[test]
    fn test_query_respects_limit() {
        let index = VectorIndex::new();
        for i in 0..10 {
            index.upsert(record(EntityType::Story, &format!("s{i}"), vec![1.0, 0.0]));
        }

        let hits = index.query(&[1.0, 0.0], &all_types_options(3, -1.0));
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_query_skips_dimension_mismatch() {
        let index = VectorIndex::new();
        index.upsert(record(EntityType::Story, "2d", vec![1.0, 0.0]));
        index.upsert(record(EntityType::Story, "3d", vec![1.0, 0.0, 0.0]));

        let hits = index.query(&[1.0, 0.0], &all_types_options(10, -1.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.entity_id, "2d");
    }
}
