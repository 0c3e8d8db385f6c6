//! Linear-combination hybrid search over the TF-IDF and dense vector
//! indices.

use crate::index::{TfIdfIndex, VectorFilters, VectorIndex};
use crate::models::MemoryId;
use std::collections::HashMap;

/// Default TF-IDF similarity threshold for hybrid queries.
pub const DEFAULT_TFIDF_THRESHOLD: f32 = 0.1;
/// Default vector cosine-similarity threshold for hybrid queries.
pub const DEFAULT_VECTOR_THRESHOLD: f32 = 0.3;

/// A memory id with its combined score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredMemory {
    /// The memory's id.
    pub id: MemoryId,
    /// `(1 - w) * tfidf + w * vector`, or plain `tfidf` when vector scoring
    /// was unavailable.
    pub score: f32,
}

/// Combines component B (TF-IDF) and component C (dense vector) scores.
///
/// No calibration is applied between the TF-IDF and cosine scales; callers
/// must not compare absolute scores produced by this searcher against raw
/// scores from either sub-index directly.
pub struct HybridSearcher<'a> {
    tfidf: &'a TfIdfIndex,
    vector: Option<&'a VectorIndex>,
}

impl<'a> HybridSearcher<'a> {
    /// Builds a searcher over `tfidf`, optionally also scoring against
    /// `vector` when it is available.
    #[must_use]
    pub fn new(tfidf: &'a TfIdfIndex, vector: Option<&'a VectorIndex>) -> Self {
        Self { tfidf, vector }
    }

    /// Runs a hybrid query: tokenizes nothing extra (the sub-indices
    /// tokenize internally), scores each side with `2 * top_k` candidates,
    /// resorts the union by the combined score.
    ///
    /// `query_embedding` is the caller's already-encoded dense vector for
    /// `query_text`, if an encoder was available; `None` forces TF-IDF-only
    /// scoring regardless of `weight`.
    #[must_use]
    pub fn search(
        &self,
        query_text: &str,
        query_embedding: Option<&[f32]>,
        top_k: usize,
        weight: f32,
        filters: &VectorFilters,
    ) -> Vec<ScoredMemory> {
        let pool = top_k.saturating_mul(2).max(top_k);
        let tfidf_hits = self.tfidf.search(query_text, pool, DEFAULT_TFIDF_THRESHOLD);

        let vector_available = self.vector.is_some_and(|v| v.is_available() && v.count() > 0);
        let vector_hits: Vec<(MemoryId, f32)> = match (self.vector, query_embedding) {
            (Some(vector), Some(embedding)) if vector_available => {
                vector.search(embedding, pool, filters)
            }
            _ => Vec::new(),
        };

        let use_vector = vector_available && query_embedding.is_some();
        let effective_weight = if use_vector { weight.clamp(0.0, 1.0) } else { 0.0 };

        let mut combined: HashMap<MemoryId, (f32, f32)> = HashMap::new();
        for (id, score) in tfidf_hits {
            combined.entry(id).or_insert((0.0, 0.0)).0 = score;
        }
        if use_vector {
            for (id, score) in vector_hits {
                if score < DEFAULT_VECTOR_THRESHOLD {
                    continue;
                }
                combined.entry(id).or_insert((0.0, 0.0)).1 = score;
            }
        }

        let mut scored: Vec<ScoredMemory> = combined
            .into_iter()
            .map(|(id, (tfidf_score, vector_score))| {
                let score = if use_vector {
                    (1.0 - effective_weight) * tfidf_score + effective_weight * vector_score
                } else {
                    tfidf_score
                };
                ScoredMemory { id, score }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}
