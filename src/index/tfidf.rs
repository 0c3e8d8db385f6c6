//! In-memory inverted index with cosine-similarity search over augmented
//! TF-IDF document vectors.

use crate::text::tokenize;
use std::collections::HashMap;

/// Default similarity threshold for [`TfIdfIndex::search`].
pub const DEFAULT_THRESHOLD: f32 = 0.1;

#[derive(Debug, Clone, Default)]
struct DocumentVector {
    /// term -> augmented-TF weight for this document (IDF is applied at
    /// query time, since it shifts with every corpus mutation).
    tf: HashMap<String, f32>,
}

/// An in-memory inverted index with cosine similarity search, built from
/// tokenized free text. Mutated only by its owning manager; rebuilt whole
/// rather than patched when the index is found stale.
#[derive(Debug, Default)]
pub struct TfIdfIndex {
    documents: HashMap<i64, DocumentVector>,
    /// term -> document ids containing it; `len()` is the document frequency.
    postings: HashMap<String, Vec<i64>>,
}

impl TfIdfIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the index has no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Tokenizes `text` (with `tags` boosted) and indexes it under `id`,
    /// replacing any prior document at that id.
    pub fn add_document(&mut self, id: i64, text: &str, tags: &[String]) {
        self.remove_document(id);
        let tokens = tokenize(text, tags);
        if tokens.is_empty() {
            // Still occupy the slot so freshness/`len()` bookkeeping is honest.
            self.documents.insert(id, DocumentVector::default());
            return;
        }
        let mut counts: HashMap<String, u32> = HashMap::new();
        for t in &tokens {
            *counts.entry(t.clone()).or_insert(0) += 1;
        }
        let max_count = *counts.values().max().unwrap_or(&1);
        let mut tf = HashMap::with_capacity(counts.len());
        for (term, count) in &counts {
            tf.insert(term.clone(), augmented_tf(*count, max_count));
            self.postings.entry(term.clone()).or_default().push(id);
        }
        self.documents.insert(id, DocumentVector { tf });
    }

    /// Removes a document and its postings, if present.
    pub fn remove_document(&mut self, id: i64) {
        if let Some(doc) = self.documents.remove(&id) {
            for term in doc.tf.keys() {
                if let Some(ids) = self.postings.get_mut(term) {
                    ids.retain(|d| *d != id);
                    if ids.is_empty() {
                        self.postings.remove(term);
                    }
                }
            }
        }
    }

    /// Clears the entire index.
    pub fn clear(&mut self) {
        self.documents.clear();
        self.postings.clear();
    }

    /// IDF of `term` given the current corpus: `ln((N+1)/(df+1)) + 1`.
    /// Unknown terms have `df = 0`.
    #[must_use]
    pub fn idf(&self, term: &str) -> f32 {
        let n = self.documents.len() as f32;
        let df = self.postings.get(term).map_or(0, Vec::len) as f32;
        ((n + 1.0) / (df + 1.0)).ln() + 1.0
    }

    fn weighted(&self, doc: &DocumentVector) -> HashMap<&str, f32> {
        doc.tf
            .iter()
            .map(|(term, tf)| (term.as_str(), tf * self.idf(term)))
            .collect()
    }

    fn norm(weighted: &HashMap<&str, f32>) -> f32 {
        weighted.values().map(|w| w * w).sum::<f32>().sqrt()
    }

    /// Searches for the `top_k` documents most similar to `query`, above
    /// `threshold`, sorted descending by score. Returns `[]` for an empty
    /// query or empty index.
    #[must_use]
    pub fn search(&self, query: &str, top_k: usize, threshold: f32) -> Vec<(i64, f32)> {
        let query_tokens = tokenize(query, &[]);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let mut query_counts: HashMap<String, u32> = HashMap::new();
        for t in &query_tokens {
            *query_counts.entry(t.clone()).or_insert(0) += 1;
        }
        let max_count = *query_counts.values().max().unwrap_or(&1);
        let query_doc = DocumentVector {
            tf: query_counts
                .iter()
                .map(|(term, count)| (term.clone(), augmented_tf(*count, max_count)))
                .collect(),
        };
        let query_weighted = self.weighted(&query_doc);
        let query_norm = Self::norm(&query_weighted);
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut candidates: Vec<i64> = Vec::new();
        for term in query_weighted.keys() {
            if let Some(ids) = self.postings.get(*term) {
                for id in ids {
                    if !candidates.contains(id) {
                        candidates.push(*id);
                    }
                }
            }
        }

        let mut scored: Vec<(i64, f32)> = candidates
            .into_iter()
            .filter_map(|id| {
                let doc = self.documents.get(&id)?;
                let doc_weighted = self.weighted(doc);
                let doc_norm = Self::norm(&doc_weighted);
                if doc_norm == 0.0 {
                    return None;
                }
                let dot: f32 = query_weighted
                    .iter()
                    .filter_map(|(term, qw)| doc_weighted.get(term).map(|dw| qw * dw))
                    .sum();
                let score = dot / (query_norm * doc_norm);
                if score >= threshold {
                    Some((id, score))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Cosine similarity between two already-indexed documents, in `[0, 1]`
    /// (non-negative since augmented TF and IDF here are both non-negative).
    #[must_use]
    pub fn document_similarity(&self, id1: i64, id2: i64) -> f32 {
        let (Some(a), Some(b)) = (self.documents.get(&id1), self.documents.get(&id2)) else {
            return 0.0;
        };
        let wa = self.weighted(a);
        let wb = self.weighted(b);
        let norm_a = Self::norm(&wa);
        let norm_b = Self::norm(&wb);
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        let dot: f32 = wa.iter().filter_map(|(t, va)| wb.get(t).map(|vb| va * vb)).sum();
        dot / (norm_a * norm_b)
    }
}

fn augmented_tf(count: u32, max_count: u32) -> f32 {
    0.5 + 0.5 * (count as f32 / max_count.max(1) as f32)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_returns_empty() {
        let mut idx = TfIdfIndex::new();
        idx.add_document(1, "use JSON Web Tokens for auth", &[]);
        assert!(idx.search("", 10, DEFAULT_THRESHOLD).is_empty());
    }

    #[test]
    fn finds_relevant_document() {
        let mut idx = TfIdfIndex::new();
        idx.add_document(1, "use JSON Web Tokens for authentication", &[]);
        idx.add_document(2, "prefer PostgreSQL for storage", &[]);
        let results = idx.search("authentication tokens", 10, DEFAULT_THRESHOLD);
        assert_eq!(results.first().map(|(id, _)| *id), Some(1));
    }

    #[test]
    fn unrelated_query_finds_nothing() {
        let mut idx = TfIdfIndex::new();
        idx.add_document(1, "some content about databases", &[]);
        assert!(idx
            .search("completely unrelated zephyr wording", 10, DEFAULT_THRESHOLD)
            .is_empty());
    }

    #[test]
    fn remove_document_drops_it_from_results() {
        let mut idx = TfIdfIndex::new();
        idx.add_document(1, "use JSON Web Tokens", &[]);
        idx.remove_document(1);
        assert!(idx.search("JSON Web Tokens", 10, DEFAULT_THRESHOLD).is_empty());
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn document_similarity_is_symmetric() {
        let mut idx = TfIdfIndex::new();
        idx.add_document(1, "use JSON Web Tokens for auth", &[]);
        idx.add_document(2, "use JSON Web Tokens for sessions", &[]);
        let a = idx.document_similarity(1, 2);
        let b = idx.document_similarity(2, 1);
        assert!((a - b).abs() < 1e-6);
        assert!(a > 0.0);
    }

    #[test]
    fn identical_documents_are_maximally_similar() {
        let mut idx = TfIdfIndex::new();
        idx.add_document(1, "prefer PostgreSQL for storage", &[]);
        idx.add_document(2, "prefer PostgreSQL for storage", &[]);
        let sim = idx.document_similarity(1, 2);
        assert!(sim > 0.99);
    }
}
