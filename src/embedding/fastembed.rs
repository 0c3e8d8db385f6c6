//! FastEmbed-based embedder (behind the `fastembed-embeddings` feature).

use super::Embedder;
use crate::{Error, Result};
use std::sync::Mutex;

/// Dense embedder backed by the `fastembed` ONNX runtime, producing
/// `all-MiniLM-L6-v2`-compatible 384-dimensional vectors.
pub struct FastEmbedEmbedder {
    dimensions: usize,
    #[cfg(feature = "fastembed-embeddings")]
    model: Mutex<::fastembed::TextEmbedding>,
    #[cfg(not(feature = "fastembed-embeddings"))]
    _inner: Mutex<()>,
}

impl FastEmbedEmbedder {
    /// Default embedding dimensions for `all-MiniLM-L6-v2`.
    pub const DEFAULT_DIMENSIONS: usize = 384;

    /// Loads the embedding model. With the `fastembed-embeddings` feature
    /// disabled, construction always fails; callers should fall back to
    /// [`super::FallbackEmbedder`] instead of calling this.
    ///
    /// # Errors
    ///
    /// Returns `Error::Fatal` if the model cannot be loaded (missing
    /// weights, unsupported platform, feature not compiled in).
    #[cfg(feature = "fastembed-embeddings")]
    pub fn new() -> Result<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )
        .map_err(|e| Error::Fatal(format!("failed to load embedding model: {e}")))?;
        Ok(Self {
            dimensions: Self::DEFAULT_DIMENSIONS,
            model: Mutex::new(model),
        })
    }

    /// Stub constructor for builds without the `fastembed-embeddings`
    /// feature; always returns an error so callers degrade to TF-IDF-only
    /// search rather than panicking.
    ///
    /// # Errors
    ///
    /// Always returns `Error::Fatal`.
    #[cfg(not(feature = "fastembed-embeddings"))]
    pub fn new() -> Result<Self> {
        Err(Error::Fatal(
            "fastembed-embeddings feature not compiled in".to_string(),
        ))
    }
}

impl Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[cfg(feature = "fastembed-embeddings")]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| Error::Fatal("embedding model lock poisoned".to_string()))?;
        let mut vectors = model
            .embed(vec![text], None)
            .map_err(|e| Error::Fatal(format!("embedding failed: {e}")))?;
        vectors
            .pop()
            .ok_or_else(|| Error::Fatal("embedding model returned no vectors".to_string()))
    }

    #[cfg(not(feature = "fastembed-embeddings"))]
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::Fatal(
            "fastembed-embeddings feature not compiled in".to_string(),
        ))
    }
}
