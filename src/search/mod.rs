//! Hybrid search (component D): linear combination of TF-IDF and vector
//! scores.

pub mod hybrid;

pub use hybrid::{HybridSearcher, ScoredMemory};
