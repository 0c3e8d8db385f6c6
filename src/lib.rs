//! # codemem
//!
//! A project-scoped persistent memory engine for AI coding assistants.
//!
//! `codemem` captures decisions, patterns, warnings, and learnings produced
//! during software-engineering sessions, retrieves them by hybrid
//! TF-IDF + dense-vector search, and enforces a session protocol that gates
//! mutating operations behind explicit acknowledgment of prior context.
//!
//! ## Architecture
//!
//! - Three-layer storage: a relational [`storage`] layer (SQLite, WAL, FTS5),
//!   an in-memory [`index`] layer (TF-IDF + optional HNSW vector index), and
//!   a [`cache`] layer (TTL+LRU) in front of hot query paths.
//! - A [`memory`] manager orchestrates CRUD, recall, decay, conflict
//!   detection, and global-store merging on top of those layers.
//! - A [`graph`] module tracks typed relationships between memories.
//! - A [`protocol`] module gates mutating operations behind a per-session
//!   initialization + context-check handshake, producing signed preflight
//!   tokens.
//! - A [`registry`] lazily instantiates per-project state and evicts idle
//!   projects.
//!
//! This crate implements the core engine only; the RPC tool surface, CLI
//! driver, hook scripts, and file watcher that would normally front it are
//! external collaborators.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

pub mod cache;
pub mod config;
pub mod embedding;
pub mod entities;
pub mod graph;
pub mod index;
pub mod memory;
pub mod models;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod rules;
pub mod search;
pub mod storage;
pub mod text;

pub use config::EngineConfig;
pub use memory::MemoryManager;
pub use models::{Category, Memory, MemoryId};
pub use registry::ProjectRegistry;

/// Error type for codemem operations.
///
/// Follows the six-category taxonomy the engine's design calls for.
///
/// | Variant | Raised when |
/// |---------|-------------|
/// | `Validation` | Bad category, invalid relationship, empty required field, invalid regex/glob |
/// | `NotFound` | Unknown memory id, rule id, or session |
/// | `Protocol` | A session-protocol gate rejects a call (see [`protocol`]) |
/// | `Conflict` | Reserved for future blocking-conflict use; today conflicts are advisory |
/// | `Store` | Transient I/O, lock timeout, or constraint violation in the durable store |
/// | `Fatal` | Corruption, migration-version mismatch, or a missing critical table |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Input failed validation before any state was touched.
    ///
    /// Raised when:
    /// - A memory category is outside `{decision, pattern, warning, learning}`
    /// - A relationship type is outside the closed taxonomy
    /// - A required field (e.g. memory content) is empty
    /// - A trigger pattern is not a valid glob/regex
    #[error("invalid input: {0}")]
    Validation(String),

    /// The referenced entity does not exist.
    #[error("not found: {kind} {id}")]
    NotFound {
        /// The kind of entity that was not found (e.g. "memory", "rule").
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A session-protocol gate blocked the call.
    ///
    /// Carries the structured violation shape the engine returns to callers;
    /// see [`protocol::Violation`].
    #[error("protocol violation: {0:?}")]
    Protocol(protocol::Violation),

    /// An advisory conflict was detected. Never blocks; reserved for callers
    /// that want conflict detection to short-circuit a write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The durable store failed to complete an operation.
    ///
    /// Raised when:
    /// - A SQLite statement fails after the single lock-timeout retry
    /// - A foreign-key or uniqueness constraint is violated
    /// - The filesystem refuses to create the project storage directory
    #[error("store failure: {operation} ({cause})")]
    Store {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A fatal, unrecoverable condition for this project's store.
    ///
    /// Raised when:
    /// - The schema version is newer than any migration this build knows about
    /// - A critical table is missing after migrations ran
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Result type alias for codemem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("empty content".to_string());
        assert_eq!(err.to_string(), "invalid input: empty content");

        let err = Error::NotFound {
            kind: "memory",
            id: "42".to_string(),
        };
        assert_eq!(err.to_string(), "not found: memory 42");

        let err = Error::Store {
            operation: "insert_memory".to_string(),
            cause: "database is locked".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "store failure: insert_memory (database is locked)"
        );
    }

    #[test]
    fn test_current_timestamp_increases() {
        let a = current_timestamp();
        assert!(a > 0);
    }
}
