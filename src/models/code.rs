//! Schema-only tables owned by the external code-indexer collaborator.
//!
//! The engine persists these columns and enforces their uniqueness
//! constraints, but does not populate them itself; a pluggable code indexer
//! is expected to write them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A content hash recorded for one file in one project. Unique on
/// `(project_path, file_path)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHash {
    /// Numeric id.
    pub id: i64,
    /// The project this file belongs to.
    pub project_path: String,
    /// Path to the hashed file.
    pub file_path: String,
    /// Hex-encoded content hash.
    pub hash: String,
    /// When this hash was last recorded.
    pub updated_at: DateTime<Utc>,
}

/// A structural code entity (function, class, module, ...) discovered by
/// the external code indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeEntity {
    /// Numeric id.
    pub id: i64,
    /// The project this entity belongs to.
    pub project_path: String,
    /// File the entity is defined in.
    pub file_path: String,
    /// Entity kind, as a free-text label owned by the indexer.
    pub kind: String,
    /// Entity name.
    pub name: String,
    /// Fully-qualified name, if derivable.
    pub qualified_name: Option<String>,
}

/// A link between a memory and a code entity, owned by the external
/// code indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCodeRef {
    /// Numeric id.
    pub id: i64,
    /// The memory side of the link.
    pub memory_id: i64,
    /// The code entity side of the link.
    pub code_entity_id: i64,
}
