//! Outbound pointers from one project to another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a linked project relates to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkRelationship {
    /// A second worktree or checkout of the same logical project.
    SameProject,
    /// The linked project is upstream of the owner.
    Upstream,
    /// The linked project is downstream of the owner.
    Downstream,
    /// A loose association.
    Related,
}

/// An outbound pointer from `source_path` to `linked_path`. Unique on
/// `(source_path, linked_path)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectLink {
    /// Numeric id.
    pub id: i64,
    /// The owning project.
    pub source_path: String,
    /// The target project.
    pub linked_path: String,
    /// How the two projects relate.
    pub relationship: LinkRelationship,
    /// Human-readable label.
    pub label: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
