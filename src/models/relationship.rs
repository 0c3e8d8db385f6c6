//! Typed directed edges between memories.

use super::MemoryId;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed taxonomy of edge labels between two memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Source's outcome led to the creation of target.
    LedTo,
    /// Source replaces target (produced by compaction).
    Supersedes,
    /// Source requires target to already hold.
    DependsOn,
    /// Source contradicts target.
    ConflictsWith,
    /// A loose association with no stronger semantics.
    RelatedTo,
}

impl RelationshipType {
    /// Every variant, used for validation and iteration.
    pub const ALL: [RelationshipType; 5] = [
        RelationshipType::LedTo,
        RelationshipType::Supersedes,
        RelationshipType::DependsOn,
        RelationshipType::ConflictsWith,
        RelationshipType::RelatedTo,
    ];

    /// Lowercase, underscore-separated wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationshipType::LedTo => "led_to",
            RelationshipType::Supersedes => "supersedes",
            RelationshipType::DependsOn => "depends_on",
            RelationshipType::ConflictsWith => "conflicts_with",
            RelationshipType::RelatedTo => "related_to",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "led_to" => Ok(RelationshipType::LedTo),
            "supersedes" => Ok(RelationshipType::Supersedes),
            "depends_on" => Ok(RelationshipType::DependsOn),
            "conflicts_with" => Ok(RelationshipType::ConflictsWith),
            "related_to" => Ok(RelationshipType::RelatedTo),
            other => Err(Error::Validation(format!(
                "unknown relationship type: {other}"
            ))),
        }
    }
}

/// A directed edge between two memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRelationship {
    /// Numeric id.
    pub id: i64,
    /// The edge's tail.
    pub source_id: MemoryId,
    /// The edge's head.
    pub target_id: MemoryId,
    /// The edge label.
    pub relationship: RelationshipType,
    /// Optional free-text annotation.
    pub description: Option<String>,
    /// Confidence in `[0, 1]`, default `1.0`.
    pub confidence: f32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl MemoryRelationship {
    /// Validates the no-self-loop invariant.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `source_id == target_id`.
    pub fn validate_no_self_loop(source_id: MemoryId, target_id: MemoryId) -> crate::Result<()> {
        if source_id == target_id {
            return Err(Error::Validation(
                "a memory cannot be related to itself".to_string(),
            ));
        }
        Ok(())
    }
}
