//! Append-only snapshots of a [`super::Memory`] at the moment of a change.

use super::MemoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// What kind of change produced a [`MemoryVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// The memory was first created (always `version_number == 1`).
    Created,
    /// `content`, `rationale`, `context`, or `tags` changed.
    ContentUpdated,
    /// `outcome`/`worked` were sealed.
    OutcomeRecorded,
    /// A graph relationship involving this memory changed.
    RelationshipChanged,
}

/// An append-only snapshot of a memory at one point in its history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryVersion {
    /// Numeric id.
    pub id: i64,
    /// The memory this version snapshots.
    pub memory_id: MemoryId,
    /// 1-indexed, monotonic per memory.
    pub version_number: u32,
    /// Content at the time of this version.
    pub content: String,
    /// Rationale at the time of this version.
    pub rationale: Option<String>,
    /// Context at the time of this version.
    pub context: Json,
    /// Tags at the time of this version.
    pub tags: Vec<String>,
    /// Outcome at the time of this version.
    pub outcome: Option<String>,
    /// Worked flag at the time of this version, as the nullable-int encoding.
    pub worked: Option<i64>,
    /// What produced this version.
    pub change_type: ChangeType,
    /// Free-text description of the change.
    pub change_description: Option<String>,
    /// When this version was recorded.
    pub changed_at: DateTime<Utc>,
}
