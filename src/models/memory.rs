//! The central entity: a single remembered unit.

use super::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Numeric identifier for a [`Memory`] row.
pub type MemoryId = i64;

/// Tri-state outcome of whether a memory's guidance worked in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Worked {
    /// No outcome has been recorded yet.
    #[default]
    Unknown,
    /// The recorded outcome confirmed the memory's guidance.
    True,
    /// The recorded outcome contradicted the memory's guidance.
    False,
}

impl Worked {
    /// Maps to the nullable-integer encoding used by the durable store
    /// (`NULL` = unknown, `0` = false, `1` = true).
    #[must_use]
    pub const fn to_db(self) -> Option<i64> {
        match self {
            Worked::Unknown => None,
            Worked::False => Some(0),
            Worked::True => Some(1),
        }
    }

    /// Inverse of [`Worked::to_db`].
    #[must_use]
    pub const fn from_db(value: Option<i64>) -> Self {
        match value {
            None => Worked::Unknown,
            Some(0) => Worked::False,
            Some(_) => Worked::True,
        }
    }
}

/// A single remembered unit: a decision, pattern, warning, or learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Numeric id, assigned by the store.
    pub id: MemoryId,
    /// Immutable after creation.
    pub category: Category,
    /// Required free text.
    pub content: String,
    /// Optional free text explaining the "why".
    pub rationale: Option<String>,
    /// Free-form structured context.
    pub context: Json,
    /// Ordered sequence of short tag strings.
    pub tags: Vec<String>,
    /// Absolute file path, if this memory is anchored to one.
    pub file_path: Option<String>,
    /// Path relative to the project root, if known.
    pub file_path_relative: Option<String>,
    /// Precomputed tokenized text, used to seed the TF-IDF index.
    pub keywords: String,
    /// Derived from category unless the caller overrides it at creation:
    /// true for pattern/warning.
    pub is_permanent: bool,
    /// 384-dimensional dense embedding, if an encoder was available.
    pub vector_embedding: Option<Vec<f32>>,
    /// Outcome text recorded by a "seal" operation.
    pub outcome: Option<String>,
    /// Whether the recorded outcome confirmed the memory.
    pub worked: Worked,
    /// Never decays, never pruned.
    pub pinned: bool,
    /// Soft-deleted: invisible to recall, visible to graph/history/id lookup.
    pub archived: bool,
    /// Non-negative recall counter.
    pub recall_count: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last content- or outcome-change timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// The decay floor for this memory: 1.0 for pinned or semantic
    /// (pattern/warning) memories, otherwise the caller-supplied floor.
    #[must_use]
    pub fn decay_floor(&self, configured_min_floor: f32) -> f32 {
        if self.pinned || self.category.is_semantic() {
            1.0
        } else {
            configured_min_floor
        }
    }

    /// Truncates `content` to `max_chars`, appending `"..."` when truncated.
    /// Used by condensed recall output (spec: 150 + `"..."` = 153 max).
    #[must_use]
    pub fn condensed_content(content: &str, max_chars: usize) -> String {
        if content.chars().count() <= max_chars {
            return content.to_string();
        }
        let truncated: String = content.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn worked_round_trips_through_db_encoding() {
        assert_eq!(Worked::from_db(Worked::Unknown.to_db()), Worked::Unknown);
        assert_eq!(Worked::from_db(Worked::True.to_db()), Worked::True);
        assert_eq!(Worked::from_db(Worked::False.to_db()), Worked::False);
    }

    #[test]
    fn condensed_content_adds_ellipsis_only_when_truncated() {
        let short = "short content";
        assert_eq!(Memory::condensed_content(short, 150), short);

        let long = "x".repeat(200);
        let condensed = Memory::condensed_content(&long, 150);
        assert_eq!(condensed.len(), 153);
        assert!(condensed.ends_with("..."));
    }
}
