//! The session's "hot set" of pinned-into-context memories.

use super::MemoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A memory pinned into a session's active context. Capped at 10 per
/// project; ordered by `priority`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveContextItem {
    /// Numeric id.
    pub id: i64,
    /// The project this item belongs to.
    pub project_path: String,
    /// The memory pinned into context.
    pub memory_id: MemoryId,
    /// Higher sorts first when the hot set is trimmed.
    pub priority: i32,
    /// When this memory was added to the hot set.
    pub added_at: DateTime<Utc>,
}

impl ActiveContextItem {
    /// Maximum number of items retained per project.
    pub const MAX_PER_PROJECT: usize = 10;
}
