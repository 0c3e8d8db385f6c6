//! Hierarchical clusters of memories, grouped by dominant tags.

use super::MemoryId;
use serde::{Deserialize, Serialize};

/// A hierarchical cluster of related memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCommunity {
    /// Numeric id.
    pub id: i64,
    /// Derived from the cluster's dominant tags.
    pub name: String,
    /// Free-text summary of the cluster.
    pub summary: Option<String>,
    /// Tags shared across (most of) the cluster's members.
    pub tags: Vec<String>,
    /// Number of member memories.
    pub member_count: u64,
    /// The memory ids in this cluster.
    pub member_ids: Vec<MemoryId>,
    /// `0` for a leaf cluster; higher levels group lower ones.
    pub level: u32,
    /// The parent cluster, if this is not a top-level community.
    pub parent_id: Option<i64>,
    /// Optional centroid embedding for the cluster.
    pub embedding: Option<Vec<f32>>,
}
