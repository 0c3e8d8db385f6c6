//! Auto-recall patterns matched against file paths, tags, and entities.

use super::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of value a [`ContextTrigger`]'s `pattern` is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// `pattern` is a glob (`**` recursive) matched against a file path.
    FilePattern,
    /// `pattern` is a regex matched against tags.
    TagMatch,
    /// `pattern` is a regex matched against extracted entity names.
    EntityMatch,
}

/// An auto-recall rule: "when X is touched, recall Y".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTrigger {
    /// Numeric id.
    pub id: i64,
    /// The project this trigger belongs to.
    pub project_path: String,
    /// What the pattern is matched against.
    pub trigger_type: TriggerType,
    /// Glob (file) or regex (tag/entity) pattern.
    pub pattern: String,
    /// The topic to recall when this trigger fires.
    pub recall_topic: String,
    /// Categories to restrict the follow-up recall to.
    pub recall_categories: Vec<Category>,
    /// Whether this trigger is considered during matching.
    pub is_active: bool,
    /// Higher sorts first among candidate triggers.
    pub priority: i32,
    /// Number of times this trigger has matched.
    pub trigger_count: u64,
    /// When this trigger last matched.
    pub last_triggered: Option<DateTime<Utc>>,
}
