//! Decision-tree nodes consulted by the rules engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric identifier for a [`Rule`].
pub type RuleId = i64;

/// A decision-tree node: given a trigger match, what guidance to surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Numeric id.
    pub id: RuleId,
    /// Free text describing when this rule applies.
    pub trigger: String,
    /// Tokenized form of `trigger`, used to seed the rules TF-IDF index.
    pub trigger_keywords: String,
    /// Actions the caller must perform.
    pub must_do: Vec<String>,
    /// Actions the caller must avoid.
    pub must_not: Vec<String>,
    /// Questions the caller should ask before proceeding.
    pub ask_first: Vec<String>,
    /// Non-blocking cautions.
    pub warnings: Vec<String>,
    /// Higher sorts first.
    pub priority: i32,
    /// Disabled rules are excluded from the index.
    pub enabled: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
