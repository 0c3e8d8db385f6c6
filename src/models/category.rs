//! Memory category, the one closed-taxonomy field that is immutable after
//! creation.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four kinds of memory the engine stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A choice made, with rationale.
    Decision,
    /// A reusable approach, exempt from decay.
    Pattern,
    /// A caution surfaced in every matching recall, exempt from decay.
    Warning,
    /// Something learned from an outcome.
    Learning,
}

impl Category {
    /// All category variants, in the engine's canonical display order.
    pub const ALL: [Category; 4] = [
        Category::Decision,
        Category::Pattern,
        Category::Warning,
        Category::Learning,
    ];

    /// Returns the lowercase wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Decision => "decision",
            Category::Pattern => "pattern",
            Category::Warning => "warning",
            Category::Learning => "learning",
        }
    }

    /// The plural bucket name used in recall responses
    /// (`decision` -> `decisions`, etc).
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Category::Decision => "decisions",
            Category::Pattern => "patterns",
            Category::Warning => "warnings",
            Category::Learning => "learnings",
        }
    }

    /// Semantic categories (pattern, warning) are permanent by default and
    /// exempt from time decay.
    #[must_use]
    pub const fn is_semantic(self) -> bool {
        matches!(self, Category::Pattern | Category::Warning)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "decision" => Ok(Category::Decision),
            "pattern" => Ok(Category::Pattern),
            "warning" => Ok(Category::Warning),
            "learning" => Ok(Category::Learning),
            other => Err(Error::Validation(format!("unknown category: {other}"))),
        }
    }
}
