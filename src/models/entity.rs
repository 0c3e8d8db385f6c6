//! Named things extracted from memory text, and their links back to memories.

use super::MemoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kinds of things the entity extractor recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A function or method name.
    Function,
    /// A class or struct/type name.
    Class,
    /// A file path.
    File,
    /// A module or package name.
    Module,
    /// A variable or field name.
    Variable,
    /// A free-floating concept that doesn't fit the other types.
    Concept,
}

/// A named thing found inside memory text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Numeric id.
    pub id: i64,
    /// The project this entity was observed in.
    pub project_path: String,
    /// The kind of entity.
    pub entity_type: EntityType,
    /// Short name, as it appeared in text.
    pub name: String,
    /// Fully-qualified form, if derivable (e.g. `module.Class.method`).
    pub qualified_name: Option<String>,
    /// Number of times this entity has been observed.
    pub mention_count: u64,
    /// Link into the external code-indexer collaborator's table, if matched.
    pub code_entity_id: Option<i64>,
    /// First-seen timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-seen timestamp.
    pub updated_at: DateTime<Utc>,
}

/// How a memory relates to an extracted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRefRelationship {
    /// The memory mentions the entity in passing.
    Mentions,
    /// The memory is primarily about the entity.
    About,
    /// The memory describes a modification to the entity.
    Modifies,
    /// The memory describes the entity's introduction.
    Introduces,
    /// The memory marks the entity as deprecated.
    Deprecates,
}

/// A link between a memory and an extracted entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntityRef {
    /// Numeric id.
    pub id: i64,
    /// The memory side of the link.
    pub memory_id: MemoryId,
    /// The entity side of the link.
    pub entity_id: i64,
    /// How the memory relates to the entity.
    pub relationship: EntityRefRelationship,
    /// Surrounding text at the point the entity was mentioned.
    pub context_snippet: Option<String>,
}

/// `(entity_type, name, context_snippet)` produced by the extractor.
#[derive(Debug, Clone)]
pub struct ExtractedEntityMention {
    /// The kind of entity found.
    pub entity_type: EntityType,
    /// The entity's name as it appeared in text.
    pub name: String,
    /// A short slice of surrounding text.
    pub context_snippet: String,
}
