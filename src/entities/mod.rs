//! Entity extraction and context-trigger matching (component L).
//!
//! The extractor is a pure function: regex patterns over memory text
//! producing candidate mentions, with no I/O. The trigger matcher reads
//! active triggers from the store and matches a caller-supplied context
//! against them, bumping `trigger_count`/`last_triggered` on every match.
#![allow(clippy::expect_used)]

use crate::models::{Category, ContextTrigger, EntityType, ExtractedEntityMention, TriggerType};
use crate::storage::Store;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const CONTEXT_RADIUS: usize = 25;
const MIN_NAME_LEN: usize = 2;

static STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "use", "get", "set", "add", "new", "this", "that", "from", "have", "been", "will",
    "can", "should", "def", "class", "return", "import", "if", "else", "elif", "true", "false", "none", "null",
    "self", "cls",
];

static FUNCTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([a-z_][a-z0-9_]*)\s*\(").expect("static regex: function"));
static CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?:[A-Z][a-z]+)+|[A-Z]{2,}[a-z]+)\b").expect("static regex: class")
});
static FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[\w./\\-]+/)?[\w.-]+\.[a-z]{1,4}\b").expect("static regex: file")
});
static MODULE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:from\s+|import\s+)([\w.]+)").expect("static regex: module"));
static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[`'"]([a-z_][a-z0-9_]*)[`'"]"#).expect("static regex: variable")
});

fn context_snippet(text: &str, start: usize, end: usize) -> String {
    let lo = start.saturating_sub(CONTEXT_RADIUS);
    let hi = (end + CONTEXT_RADIUS).min(text.len());
    format!("...{}...", &text[lo..hi])
}

fn is_stop_word(name: &str) -> bool {
    STOP_WORDS.contains(&name.to_ascii_lowercase().as_str())
}

/// Extracts `(entity_type, name, context_snippet)` mentions from a single
/// piece of text. Pure, no I/O; callers combine content + rationale and
/// call this once per memory at create time.
#[must_use]
pub fn extract_entities(text: &str) -> Vec<ExtractedEntityMention> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut seen: HashSet<(EntityType, String)> = HashSet::new();
    let mut mentions = Vec::new();

    let passes: [(EntityType, &Regex); 5] = [
        (EntityType::Function, &FUNCTION_RE),
        (EntityType::Class, &CLASS_RE),
        (EntityType::File, &FILE_RE),
        (EntityType::Module, &MODULE_RE),
        (EntityType::Variable, &VARIABLE_RE),
    ];

    for (entity_type, re) in passes {
        for caps in re.captures_iter(text) {
            let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
                continue;
            };
            let name = m.as_str().trim().to_string();
            if name.len() < MIN_NAME_LEN || is_stop_word(&name) {
                continue;
            }
            let key = (entity_type, name.to_ascii_lowercase());
            if !seen.insert(key) {
                continue;
            }
            mentions.push(ExtractedEntityMention {
                entity_type,
                name,
                context_snippet: context_snippet(text, m.start(), m.end()),
            });
        }
    }

    mentions
}

/// A trigger that matched an incoming context, with the recall follow-up
/// the caller should perform.
#[derive(Debug, Clone)]
pub struct TriggerMatch {
    /// The matched trigger's id.
    pub trigger_id: i64,
    /// The matched trigger's type.
    pub trigger_type: TriggerType,
    /// The pattern that matched.
    pub pattern: String,
    /// Topic to recall as a follow-up.
    pub recall_topic: String,
    /// Categories to restrict the follow-up recall to.
    pub recall_categories: Vec<Category>,
    /// The trigger's configured priority.
    pub priority: i32,
}

fn matches_file_pattern(pattern: &str, file_path: &str) -> bool {
    let normalized_pattern = pattern.replace('\\', "/");
    let normalized_path = file_path.replace('\\', "/");
    glob::Pattern::new(&normalized_pattern).is_ok_and(|p| p.matches(&normalized_path))
}

fn matches_regex(pattern: &str, values: &[String]) -> bool {
    Regex::new(pattern).is_ok_and(|re| values.iter().any(|v| re.is_match(v)))
}

fn trigger_matches(trigger: &ContextTrigger, file_path: Option<&str>, tags: &[String], entities: &[String]) -> bool {
    match trigger.trigger_type {
        TriggerType::FilePattern => file_path.is_some_and(|fp| matches_file_pattern(&trigger.pattern, fp)),
        TriggerType::TagMatch => !tags.is_empty() && matches_regex(&trigger.pattern, tags),
        TriggerType::EntityMatch => !entities.is_empty() && matches_regex(&trigger.pattern, entities),
    }
}

/// Checks every active trigger for `project_path` against the supplied
/// context, returning matches ordered by trigger priority descending.
/// Matched triggers have `trigger_count`/`last_triggered` updated.
///
/// # Errors
///
/// Returns `Error::Store` on a read or write failure.
pub fn check_triggers(
    store: &Store,
    project_path: &str,
    file_path: Option<&str>,
    tags: &[String],
    entities: &[String],
) -> Result<Vec<TriggerMatch>> {
    let triggers = store.list_active_triggers(project_path)?;
    let mut matches = Vec::new();
    for trigger in triggers {
        if trigger_matches(&trigger, file_path, tags, entities) {
            store.record_trigger_fired(trigger.id)?;
            matches.push(TriggerMatch {
                trigger_id: trigger.id,
                trigger_type: trigger.trigger_type,
                pattern: trigger.pattern.clone(),
                recall_topic: trigger.recall_topic.clone(),
                recall_categories: trigger.recall_categories.clone(),
                priority: trigger.priority,
            });
        }
    }
    Ok(matches)
}

/// Validates that a trigger's pattern compiles (glob for `file_pattern`,
/// regex for `tag_match`/`entity_match`).
///
/// # Errors
///
/// Returns `Error::Validation` if the pattern does not compile.
pub fn validate_pattern(trigger_type: TriggerType, pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(Error::Validation("trigger pattern must not be empty".to_string()));
    }
    match trigger_type {
        TriggerType::FilePattern => glob::Pattern::new(pattern)
            .map(|_| ())
            .map_err(|e| Error::Validation(format!("invalid glob pattern: {e}"))),
        TriggerType::TagMatch | TriggerType::EntityMatch => {
            Regex::new(pattern).map(|_| ()).map_err(|e| Error::Validation(format!("invalid regex pattern: {e}")))
        }
    }
}

/// Extracts entities from a memory's content+rationale and persists them,
/// upserting [`crate::models::ExtractedEntity`] rows and linking each back
/// to the memory as `mentions`.
///
/// # Errors
///
/// Returns `Error::Store` on a write failure.
pub fn extract_and_store(
    store: &Store,
    project_path: &str,
    memory_id: crate::models::MemoryId,
    content: &str,
    rationale: Option<&str>,
) -> Result<usize> {
    let combined = match rationale {
        Some(r) if !r.is_empty() => format!("{content}\n{r}"),
        _ => content.to_string(),
    };
    let mentions = extract_entities(&combined);
    for mention in &mentions {
        let entity = store.upsert_entity(project_path, mention.entity_type, &mention.name, None)?;
        store.insert_entity_ref(
            memory_id,
            entity.id,
            crate::models::EntityRefRelationship::Mentions,
            Some(&mention.context_snippet),
        )?;
    }
    Ok(mentions.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::triggers::NewTrigger;

    #[test]
    fn extracts_function_class_file_and_variable_mentions() {
        let text = "Fixed parse_config() in ConfigLoader, see src/config.rs, renamed `old_name`";
        let mentions = extract_entities(text);
        assert!(mentions.iter().any(|m| m.entity_type == EntityType::Function && m.name == "parse_config"));
        assert!(mentions.iter().any(|m| m.entity_type == EntityType::Class && m.name == "ConfigLoader"));
        assert!(mentions.iter().any(|m| m.entity_type == EntityType::File && m.name.ends_with(".rs")));
        assert!(mentions.iter().any(|m| m.entity_type == EntityType::Variable && m.name == "old_name"));
    }

    #[test]
    fn dedupes_repeated_mentions() {
        let text = "call foo() then call foo() again";
        let mentions = extract_entities(text);
        assert_eq!(mentions.iter().filter(|m| m.name == "foo").count(), 1);
    }

    #[test]
    fn drops_stop_words_and_short_names() {
        let text = "if self.get() return true";
        let mentions = extract_entities(text);
        assert!(!mentions.iter().any(|m| m.name.eq_ignore_ascii_case("if")));
        assert!(!mentions.iter().any(|m| m.name.eq_ignore_ascii_case("self")));
    }

    #[test]
    fn empty_text_yields_no_mentions() {
        assert!(extract_entities("").is_empty());
    }

    #[test]
    fn glob_file_pattern_matches_recursive_star_star() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_trigger(&NewTrigger {
                project_path: "/p".to_string(),
                trigger_type: TriggerType::FilePattern,
                pattern: "src/**/auth.rs".to_string(),
                recall_topic: "authentication".to_string(),
                recall_categories: vec![],
                priority: 0,
            })
            .unwrap();
        let matches = check_triggers(&store, "/p", Some("src/services/oauth/auth.rs"), &[], &[]).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].recall_topic, "authentication");
    }

    #[test]
    fn tag_match_trigger_fires_on_regex_match() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_trigger(&NewTrigger {
                project_path: "/p".to_string(),
                trigger_type: TriggerType::TagMatch,
                pattern: "^auth.*".to_string(),
                recall_topic: "authentication".to_string(),
                recall_categories: vec![],
                priority: 0,
            })
            .unwrap();
        let tags = vec!["auth-refactor".to_string()];
        let matches = check_triggers(&store, "/p", None, &tags, &[]).unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn non_matching_context_fires_nothing_and_leaves_counters_untouched() {
        let store = Store::open_in_memory().unwrap();
        let trigger = store
            .insert_trigger(&NewTrigger {
                project_path: "/p".to_string(),
                trigger_type: TriggerType::FilePattern,
                pattern: "**/billing/**".to_string(),
                recall_topic: "billing".to_string(),
                recall_categories: vec![],
                priority: 0,
            })
            .unwrap();
        let matches = check_triggers(&store, "/p", Some("src/auth/login.rs"), &[], &[]).unwrap();
        assert!(matches.is_empty());
        let reloaded = store.list_active_triggers("/p").unwrap();
        assert_eq!(reloaded[0].id, trigger.id);
        assert_eq!(reloaded[0].trigger_count, 0);
    }

    #[test]
    fn matches_are_ordered_by_priority_descending() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_trigger(&NewTrigger {
                project_path: "/p".to_string(),
                trigger_type: TriggerType::FilePattern,
                pattern: "**/*.rs".to_string(),
                recall_topic: "low".to_string(),
                recall_categories: vec![],
                priority: 1,
            })
            .unwrap();
        store
            .insert_trigger(&NewTrigger {
                project_path: "/p".to_string(),
                trigger_type: TriggerType::FilePattern,
                pattern: "**/*.rs".to_string(),
                recall_topic: "high".to_string(),
                recall_categories: vec![],
                priority: 10,
            })
            .unwrap();
        let matches = check_triggers(&store, "/p", Some("src/lib.rs"), &[], &[]).unwrap();
        assert_eq!(matches[0].recall_topic, "high");
        assert_eq!(matches[1].recall_topic, "low");
    }

    #[test]
    fn validate_pattern_rejects_empty_and_bad_regex() {
        assert!(validate_pattern(TriggerType::FilePattern, "").is_err());
        assert!(validate_pattern(TriggerType::TagMatch, "(unclosed").is_err());
        assert!(validate_pattern(TriggerType::FilePattern, "**/*.rs").is_ok());
    }
}
