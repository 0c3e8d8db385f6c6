//! Rules engine (component I): a second TF-IDF index over rule triggers,
//! producing combined must/must-not/ask-first/warning guidance.

use crate::cache::{make_cache_key, RULES_CACHE};
use crate::index::tfidf::TfIdfIndex;
use crate::models::{Rule, RuleId};
use crate::storage::rules::NewRule;
use crate::storage::Store;
use crate::text::tokenize_to_string;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Default TF-IDF similarity threshold for [`check_rules`].
pub const CHECK_THRESHOLD: f32 = 0.15;
/// Candidate pool size for [`check_rules`].
pub const CHECK_TOP_K: usize = 10;
/// Candidate pool size for [`find_similar_rules`].
pub const SIMILAR_TOP_K: usize = 5;

/// Aggregated guidance produced by matching one or more rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGuidance {
    /// Ids of the rules that matched, highest priority first.
    pub matched_rule_ids: Vec<RuleId>,
    /// Deduplicated, order-preserving union of `must_do` across matches.
    pub must_do: Vec<String>,
    /// Deduplicated, order-preserving union of `must_not` across matches.
    pub must_not: Vec<String>,
    /// Deduplicated, order-preserving union of `ask_first` across matches.
    pub ask_first: Vec<String>,
    /// Deduplicated, order-preserving union of `warnings` across matches.
    pub warnings: Vec<String>,
    /// `true` if any `must_not` or `warnings` entries are present.
    pub has_blockers: bool,
    /// Human-facing summary message.
    pub message: String,
}

fn dedup_preserve_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

fn guidance_message(has_blockers: bool, ask_first: &[String], must_do: &[String]) -> String {
    if has_blockers {
        "STOP: Review warnings and must-not items before proceeding".to_string()
    } else if !ask_first.is_empty() {
        "Consider these questions before proceeding".to_string()
    } else if !must_do.is_empty() {
        "Rules matched - follow the must_do checklist".to_string()
    } else {
        "Rules matched but no specific guidance".to_string()
    }
}

/// Rebuilds a TF-IDF index over every enabled rule's `trigger_keywords`.
///
/// # Errors
///
/// Returns `Error::Store` on a read failure.
pub fn build_index(store: &Store) -> Result<TfIdfIndex> {
    let mut index = TfIdfIndex::new();
    for rule in store.list_enabled_rules()? {
        index.add_document(rule.id, &rule.trigger_keywords, &[]);
    }
    Ok(index)
}

/// Inserts a new rule, tokenizing `trigger` for the derived keyword
/// column. Invalidates the rules cache.
///
/// # Errors
///
/// Returns `Error::Validation` if `trigger` is empty, otherwise
/// `Error::Store` on a write failure.
#[allow(clippy::too_many_arguments)]
pub fn add_rule(
    store: &Store,
    trigger: &str,
    must_do: Vec<String>,
    must_not: Vec<String>,
    ask_first: Vec<String>,
    warnings: Vec<String>,
    priority: i32,
) -> Result<Rule> {
    if trigger.trim().is_empty() {
        return Err(Error::Validation("rule trigger must not be empty".to_string()));
    }
    let rule = store.insert_rule(&NewRule {
        trigger: trigger.to_string(),
        trigger_keywords: tokenize_to_string(trigger, &[]),
        must_do,
        must_not,
        ask_first,
        warnings,
        priority,
    })?;
    crate::cache::clear_all_caches();
    Ok(rule)
}

/// Checks `action_text` against the rules index, returning aggregated
/// guidance. Cached on `(action_text, threshold)`.
///
/// # Errors
///
/// Returns `Error::Store` on a read failure.
pub fn check_rules(store: &Store, action_text: &str, threshold: f32) -> Result<RuleGuidance> {
    let cache_key = make_cache_key(&[("action_text", json!(action_text)), ("threshold", json!(threshold))]);
    if let Some(cached) = RULES_CACHE.get(&cache_key) {
        if let Ok(guidance) = serde_json::from_value::<RuleGuidance>(cached) {
            return Ok(guidance);
        }
    }

    let index = build_index(store)?;
    let hits = index.search(action_text, CHECK_TOP_K, threshold);

    let mut rules: Vec<Rule> = Vec::new();
    for (id, _score) in hits {
        if let Some(rule) = store.get_rule(id)? {
            rules.push(rule);
        }
    }
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));

    let matched_rule_ids = rules.iter().map(|r| r.id).collect();
    let must_do = dedup_preserve_order(rules.iter().flat_map(|r| r.must_do.iter().cloned()));
    let must_not = dedup_preserve_order(rules.iter().flat_map(|r| r.must_not.iter().cloned()));
    let ask_first = dedup_preserve_order(rules.iter().flat_map(|r| r.ask_first.iter().cloned()));
    let warnings = dedup_preserve_order(rules.iter().flat_map(|r| r.warnings.iter().cloned()));
    let has_blockers = !must_not.is_empty() || !warnings.is_empty();
    let message = guidance_message(has_blockers, &ask_first, &must_do);

    let guidance = RuleGuidance { matched_rule_ids, must_do, must_not, ask_first, warnings, has_blockers, message };
    if let Ok(value) = serde_json::to_value(&guidance) {
        RULES_CACHE.set(cache_key, value);
    }
    Ok(guidance)
}

/// Updates a rule's enabled flag, invalidating the rules cache (disabling
/// a rule changes the index).
///
/// # Errors
///
/// Returns `Error::Store` on a write failure.
pub fn set_rule_enabled(store: &Store, id: RuleId, enabled: bool) -> Result<()> {
    store.set_rule_enabled(id, enabled)?;
    crate::cache::clear_all_caches();
    Ok(())
}

/// Deletes a rule, invalidating the rules cache.
///
/// # Errors
///
/// Returns `Error::Store` on a write failure.
pub fn delete_rule(store: &Store, id: RuleId) -> Result<()> {
    store.delete_rule(id)?;
    crate::cache::clear_all_caches();
    Ok(())
}

/// Appends a non-blocking caution to an existing rule, invalidating the
/// rules cache.
///
/// # Errors
///
/// Returns `Error::NotFound` if the rule does not exist, otherwise
/// `Error::Store` on a write failure.
pub fn add_warning_to_rule(store: &Store, id: RuleId, warning: &str) -> Result<Rule> {
    let rule = store.add_warning_to_rule(id, warning)?;
    crate::cache::clear_all_caches();
    Ok(rule)
}

/// Finds up to [`SIMILAR_TOP_K`] rules whose trigger text resembles
/// `trigger`, for duplicate avoidance before adding a new rule.
///
/// # Errors
///
/// Returns `Error::Store` on a read failure.
pub fn find_similar_rules(store: &Store, trigger: &str) -> Result<Vec<(Rule, f32)>> {
    let index = build_index(store)?;
    let hits = index.search(trigger, SIMILAR_TOP_K, CHECK_THRESHOLD);
    let mut results = Vec::new();
    for (id, score) in hits {
        if let Some(rule) = store.get_rule(id)? {
            results.push((rule, score));
        }
    }
    Ok(results)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn blocking_rule(store: &Store) -> Rule {
        add_rule(
            store,
            "touching authentication code",
            vec!["write a test".to_string()],
            vec!["do not log secrets".to_string()],
            vec![],
            vec![],
            10,
        )
        .unwrap()
    }

    #[test]
    fn check_rules_reports_blockers() {
        let store = Store::open_in_memory().unwrap();
        blocking_rule(&store);
        let guidance = check_rules(&store, "I am touching authentication code", CHECK_THRESHOLD).unwrap();
        assert!(guidance.has_blockers);
        assert!(guidance.message.starts_with("STOP"));
    }

    #[test]
    fn check_rules_dedupes_across_matches() {
        let store = Store::open_in_memory().unwrap();
        add_rule(&store, "touching authentication", vec!["write a test".to_string()], vec![], vec![], vec![], 5)
            .unwrap();
        add_rule(&store, "touching auth module", vec!["write a test".to_string()], vec![], vec![], vec![], 1)
            .unwrap();
        let guidance = check_rules(&store, "touching authentication module", CHECK_THRESHOLD).unwrap();
        assert_eq!(guidance.must_do, vec!["write a test".to_string()]);
    }

    #[test]
    fn disabling_a_rule_removes_it_from_checks() {
        let store = Store::open_in_memory().unwrap();
        let rule = blocking_rule(&store);
        set_rule_enabled(&store, rule.id, false).unwrap();
        let guidance = check_rules(&store, "I am touching authentication code", CHECK_THRESHOLD).unwrap();
        assert!(guidance.matched_rule_ids.is_empty());
    }

    #[test]
    fn add_rule_rejects_empty_trigger() {
        let store = Store::open_in_memory().unwrap();
        assert!(add_rule(&store, "  ", vec![], vec![], vec![], vec![], 0).is_err());
    }
}
