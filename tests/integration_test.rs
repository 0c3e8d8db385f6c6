//! Integration tests for codemem.
#![allow(clippy::unwrap_used)]

use chrono::Utc;
use codemem::memory::{RecallQuery, RememberInput};
use codemem::models::GLOBAL_PROJECT_PATH;
use codemem::protocol::{ProtocolEnforcer, ViolationKind};
use codemem::registry::ProjectRegistry;
use codemem::{Category, EngineConfig, Error, MemoryManager};
use serde_json::Value as Json;
use tempfile::tempdir;

fn decision_input(content: &str) -> RememberInput {
    RememberInput {
        category: Category::Decision,
        content: content.to_string(),
        rationale: None,
        context: Json::Null,
        tags: vec![],
        file_path: None,
        file_path_relative: None,
        is_permanent_override: None,
    }
}

#[test]
fn full_protocol_happy_path() {
    let store = codemem::storage::Store::open_in_memory().unwrap();
    let enforcer = ProtocolEnforcer::new("secret".to_string());
    let mgr = MemoryManager::open_in_memory("/p", EngineConfig::default(), None).unwrap();
    let now = Utc::now();

    enforcer.get_briefing(&store, "/p", now).unwrap();
    let token = enforcer
        .context_check(&store, "/p", "about to record a decision", "remember", now)
        .unwrap();
    assert!(!token.payload.is_empty());
    enforcer.verify(&token, now).unwrap();

    let outcome = mgr.remember(decision_input("Use JSON Web Tokens")).unwrap();
    assert!(outcome.memory.id > 0);
    assert_eq!(outcome.scope.as_str(), "local");

    let versions = mgr.store().list_versions(outcome.memory.id).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version_number, 1);
}

#[test]
fn init_required_blocks_mutating_tools() {
    let store = codemem::storage::Store::open_in_memory().unwrap();
    let enforcer = ProtocolEnforcer::new("secret".to_string());
    let now = Utc::now();

    let err = enforcer.check_counsel(&store, "/p", "record a decision", 300, now).unwrap_err();
    let Error::Protocol(violation) = err else {
        unreachable!("expected a protocol violation");
    };
    assert_eq!(violation.kind, ViolationKind::InitRequired);
    assert_eq!(violation.remedy_tool, "get_briefing");
    assert!(store.get_session(&codemem::protocol::session_id_for("/p", now)).unwrap().is_none());
}

#[test]
fn context_check_required_then_succeeds_after_check() {
    let store = codemem::storage::Store::open_in_memory().unwrap();
    let enforcer = ProtocolEnforcer::new("secret".to_string());
    let now = Utc::now();

    enforcer.get_briefing(&store, "/p", now).unwrap();
    let err = enforcer.check_counsel(&store, "/p", "record a decision", 300, now).unwrap_err();
    let Error::Protocol(violation) = err else {
        unreachable!("expected a protocol violation");
    };
    assert_eq!(violation.kind, ViolationKind::ContextCheckRequired);

    enforcer.context_check(&store, "/p", "about to record a decision", "remember", now).unwrap();
    assert!(enforcer.check_counsel(&store, "/p", "record a decision", 300, now).is_ok());
}

#[test]
fn compaction_is_atomic_and_trace_chain_recovers_the_originals() {
    let mgr = MemoryManager::open_in_memory("/p", EngineConfig::default(), None).unwrap();
    let mut candidate_ids = Vec::new();
    for i in 1..=5 {
        let mut input = decision_input(&format!("Session {i}: API patterns across services"));
        input.category = Category::Learning;
        let outcome = mgr.remember(input).unwrap();
        candidate_ids.push(outcome.memory.id);
    }

    let outcome = mgr
        .compact(
            "Summary of API patterns across 5 sessions (long enough to pass the minimum)",
            &[],
            None,
            10,
            false,
        )
        .unwrap();
    let codemem::graph::CompactionOutcome::Committed(result) = outcome else {
        unreachable!("dry_run was false");
    };
    assert_eq!(result.compacted_count, 5);
    assert_eq!(result.archived_ids.len(), 5);

    let recalled = mgr
        .recall(&RecallQuery {
            topic: "API patterns".to_string(),
            categories: vec![],
            limit: 10,
            file_path: None,
            tags: vec![],
            condensed: false,
        })
        .unwrap();
    let recalled_ids: Vec<_> = recalled
        .decisions
        .iter()
        .chain(&recalled.patterns)
        .chain(&recalled.warnings)
        .chain(&recalled.learnings)
        .map(|m| m.id)
        .collect();
    assert!(recalled_ids.contains(&result.summary_id));
    for original in &candidate_ids {
        assert!(!recalled_ids.contains(original));
    }

    let chain = codemem::graph::trace_chain(
        mgr.store(),
        result.summary_id,
        codemem::graph::Direction::Forward,
        Some(&[codemem::models::RelationshipType::Supersedes]),
        1,
    )
    .unwrap();
    let reached: std::collections::HashSet<_> = chain.iter().map(|n| n.memory_id).collect();
    for original in &candidate_ids {
        assert!(reached.contains(original));
    }
}

#[test]
fn pinning_bypasses_decay_and_archiving_hides_from_recall() {
    let mgr = MemoryManager::open_in_memory("/p", EngineConfig::default(), None).unwrap();
    let mut input = decision_input("Retry transient network errors with exponential backoff");
    input.category = Category::Learning;
    let outcome = mgr.remember(input).unwrap();
    let id = outcome.memory.id;

    mgr.store().set_pinned(id, true).unwrap();
    let pinned = mgr.store().get_memory(id).unwrap().unwrap();
    assert!((pinned.decay_floor(0.3) - 1.0).abs() < 1e-6);

    mgr.store().set_pinned(id, false).unwrap();
    let unpinned = mgr.store().get_memory(id).unwrap().unwrap();
    assert!((unpinned.decay_floor(0.3) - 0.3).abs() < 1e-6);

    mgr.store().archive_memory(id).unwrap();
    let recalled = mgr
        .recall(&RecallQuery {
            topic: "exponential backoff".to_string(),
            categories: vec![],
            limit: 10,
            file_path: None,
            tags: vec![],
            condensed: false,
        })
        .unwrap();
    let recalled_ids: Vec<_> = recalled
        .decisions
        .iter()
        .chain(&recalled.patterns)
        .chain(&recalled.warnings)
        .chain(&recalled.learnings)
        .map(|m| m.id)
        .collect();
    assert!(!recalled_ids.contains(&id));
}

#[test]
fn global_classified_memories_land_in_both_stores_local_ones_stay_local() {
    let dir = tempdir().unwrap();
    let global_dir = tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.global.enabled = true;
    config.global.path = Some(global_dir.path().to_path_buf());
    config.global.write_enabled = true;

    let registry = ProjectRegistry::new(config, None).unwrap();
    let project_path = dir.path().to_string_lossy().to_string();
    let handle = registry.acquire(&project_path).unwrap();

    let global_input = RememberInput {
        category: Category::Pattern,
        content: "Always validate user input to prevent XSS".to_string(),
        rationale: None,
        context: Json::Null,
        tags: vec!["security".to_string(), "best-practice".to_string()],
        file_path: None,
        file_path_relative: None,
        is_permanent_override: None,
    };
    let outcome = handle.memory.remember(global_input).unwrap();
    assert_eq!(outcome.scope.as_str(), "global");

    let global_mgr = MemoryManager::open(global_dir.path(), GLOBAL_PROJECT_PATH, EngineConfig::default(), None)
        .unwrap();
    let found_in_global = global_mgr
        .recall(&RecallQuery {
            topic: "validate user input XSS".to_string(),
            categories: vec![],
            limit: 10,
            file_path: None,
            tags: vec![],
            condensed: false,
        })
        .unwrap();
    assert!(found_in_global.found > 0);

    let local_input = RememberInput {
        category: Category::Pattern,
        content: "Always validate user input to prevent XSS".to_string(),
        rationale: None,
        context: Json::Null,
        tags: vec![],
        file_path: Some(format!("{project_path}/src/api.py")),
        file_path_relative: Some("src/api.py".to_string()),
        is_permanent_override: None,
    };
    let local_outcome = handle.memory.remember(local_input).unwrap();
    assert_eq!(local_outcome.scope.as_str(), "local");
}
