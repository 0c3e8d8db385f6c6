//! Memory graph (component H): typed directed edges between memories,
//! chain tracing, subgraph materialization, and atomic compaction.

use crate::models::{Memory, MemoryId, MemoryRelationship, RelationshipType};
use crate::storage::Store;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Outcome of [`link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// A new edge was created.
    Linked,
    /// The exact `(source, target, relationship)` edge already existed.
    AlreadyExists,
}

/// Creates a directed edge `source --relationship--> target`.
///
/// # Errors
///
/// Returns `Error::Validation` for a self-loop, `Error::NotFound` if either
/// endpoint does not exist, otherwise `Error::Store` on a write failure.
pub fn link(
    store: &Store,
    source_id: MemoryId,
    target_id: MemoryId,
    relationship: RelationshipType,
    description: Option<&str>,
    confidence: f32,
) -> Result<LinkStatus> {
    if store.get_memory(source_id)?.is_none() {
        return Err(Error::NotFound { kind: "memory", id: source_id.to_string() });
    }
    if store.get_memory(target_id)?.is_none() {
        return Err(Error::NotFound { kind: "memory", id: target_id.to_string() });
    }
    let already_exists = store
        .outgoing_relationships(source_id)?
        .iter()
        .any(|r| r.target_id == target_id && r.relationship == relationship);
    store.insert_relationship(source_id, target_id, relationship, description, confidence)?;
    Ok(if already_exists { LinkStatus::AlreadyExists } else { LinkStatus::Linked })
}

/// Outcome of [`unlink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkStatus {
    /// The edge existed and was removed.
    Unlinked,
    /// No such edge existed.
    NotFound,
}

/// Removes an edge by its natural key.
///
/// # Errors
///
/// Returns `Error::Store` on a write failure.
pub fn unlink(
    store: &Store,
    source_id: MemoryId,
    target_id: MemoryId,
    relationship: RelationshipType,
) -> Result<UnlinkStatus> {
    let existed = store
        .outgoing_relationships(source_id)?
        .iter()
        .any(|r| r.target_id == target_id && r.relationship == relationship);
    store.delete_relationship(source_id, target_id, relationship)?;
    Ok(if existed { UnlinkStatus::Unlinked } else { UnlinkStatus::NotFound })
}

/// Which edges a chain trace follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow outgoing edges (`source == id`).
    Forward,
    /// Follow incoming edges (`target == id`).
    Backward,
    /// Follow both.
    Both,
}

/// A memory reached during a chain trace.
#[derive(Debug, Clone)]
pub struct TracedNode {
    /// The memory id reached.
    pub memory_id: MemoryId,
    /// Hops from the seed.
    pub depth: u32,
    /// The relationship of the edge that reached this node (`None` for the
    /// seed itself).
    pub via_relationship: Option<RelationshipType>,
}

/// Breadth-first traversal from `seed_id`, up to `max_depth` hops, using
/// `direction` and optionally restricted to `relationship_types`.
///
/// # Errors
///
/// Returns `Error::Store` on a query failure.
pub fn trace_chain(
    store: &Store,
    seed_id: MemoryId,
    direction: Direction,
    relationship_types: Option<&[RelationshipType]>,
    max_depth: u32,
) -> Result<Vec<TracedNode>> {
    let mut visited: HashSet<MemoryId> = HashSet::new();
    visited.insert(seed_id);
    let mut queue: VecDeque<(MemoryId, u32)> = VecDeque::new();
    queue.push_back((seed_id, 0));
    let mut results = vec![TracedNode { memory_id: seed_id, depth: 0, via_relationship: None }];

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let mut edges = Vec::new();
        match direction {
            Direction::Forward => edges.extend(store.outgoing_relationships(current)?),
            Direction::Backward => edges.extend(store.incoming_relationships(current)?),
            Direction::Both => {
                edges.extend(store.outgoing_relationships(current)?);
                edges.extend(store.incoming_relationships(current)?);
            }
        }
        for edge in edges {
            if let Some(types) = relationship_types {
                if !types.contains(&edge.relationship) {
                    continue;
                }
            }
            let next = if edge.source_id == current { edge.target_id } else { edge.source_id };
            if visited.insert(next) {
                results.push(TracedNode { memory_id: next, depth: depth + 1, via_relationship: Some(edge.relationship) });
                queue.push_back((next, depth + 1));
            }
        }
    }
    Ok(results)
}

/// A materialized subgraph: hydrated nodes plus the edges among them.
#[derive(Debug, Clone)]
pub struct Subgraph {
    /// Hydrated memory rows.
    pub nodes: Vec<Memory>,
    /// Edges with both endpoints in `nodes`.
    pub edges: Vec<MemoryRelationship>,
}

/// Builds the subgraph induced by an explicit set of memory ids.
///
/// # Errors
///
/// Returns `Error::Store` on a query failure.
pub fn get_graph(store: &Store, memory_ids: &[MemoryId]) -> Result<Subgraph> {
    let mut nodes = Vec::new();
    for id in memory_ids {
        if let Some(memory) = store.get_memory(*id)? {
            nodes.push(memory);
        }
    }
    let edges = store.relationships_among(memory_ids)?;
    Ok(Subgraph { nodes, edges })
}

/// Expands a seed set one hop outward (union of outgoing and incoming
/// neighbors) before materializing, used when `get_graph` is seeded by a
/// topic rather than an explicit id set.
///
/// # Errors
///
/// Returns `Error::Store` on a query failure.
pub fn get_graph_expanded(store: &Store, seed_ids: &[MemoryId]) -> Result<Subgraph> {
    let mut ids: HashSet<MemoryId> = seed_ids.iter().copied().collect();
    for id in seed_ids {
        for edge in store.outgoing_relationships(*id)? {
            ids.insert(edge.target_id);
        }
        for edge in store.incoming_relationships(*id)? {
            ids.insert(edge.source_id);
        }
    }
    let ids: Vec<MemoryId> = ids.into_iter().collect();
    get_graph(store, &ids)
}

/// Renders a subgraph as a Mermaid flowchart: one line per node, one arrow
/// per edge, labeled with the relationship.
#[must_use]
pub fn to_mermaid(subgraph: &Subgraph) -> String {
    let mut out = String::from("graph TD\n");
    for node in &subgraph.nodes {
        let label = Memory::condensed_content(&node.content, 40).replace('"', "'");
        out.push_str(&format!("  {}[\"{}: {}\"]\n", node.id, node.id, label));
    }
    for edge in &subgraph.edges {
        out.push_str(&format!("  {} -->|{}| {}\n", edge.source_id, edge.relationship.as_str(), edge.target_id));
    }
    out
}

/// Outcome of a dry-run [`compact`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionPreview {
    /// Always `"dry_run"`.
    pub status: &'static str,
    /// Number of candidates that would be compacted.
    pub would_compact: usize,
    /// The candidate ids.
    pub candidate_ids: Vec<MemoryId>,
}

/// Outcome of a real [`compact`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionResult {
    /// Always `"compacted"`.
    pub status: &'static str,
    /// The id of the newly created summary memory.
    pub summary_id: MemoryId,
    /// Number of candidates archived.
    pub compacted_count: usize,
    /// The archived candidate ids.
    pub archived_ids: Vec<MemoryId>,
}

/// Minimum accepted summary length for compaction, in characters.
pub const MIN_SUMMARY_LENGTH: usize = 50;

/// Either a preview (`dry_run`) or a committed result.
#[derive(Debug, Clone)]
pub enum CompactionOutcome {
    /// `dry_run` was set.
    Preview(CompactionPreview),
    /// The compaction was committed.
    Committed(CompactionResult),
}

/// Atomically supersedes `candidate_ids` (or, if empty, up to `limit`
/// non-archived non-pinned memories matching `topic_filter`) by a new
/// `learning` memory containing `summary`.
///
/// # Errors
///
/// Returns `Error::Validation` if `summary` is shorter than
/// [`MIN_SUMMARY_LENGTH`], otherwise `Error::Store` on a write failure. The
/// summary insert, every supersede edge, and every archive flip happen
/// inside one [`Store::compact_tx`] transaction, so a failure partway
/// through leaves none of it committed.
pub fn compact(
    store: &Store,
    summary: &str,
    candidates: &[Memory],
    dry_run: bool,
) -> Result<CompactionOutcome> {
    if summary.len() < MIN_SUMMARY_LENGTH {
        return Err(Error::Validation(format!(
            "compaction summary must be at least {MIN_SUMMARY_LENGTH} characters"
        )));
    }
    let candidate_ids: Vec<MemoryId> = candidates.iter().map(|m| m.id).collect();
    if dry_run {
        return Ok(CompactionOutcome::Preview(CompactionPreview {
            status: "dry_run",
            would_compact: candidate_ids.len(),
            candidate_ids,
        }));
    }

    let summary_memory = store.compact_tx(
        &crate::storage::memories::NewMemory {
            category: crate::models::Category::Learning,
            content: summary.to_string(),
            rationale: None,
            context: serde_json::Value::Null,
            tags: vec![],
            file_path: None,
            file_path_relative: None,
            keywords: crate::text::tokenize_to_string(summary, &[]),
            is_permanent: false,
            vector_embedding: None,
        },
        &candidate_ids,
    )?;

    Ok(CompactionOutcome::Committed(CompactionResult {
        status: "compacted",
        summary_id: summary_memory.id,
        compacted_count: candidate_ids.len(),
        archived_ids: candidate_ids,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::Category;
    use crate::storage::memories::NewMemory;
    use serde_json::Value as Json;

    fn new_memory(store: &Store, content: &str) -> Memory {
        store
            .insert_memory(&NewMemory {
                category: Category::Learning,
                content: content.to_string(),
                rationale: None,
                context: Json::Null,
                tags: vec![],
                file_path: None,
                file_path_relative: None,
                keywords: content.to_lowercase(),
                is_permanent: false,
                vector_embedding: None,
            })
            .unwrap()
    }

    #[test]
    fn link_rejects_self_loop() {
        let store = Store::open_in_memory().unwrap();
        let a = new_memory(&store, "a");
        assert!(link(&store, a.id, a.id, RelationshipType::RelatedTo, None, 1.0).is_err());
    }

    #[test]
    fn link_reports_already_exists() {
        let store = Store::open_in_memory().unwrap();
        let a = new_memory(&store, "a");
        let b = new_memory(&store, "b");
        assert_eq!(link(&store, a.id, b.id, RelationshipType::LedTo, None, 1.0).unwrap(), LinkStatus::Linked);
        assert_eq!(
            link(&store, a.id, b.id, RelationshipType::LedTo, None, 1.0).unwrap(),
            LinkStatus::AlreadyExists
        );
    }

    #[test]
    fn trace_chain_respects_max_depth() {
        let store = Store::open_in_memory().unwrap();
        let a = new_memory(&store, "a");
        let b = new_memory(&store, "b");
        let c = new_memory(&store, "c");
        link(&store, a.id, b.id, RelationshipType::LedTo, None, 1.0).unwrap();
        link(&store, b.id, c.id, RelationshipType::LedTo, None, 1.0).unwrap();
        let nodes = trace_chain(&store, a.id, Direction::Forward, None, 1).unwrap();
        assert_eq!(nodes.len(), 2);
        let nodes = trace_chain(&store, a.id, Direction::Forward, None, 5).unwrap();
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn compact_rejects_short_summary() {
        let store = Store::open_in_memory().unwrap();
        assert!(compact(&store, "too short", &[], false).is_err());
    }

    #[test]
    fn compact_is_atomic_and_supersedes_candidates() {
        let store = Store::open_in_memory().unwrap();
        let candidates: Vec<Memory> =
            (0..5).map(|i| new_memory(&store, &format!("Session {i}: API patterns {i}"))).collect();
        let outcome = compact(
            &store,
            "Summary of API patterns across 5 sessions (long enough)",
            &candidates,
            false,
        )
        .unwrap();
        let CompactionOutcome::Committed(result) = outcome else {
            unreachable!("dry_run was false, must commit");
        };
        assert_eq!(result.compacted_count, 5);
        for candidate in &candidates {
            assert!(store.get_memory(candidate.id).unwrap().unwrap().archived);
        }
        let trace = trace_chain(&store, result.summary_id, Direction::Forward, Some(&[RelationshipType::Supersedes]), 1)
            .unwrap();
        assert_eq!(trace.len(), 6);
    }

    #[test]
    fn compact_dry_run_does_not_mutate() {
        let store = Store::open_in_memory().unwrap();
        let candidate = new_memory(&store, "candidate");
        let outcome = compact(
            &store,
            "Summary of API patterns across 5 sessions (long enough)",
            std::slice::from_ref(&candidate),
            true,
        )
        .unwrap();
        let CompactionOutcome::Preview(preview) = outcome else {
            unreachable!("dry_run was true, must preview");
        };
        assert_eq!(preview.would_compact, 1);
        assert!(!store.get_memory(candidate.id).unwrap().unwrap().archived);
    }
}
