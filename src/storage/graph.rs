//! CRUD for `memory_relationships`.

use super::memories::{archive_memory_tx, insert_memory_tx, NewMemory};
use super::{map_store_err, Store};
use crate::models::{Memory, MemoryId, MemoryRelationship, RelationshipType};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

fn row_to_relationship(row: &Row<'_>) -> rusqlite::Result<MemoryRelationship> {
    let relationship_str: String = row.get("relationship")?;
    let created_at: String = row.get("created_at")?;
    Ok(MemoryRelationship {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        relationship: relationship_str.parse().unwrap_or(RelationshipType::RelatedTo),
        description: row.get("description")?,
        confidence: row.get("confidence")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Inserts a directed edge using an already-open connection, for
/// composition inside a larger [`Store::transaction`] (e.g. compaction's
/// per-candidate supersede edge).
///
/// # Errors
///
/// Returns `Error::Validation` for a self-loop, otherwise `Error::Store` on
/// a write failure.
pub(crate) fn insert_relationship_tx(
    conn: &Connection,
    source_id: MemoryId,
    target_id: MemoryId,
    relationship: RelationshipType,
    description: Option<&str>,
    confidence: f32,
) -> Result<MemoryRelationship> {
    MemoryRelationship::validate_no_self_loop(source_id, target_id)?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO memory_relationships (source_id, target_id, relationship, description, confidence, created_at)
         VALUES (?1,?2,?3,?4,?5,?6)
         ON CONFLICT(source_id, target_id, relationship) DO UPDATE SET description = excluded.description",
        params![source_id, target_id, relationship.as_str(), description, confidence, now],
    )
    .map_err(map_store_err("insert_relationship"))?;
    conn.query_row(
        "SELECT * FROM memory_relationships WHERE source_id = ?1 AND target_id = ?2 AND relationship = ?3",
        params![source_id, target_id, relationship.as_str()],
        row_to_relationship,
    )
    .map_err(map_store_err("insert_relationship"))
}

impl Store {
    /// Inserts a directed edge. Rejects self-loops; is a no-op (returns the
    /// existing row) when the exact `(source, target, relationship)` triple
    /// already exists, matching the table's `UNIQUE` constraint.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a self-loop, otherwise `Error::Store`
    /// on a write failure.
    pub fn insert_relationship(
        &self,
        source_id: MemoryId,
        target_id: MemoryId,
        relationship: RelationshipType,
        description: Option<&str>,
        confidence: f32,
    ) -> Result<MemoryRelationship> {
        self.transaction(|conn| insert_relationship_tx(conn, source_id, target_id, relationship, description, confidence))
    }

    /// Atomically creates `summary` as a new memory, links each of
    /// `candidate_ids` to it via a `Supersedes` edge, and archives each
    /// candidate. All of it commits or rolls back as a single unit, so a
    /// failure partway through (e.g. archiving the third candidate) never
    /// leaves the summary or any edge durably committed without the rest.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure; nothing is committed.
    pub fn compact_tx(&self, summary: &NewMemory, candidate_ids: &[MemoryId]) -> Result<Memory> {
        self.transaction(|conn| {
            let summary_memory = insert_memory_tx(conn, summary)?;
            for &candidate_id in candidate_ids {
                insert_relationship_tx(
                    conn,
                    summary_memory.id,
                    candidate_id,
                    RelationshipType::Supersedes,
                    None,
                    1.0,
                )?;
                archive_memory_tx(conn, candidate_id)?;
            }
            Ok(summary_memory)
        })
    }

    /// Removes an edge by its natural key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn delete_relationship(
        &self,
        source_id: MemoryId,
        target_id: MemoryId,
        relationship: RelationshipType,
    ) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute(
            "DELETE FROM memory_relationships WHERE source_id = ?1 AND target_id = ?2 AND relationship = ?3",
            params![source_id, target_id, relationship.as_str()],
        )
        .map_err(map_store_err("delete_relationship"))?;
        Ok(())
    }

    /// Outgoing edges from `id`, for forward graph traversal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn outgoing_relationships(&self, id: MemoryId) -> Result<Vec<MemoryRelationship>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare("SELECT * FROM memory_relationships WHERE source_id = ?1")
            .map_err(map_store_err("outgoing_relationships"))?;
        let rows = stmt
            .query_map([id], row_to_relationship)
            .map_err(map_store_err("outgoing_relationships"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("outgoing_relationships"))
    }

    /// Incoming edges into `id`, for reverse graph traversal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn incoming_relationships(&self, id: MemoryId) -> Result<Vec<MemoryRelationship>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare("SELECT * FROM memory_relationships WHERE target_id = ?1")
            .map_err(map_store_err("incoming_relationships"))?;
        let rows = stmt
            .query_map([id], row_to_relationship)
            .map_err(map_store_err("incoming_relationships"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("incoming_relationships"))
    }

    /// All relationships touching any memory in `ids`, used to build a
    /// bounded subgraph for export.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn relationships_among(&self, ids: &[MemoryId]) -> Result<Vec<MemoryRelationship>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT * FROM memory_relationships WHERE source_id IN ({placeholders}) AND target_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_store_err("relationships_among"))?;
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().chain(ids.iter()).map(|i| i as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(params.as_slice(), row_to_relationship)
            .map_err(map_store_err("relationships_among"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("relationships_among"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::memories::NewMemory;
    use crate::models::Category;
    use serde_json::Value as Json;

    fn new_memory(store: &Store, content: &str) -> MemoryId {
        store
            .insert_memory(&NewMemory {
                category: Category::Decision,
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
            .id
    }

    #[test]
    fn rejects_self_loops() {
        let store = Store::open_in_memory().unwrap();
        let a = new_memory(&store, "a");
        assert!(store.insert_relationship(a, a, RelationshipType::RelatedTo, None, 1.0).is_err());
    }

    #[test]
    fn traverses_outgoing_and_incoming() {
        let store = Store::open_in_memory().unwrap();
        let a = new_memory(&store, "a");
        let b = new_memory(&store, "b");
        store.insert_relationship(a, b, RelationshipType::LedTo, None, 1.0).unwrap();
        assert_eq!(store.outgoing_relationships(a).unwrap().len(), 1);
        assert_eq!(store.incoming_relationships(b).unwrap().len(), 1);
        assert!(store.outgoing_relationships(b).unwrap().is_empty());
    }

    #[test]
    fn deletes_cascade_when_memory_deleted() {
        let store = Store::open_in_memory().unwrap();
        let a = new_memory(&store, "a");
        let b = new_memory(&store, "b");
        store.insert_relationship(a, b, RelationshipType::DependsOn, None, 1.0).unwrap();
        store.delete_memory(a).unwrap();
        assert!(store.incoming_relationships(b).unwrap().is_empty());
    }

    #[test]
    fn compact_tx_commits_summary_edges_and_archives_together() {
        let store = Store::open_in_memory().unwrap();
        let a = new_memory(&store, "a");
        let b = new_memory(&store, "b");
        let summary = NewMemory {
            category: Category::Learning,
            content: "summary".to_string(),
            rationale: None,
            context: Json::Null,
            tags: vec![],
            file_path: None,
            file_path_relative: None,
            keywords: "summary".to_string(),
            is_permanent: false,
            vector_embedding: None,
        };
        let summary_memory = store.compact_tx(&summary, &[a, b]).unwrap();
        assert!(store.get_memory(a).unwrap().unwrap().archived);
        assert!(store.get_memory(b).unwrap().unwrap().archived);
        assert_eq!(store.outgoing_relationships(summary_memory.id).unwrap().len(), 2);
    }

    #[test]
    fn compact_tx_rolls_back_the_summary_when_a_candidate_is_invalid() {
        let store = Store::open_in_memory().unwrap();
        let a = new_memory(&store, "a");
        let bogus_id: MemoryId = a + 999;
        let summary = NewMemory {
            category: Category::Learning,
            content: "summary".to_string(),
            rationale: None,
            context: Json::Null,
            tags: vec![],
            file_path: None,
            file_path_relative: None,
            keywords: "summary".to_string(),
            is_permanent: false,
            vector_embedding: None,
        };
        let before = store.list_all_memories().unwrap().len();
        assert!(store.compact_tx(&summary, &[a, bogus_id]).is_err());
        assert_eq!(store.list_all_memories().unwrap().len(), before);
        assert!(!store.get_memory(a).unwrap().unwrap().archived);
    }
}
