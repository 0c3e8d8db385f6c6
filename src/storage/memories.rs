//! CRUD for `Memory` and `MemoryVersion` rows.

use super::{map_store_err, Store};
use crate::models::{ChangeType, Memory, MemoryId, MemoryVersion, Worked};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value as Json;

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let category_str: String = row.get("category")?;
    let context_str: String = row.get("context")?;
    let tags_str: String = row.get("tags")?;
    let embedding_blob: Option<Vec<u8>> = row.get("vector_embedding")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let worked: Option<i64> = row.get("worked")?;

    Ok(Memory {
        id: row.get("id")?,
        category: category_str.parse().unwrap_or(crate::models::Category::Learning),
        content: row.get("content")?,
        rationale: row.get("rationale")?,
        context: serde_json::from_str(&context_str).unwrap_or(Json::Null),
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        file_path: row.get("file_path")?,
        file_path_relative: row.get("file_path_relative")?,
        keywords: row.get("keywords")?,
        is_permanent: row.get::<_, i64>("is_permanent")? != 0,
        vector_embedding: embedding_blob.map(|b| bytes_to_vector(&b)),
        outcome: row.get("outcome")?,
        worked: Worked::from_db(worked),
        pinned: row.get::<_, i64>("pinned")? != 0,
        archived: row.get::<_, i64>("archived")? != 0,
        recall_count: row.get::<_, i64>("recall_count")? as u64,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn vector_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Fields needed to insert a new memory, pre-validated by the caller
/// (the memory manager).
pub struct NewMemory {
    /// The memory's category.
    pub category: crate::models::Category,
    /// Required content.
    pub content: String,
    /// Optional rationale.
    pub rationale: Option<String>,
    /// Structured context.
    pub context: Json,
    /// Ordered tags.
    pub tags: Vec<String>,
    /// Optional absolute file path.
    pub file_path: Option<String>,
    /// Optional project-relative file path.
    pub file_path_relative: Option<String>,
    /// Precomputed tokenized keywords.
    pub keywords: String,
    /// Whether this memory is exempt from decay.
    pub is_permanent: bool,
    /// Optional 384-dim embedding.
    pub vector_embedding: Option<Vec<f32>>,
}

/// Inserts a new memory row plus its `version_number = 1` `created` version
/// using an already-open connection, for composition inside a larger
/// [`Store::transaction`] (e.g. compaction's summary insert).
///
/// # Errors
///
/// Returns `Error::Store` on a write failure.
pub(crate) fn insert_memory_tx(conn: &Connection, new: &NewMemory) -> Result<Memory> {
    let now = Utc::now();
    let now_str = now.to_rfc3339();
    let context_str = new.context.to_string();
    let tags_str = serde_json::to_string(&new.tags).unwrap_or_else(|_| "[]".to_string());
    let embedding_bytes = new.vector_embedding.as_ref().map(|v| vector_to_bytes(v));

    conn.execute(
        "INSERT INTO memories (
            category, content, rationale, context, tags, file_path,
            file_path_relative, keywords, is_permanent, vector_embedding,
            outcome, worked, pinned, archived, recall_count, created_at, updated_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,NULL,NULL,0,0,0,?11,?11)",
        params![
            new.category.as_str(),
            new.content,
            new.rationale,
            context_str,
            tags_str,
            new.file_path,
            new.file_path_relative,
            new.keywords,
            i64::from(new.is_permanent),
            embedding_bytes,
            now_str,
        ],
    )
    .map_err(map_store_err("insert_memory"))?;

    let id = conn.last_insert_rowid();

    insert_version(
        conn,
        id,
        1,
        &new.content,
        new.rationale.as_deref(),
        &new.context,
        &new.tags,
        None,
        None,
        ChangeType::Created,
        None,
        now,
    )
    .map_err(map_store_err("insert_memory_version"))?;

    get_memory_tx(conn, id)?.ok_or_else(|| Error::Fatal("memory vanished after insert".to_string()))
}

pub(crate) fn get_memory_tx(conn: &Connection, id: MemoryId) -> Result<Option<Memory>> {
    conn.query_row("SELECT * FROM memories WHERE id = ?1", [id], row_to_memory)
        .optional()
        .map_err(map_store_err("get_memory"))
}

/// Marks a memory archived using an already-open connection, for
/// composition inside a larger [`Store::transaction`].
///
/// # Errors
///
/// Returns `Error::Store` on a write failure.
pub(crate) fn archive_memory_tx(conn: &Connection, id: MemoryId) -> Result<()> {
    conn.execute(
        "UPDATE memories SET archived = 1, updated_at = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), id],
    )
    .map_err(map_store_err("archive_memory"))?;
    Ok(())
}

impl Store {
    /// Inserts a new memory row plus its `version_number = 1` `created`
    /// version, in one transaction: either both rows land or neither does.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn insert_memory(&self, new: &NewMemory) -> Result<Memory> {
        self.transaction(|conn| insert_memory_tx(conn, new))
    }

    /// Loads a memory by id, regardless of archived state (archived rows
    /// are invisible to recall but visible to explicit id lookup).
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn get_memory(&self, id: MemoryId) -> Result<Option<Memory>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        get_memory_tx(&conn, id)
    }

    /// Lists all non-archived memories, used to seed the TF-IDF and vector
    /// indices on (re)build.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn list_non_archived_memories(&self) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare("SELECT * FROM memories WHERE archived = 0")
            .map_err(map_store_err("list_non_archived_memories"))?;
        let rows = stmt
            .query_map([], row_to_memory)
            .map_err(map_store_err("list_non_archived_memories"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("list_non_archived_memories"))
    }

    /// Lists every memory (including archived), for conflict detection and
    /// index-rebuild seeding that must consider the full corpus.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn list_all_memories(&self) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn.prepare("SELECT * FROM memories").map_err(map_store_err("list_all_memories"))?;
        let rows = stmt.query_map([], row_to_memory).map_err(map_store_err("list_all_memories"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("list_all_memories"))
    }

    /// Records outcome + worked atomically ("seal"), bumping `updated_at`
    /// and appending an `outcome_recorded` version, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the memory does not exist, otherwise
    /// `Error::Store` on a write failure.
    pub fn seal_outcome(&self, id: MemoryId, outcome: &str, worked: Worked) -> Result<Memory> {
        self.transaction(|conn| {
            let existing = get_memory_tx(conn, id)?.ok_or_else(|| Error::NotFound { kind: "memory", id: id.to_string() })?;
            let now = Utc::now();
            conn.execute(
                "UPDATE memories SET outcome = ?1, worked = ?2, updated_at = ?3 WHERE id = ?4",
                params![outcome, worked.to_db(), now.to_rfc3339(), id],
            )
            .map_err(map_store_err("seal_outcome"))?;

            let next_version = next_version_number(conn, id).map_err(map_store_err("seal_outcome"))?;
            insert_version(
                conn,
                id,
                next_version,
                &existing.content,
                existing.rationale.as_deref(),
                &existing.context,
                &existing.tags,
                Some(outcome),
                worked.to_db(),
                ChangeType::OutcomeRecorded,
                None,
                now,
            )
            .map_err(map_store_err("seal_outcome"))?;

            get_memory_tx(conn, id)?.ok_or_else(|| Error::Fatal("memory vanished after seal".to_string()))
        })
    }

    /// Marks a memory archived (soft delete: invisible to recall, visible
    /// to graph/history/id lookup).
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn archive_memory(&self, id: MemoryId) -> Result<()> {
        self.transaction(|conn| archive_memory_tx(conn, id))
    }

    /// Sets the `pinned` flag.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn set_pinned(&self, id: MemoryId, pinned: bool) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute(
            "UPDATE memories SET pinned = ?1, updated_at = ?2 WHERE id = ?3",
            params![i64::from(pinned), Utc::now().to_rfc3339(), id],
        )
        .map_err(map_store_err("set_pinned"))?;
        Ok(())
    }

    /// Bumps `recall_count` by one. Best-effort: called after a recall
    /// response has been constructed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn bump_recall_count(&self, id: MemoryId) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute("UPDATE memories SET recall_count = recall_count + 1 WHERE id = ?1", [id])
            .map_err(map_store_err("bump_recall_count"))?;
        Ok(())
    }

    /// Deletes a memory; relationships, versions, entity refs, and active
    /// context items cascade via foreign keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn delete_memory(&self, id: MemoryId) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute("DELETE FROM memories WHERE id = ?1", [id]).map_err(map_store_err("delete_memory"))?;
        Ok(())
    }

    /// All versions for a memory, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn list_versions(&self, memory_id: MemoryId) -> Result<Vec<MemoryVersion>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare("SELECT * FROM memory_versions WHERE memory_id = ?1 ORDER BY version_number ASC")
            .map_err(map_store_err("list_versions"))?;
        let rows = stmt
            .query_map([memory_id], row_to_version)
            .map_err(map_store_err("list_versions"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("list_versions"))
    }
}

fn next_version_number(conn: &Connection, memory_id: MemoryId) -> rusqlite::Result<u32> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(version_number) FROM memory_versions WHERE memory_id = ?1",
        [memory_id],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0) as u32 + 1)
}

#[allow(clippy::too_many_arguments)]
fn insert_version(
    conn: &Connection,
    memory_id: MemoryId,
    version_number: u32,
    content: &str,
    rationale: Option<&str>,
    context: &Json,
    tags: &[String],
    outcome: Option<&str>,
    worked: Option<i64>,
    change_type: ChangeType,
    change_description: Option<&str>,
    changed_at: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let change_type_str = match change_type {
        ChangeType::Created => "created",
        ChangeType::ContentUpdated => "content_updated",
        ChangeType::OutcomeRecorded => "outcome_recorded",
        ChangeType::RelationshipChanged => "relationship_changed",
    };
    conn.execute(
        "INSERT INTO memory_versions (
            memory_id, version_number, content, rationale, context, tags,
            outcome, worked, change_type, change_description, changed_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        params![
            memory_id,
            version_number,
            content,
            rationale,
            context.to_string(),
            serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()),
            outcome,
            worked,
            change_type_str,
            change_description,
            changed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<MemoryVersion> {
    let context_str: String = row.get("context")?;
    let tags_str: String = row.get("tags")?;
    let change_type_str: String = row.get("change_type")?;
    let changed_at: String = row.get("changed_at")?;
    Ok(MemoryVersion {
        id: row.get("id")?,
        memory_id: row.get("memory_id")?,
        version_number: row.get::<_, i64>("version_number")? as u32,
        content: row.get("content")?,
        rationale: row.get("rationale")?,
        context: serde_json::from_str(&context_str).unwrap_or(Json::Null),
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        outcome: row.get("outcome")?,
        worked: row.get("worked")?,
        change_type: match change_type_str.as_str() {
            "created" => ChangeType::Created,
            "outcome_recorded" => ChangeType::OutcomeRecorded,
            "relationship_changed" => ChangeType::RelationshipChanged,
            _ => ChangeType::ContentUpdated,
        },
        change_description: row.get("change_description")?,
        changed_at: parse_ts(&changed_at),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn sample() -> NewMemory {
        NewMemory {
            category: Category::Decision,
            content: "Use JSON Web Tokens".to_string(),
            rationale: None,
            context: Json::Null,
            tags: vec![],
            file_path: None,
            file_path_relative: None,
            keywords: "json web tokens".to_string(),
            is_permanent: false,
            vector_embedding: None,
        }
    }

    #[test]
    fn insert_creates_memory_and_first_version() {
        let store = Store::open_in_memory().unwrap();
        let memory = store.insert_memory(&sample()).unwrap();
        assert!(memory.id > 0);
        let versions = store.list_versions(memory.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_number, 1);
        assert_eq!(versions[0].change_type, ChangeType::Created);
    }

    #[test]
    fn seal_outcome_appends_version_and_updates_row() {
        let store = Store::open_in_memory().unwrap();
        let memory = store.insert_memory(&sample()).unwrap();
        let sealed = store.seal_outcome(memory.id, "worked great", Worked::True).unwrap();
        assert_eq!(sealed.outcome.as_deref(), Some("worked great"));
        assert_eq!(sealed.worked, Worked::True);
        let versions = store.list_versions(memory.id).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].version_number, 2);
    }

    #[test]
    fn archive_hides_from_non_archived_listing_but_not_from_get() {
        let store = Store::open_in_memory().unwrap();
        let memory = store.insert_memory(&sample()).unwrap();
        store.archive_memory(memory.id).unwrap();
        assert!(store.list_non_archived_memories().unwrap().is_empty());
        assert!(store.get_memory(memory.id).unwrap().is_some());
    }
}
