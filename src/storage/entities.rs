//! CRUD for `extracted_entities` and `memory_entity_refs`.

use super::{map_store_err, Store};
use crate::models::{EntityRefRelationship, EntityType, ExtractedEntity, MemoryEntityRef, MemoryId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

fn entity_type_str(t: EntityType) -> &'static str {
    match t {
        EntityType::Function => "function",
        EntityType::Class => "class",
        EntityType::File => "file",
        EntityType::Module => "module",
        EntityType::Variable => "variable",
        EntityType::Concept => "concept",
    }
}

fn parse_entity_type(s: &str) -> EntityType {
    match s {
        "function" => EntityType::Function,
        "class" => EntityType::Class,
        "file" => EntityType::File,
        "module" => EntityType::Module,
        "variable" => EntityType::Variable,
        _ => EntityType::Concept,
    }
}

fn ref_relationship_str(r: EntityRefRelationship) -> &'static str {
    match r {
        EntityRefRelationship::Mentions => "mentions",
        EntityRefRelationship::About => "about",
        EntityRefRelationship::Modifies => "modifies",
        EntityRefRelationship::Introduces => "introduces",
        EntityRefRelationship::Deprecates => "deprecates",
    }
}

fn parse_ref_relationship(s: &str) -> EntityRefRelationship {
    match s {
        "about" => EntityRefRelationship::About,
        "modifies" => EntityRefRelationship::Modifies,
        "introduces" => EntityRefRelationship::Introduces,
        "deprecates" => EntityRefRelationship::Deprecates,
        _ => EntityRefRelationship::Mentions,
    }
}

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<ExtractedEntity> {
    let entity_type: String = row.get("entity_type")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(ExtractedEntity {
        id: row.get("id")?,
        project_path: row.get("project_path")?,
        entity_type: parse_entity_type(&entity_type),
        name: row.get("name")?,
        qualified_name: row.get("qualified_name")?,
        mention_count: row.get::<_, i64>("mention_count")? as u64,
        code_entity_id: row.get("code_entity_id")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

impl Store {
    /// Inserts a new entity observation, or bumps `mention_count` and
    /// `updated_at` if `(project_path, entity_type, name)` already exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn upsert_entity(
        &self,
        project_path: &str,
        entity_type: EntityType,
        name: &str,
        qualified_name: Option<&str>,
    ) -> Result<ExtractedEntity> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO extracted_entities (
                project_path, entity_type, name, qualified_name, mention_count, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,1,?5,?5)
             ON CONFLICT(project_path, entity_type, name) DO UPDATE SET
                mention_count = mention_count + 1,
                qualified_name = COALESCE(excluded.qualified_name, extracted_entities.qualified_name),
                updated_at = excluded.updated_at",
            params![project_path, entity_type_str(entity_type), name, qualified_name, now],
        )
        .map_err(map_store_err("upsert_entity"))?;
        conn.query_row(
            "SELECT * FROM extracted_entities WHERE project_path = ?1 AND entity_type = ?2 AND name = ?3",
            params![project_path, entity_type_str(entity_type), name],
            row_to_entity,
        )
        .map_err(map_store_err("upsert_entity"))
    }

    /// Lists every entity observed in a project.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn list_entities(&self, project_path: &str) -> Result<Vec<ExtractedEntity>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare("SELECT * FROM extracted_entities WHERE project_path = ?1")
            .map_err(map_store_err("list_entities"))?;
        let rows = stmt.query_map([project_path], row_to_entity).map_err(map_store_err("list_entities"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("list_entities"))
    }

    /// Links a memory to an entity.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn insert_entity_ref(
        &self,
        memory_id: MemoryId,
        entity_id: i64,
        relationship: EntityRefRelationship,
        context_snippet: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO memory_entity_refs (memory_id, entity_id, relationship, context_snippet)
             VALUES (?1,?2,?3,?4)",
            params![memory_id, entity_id, ref_relationship_str(relationship), context_snippet],
        )
        .map_err(map_store_err("insert_entity_ref"))?;
        Ok(())
    }

    /// Entity refs for a given memory.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn entity_refs_for_memory(&self, memory_id: MemoryId) -> Result<Vec<MemoryEntityRef>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare("SELECT * FROM memory_entity_refs WHERE memory_id = ?1")
            .map_err(map_store_err("entity_refs_for_memory"))?;
        let rows = stmt
            .query_map([memory_id], |row| {
                let relationship: String = row.get("relationship")?;
                Ok(MemoryEntityRef {
                    id: row.get("id")?,
                    memory_id: row.get("memory_id")?,
                    entity_id: row.get("entity_id")?,
                    relationship: parse_ref_relationship(&relationship),
                    context_snippet: row.get("context_snippet")?,
                })
            })
            .map_err(map_store_err("entity_refs_for_memory"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("entity_refs_for_memory"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn upsert_bumps_mention_count() {
        let store = Store::open_in_memory().unwrap();
        let first = store.upsert_entity("/p", EntityType::Function, "parse_config", None).unwrap();
        assert_eq!(first.mention_count, 1);
        let second = store.upsert_entity("/p", EntityType::Function, "parse_config", None).unwrap();
        assert_eq!(second.mention_count, 2);
        assert_eq!(first.id, second.id);
    }
}
