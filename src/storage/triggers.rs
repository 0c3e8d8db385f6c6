//! CRUD for `context_triggers`.

use super::{map_store_err, Store};
use crate::models::{Category, ContextTrigger, TriggerType};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

fn trigger_type_str(t: TriggerType) -> &'static str {
    match t {
        TriggerType::FilePattern => "file_pattern",
        TriggerType::TagMatch => "tag_match",
        TriggerType::EntityMatch => "entity_match",
    }
}

fn parse_trigger_type(s: &str) -> TriggerType {
    match s {
        "tag_match" => TriggerType::TagMatch,
        "entity_match" => TriggerType::EntityMatch,
        _ => TriggerType::FilePattern,
    }
}

fn row_to_trigger(row: &Row<'_>) -> rusqlite::Result<ContextTrigger> {
    let trigger_type: String = row.get("trigger_type")?;
    let recall_categories: String = row.get("recall_categories")?;
    let last_triggered: Option<String> = row.get("last_triggered")?;
    let categories: Vec<Category> = serde_json::from_str::<Vec<String>>(&recall_categories)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    Ok(ContextTrigger {
        id: row.get("id")?,
        project_path: row.get("project_path")?,
        trigger_type: parse_trigger_type(&trigger_type),
        pattern: row.get("pattern")?,
        recall_topic: row.get("recall_topic")?,
        recall_categories: categories,
        is_active: row.get::<_, i64>("is_active")? != 0,
        priority: row.get("priority")?,
        trigger_count: row.get::<_, i64>("trigger_count")? as u64,
        last_triggered: last_triggered
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
    })
}

/// Fields needed to insert a new context trigger.
pub struct NewTrigger {
    /// The project this trigger belongs to.
    pub project_path: String,
    /// What the pattern is matched against.
    pub trigger_type: TriggerType,
    /// Glob (file) or regex (tag/entity) pattern.
    pub pattern: String,
    /// The topic to recall when this trigger fires.
    pub recall_topic: String,
    /// Categories to restrict the follow-up recall to.
    pub recall_categories: Vec<Category>,
    /// Higher sorts first among candidate triggers.
    pub priority: i32,
}

impl Store {
    /// Inserts a new, active trigger.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn insert_trigger(&self, new: &NewTrigger) -> Result<ContextTrigger> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let categories_json = serde_json::to_string(
            &new.recall_categories.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            "INSERT INTO context_triggers (
                project_path, trigger_type, pattern, recall_topic, recall_categories,
                is_active, priority, trigger_count, last_triggered
            ) VALUES (?1,?2,?3,?4,?5,1,?6,0,NULL)",
            params![
                new.project_path,
                trigger_type_str(new.trigger_type),
                new.pattern,
                new.recall_topic,
                categories_json,
                new.priority,
            ],
        )
        .map_err(map_store_err("insert_trigger"))?;
        let id = conn.last_insert_rowid();
        conn.query_row("SELECT * FROM context_triggers WHERE id = ?1", [id], row_to_trigger)
            .map_err(map_store_err("insert_trigger"))
    }

    /// Lists active triggers for a project, ordered by priority descending,
    /// for matching against an incoming file path / tag set / entity set.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn list_active_triggers(&self, project_path: &str) -> Result<Vec<ContextTrigger>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM context_triggers WHERE project_path = ?1 AND is_active = 1 ORDER BY priority DESC",
            )
            .map_err(map_store_err("list_active_triggers"))?;
        let rows = stmt.query_map([project_path], row_to_trigger).map_err(map_store_err("list_active_triggers"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("list_active_triggers"))
    }

    /// Bumps `trigger_count` and sets `last_triggered` to now, called after
    /// a trigger fires.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn record_trigger_fired(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute(
            "UPDATE context_triggers SET trigger_count = trigger_count + 1, last_triggered = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )
        .map_err(map_store_err("record_trigger_fired"))?;
        Ok(())
    }

    /// Sets `is_active`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn set_trigger_active(&self, id: i64, active: bool) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute("UPDATE context_triggers SET is_active = ?1 WHERE id = ?2", params![i64::from(active), id])
            .map_err(map_store_err("set_trigger_active"))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_fire_trigger() {
        let store = Store::open_in_memory().unwrap();
        let trigger = store
            .insert_trigger(&NewTrigger {
                project_path: "/p".to_string(),
                trigger_type: TriggerType::FilePattern,
                pattern: "**/auth/**".to_string(),
                recall_topic: "authentication".to_string(),
                recall_categories: vec![Category::Decision],
                priority: 5,
            })
            .unwrap();
        assert_eq!(trigger.trigger_count, 0);
        store.record_trigger_fired(trigger.id).unwrap();
        let active = store.list_active_triggers("/p").unwrap();
        assert_eq!(active[0].trigger_count, 1);
        assert!(active[0].last_triggered.is_some());
    }

    #[test]
    fn deactivated_trigger_is_excluded() {
        let store = Store::open_in_memory().unwrap();
        let trigger = store
            .insert_trigger(&NewTrigger {
                project_path: "/p".to_string(),
                trigger_type: TriggerType::TagMatch,
                pattern: "auth.*".to_string(),
                recall_topic: "authentication".to_string(),
                recall_categories: vec![],
                priority: 0,
            })
            .unwrap();
        store.set_trigger_active(trigger.id, false).unwrap();
        assert!(store.list_active_triggers("/p").unwrap().is_empty());
    }
}
