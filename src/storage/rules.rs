//! CRUD for the `rules` table.

use super::{map_store_err, Store};
use crate::models::{Rule, RuleId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<Rule> {
    let must_do: String = row.get("must_do")?;
    let must_not: String = row.get("must_not")?;
    let ask_first: String = row.get("ask_first")?;
    let warnings: String = row.get("warnings")?;
    let created_at: String = row.get("created_at")?;
    Ok(Rule {
        id: row.get("id")?,
        trigger: row.get("trigger")?,
        trigger_keywords: row.get("trigger_keywords")?,
        must_do: serde_json::from_str(&must_do).unwrap_or_default(),
        must_not: serde_json::from_str(&must_not).unwrap_or_default(),
        ask_first: serde_json::from_str(&ask_first).unwrap_or_default(),
        warnings: serde_json::from_str(&warnings).unwrap_or_default(),
        priority: row.get("priority")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Fields needed to insert a new rule.
pub struct NewRule {
    /// Free text describing when this rule applies.
    pub trigger: String,
    /// Tokenized form of `trigger`.
    pub trigger_keywords: String,
    /// Actions the caller must perform.
    pub must_do: Vec<String>,
    /// Actions the caller must avoid.
    pub must_not: Vec<String>,
    /// Questions the caller should ask before proceeding.
    pub ask_first: Vec<String>,
    /// Non-blocking cautions.
    pub warnings: Vec<String>,
    /// Higher sorts first.
    pub priority: i32,
}

impl Store {
    /// Inserts a new rule, enabled by default.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn insert_rule(&self, new: &NewRule) -> Result<Rule> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO rules (
                trigger, trigger_keywords, must_do, must_not, ask_first, warnings,
                priority, enabled, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,1,?8)",
            params![
                new.trigger,
                new.trigger_keywords,
                serde_json::to_string(&new.must_do).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&new.must_not).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&new.ask_first).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&new.warnings).unwrap_or_else(|_| "[]".to_string()),
                new.priority,
                now,
            ],
        )
        .map_err(map_store_err("insert_rule"))?;
        let id = conn.last_insert_rowid();
        conn.query_row("SELECT * FROM rules WHERE id = ?1", [id], row_to_rule)
            .map_err(map_store_err("insert_rule"))
    }

    /// Loads a rule by id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn get_rule(&self, id: RuleId) -> Result<Option<Rule>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.query_row("SELECT * FROM rules WHERE id = ?1", [id], row_to_rule)
            .map(Some)
            .or_else(|e| {
                if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                    Ok(None)
                } else {
                    Err(map_store_err("get_rule")(e))
                }
            })
    }

    /// Lists every enabled rule, ordered by priority descending, used to
    /// seed the rules TF-IDF index.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn list_enabled_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare("SELECT * FROM rules WHERE enabled = 1 ORDER BY priority DESC")
            .map_err(map_store_err("list_enabled_rules"))?;
        let rows = stmt.query_map([], row_to_rule).map_err(map_store_err("list_enabled_rules"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("list_enabled_rules"))
    }

    /// Lists every rule, enabled or not.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn list_all_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut stmt = conn.prepare("SELECT * FROM rules ORDER BY priority DESC").map_err(map_store_err("list_all_rules"))?;
        let rows = stmt.query_map([], row_to_rule).map_err(map_store_err("list_all_rules"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_store_err("list_all_rules"))
    }

    /// Appends a non-blocking caution to an existing rule.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the rule does not exist, otherwise
    /// `Error::Store` on a write failure.
    pub fn add_warning_to_rule(&self, id: RuleId, warning: &str) -> Result<Rule> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        let mut rule = conn
            .query_row("SELECT * FROM rules WHERE id = ?1", [id], row_to_rule)
            .map_err(|e| {
                if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                    Error::NotFound { kind: "rule", id: id.to_string() }
                } else {
                    map_store_err("add_warning_to_rule")(e)
                }
            })?;
        rule.warnings.push(warning.to_string());
        conn.execute(
            "UPDATE rules SET warnings = ?1 WHERE id = ?2",
            params![serde_json::to_string(&rule.warnings).unwrap_or_else(|_| "[]".to_string()), id],
        )
        .map_err(map_store_err("add_warning_to_rule"))?;
        Ok(rule)
    }

    /// Updates a rule's enabled flag.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn set_rule_enabled(&self, id: RuleId, enabled: bool) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute("UPDATE rules SET enabled = ?1 WHERE id = ?2", params![i64::from(enabled), id])
            .map_err(map_store_err("set_rule_enabled"))?;
        Ok(())
    }

    /// Deletes a rule.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn delete_rule(&self, id: RuleId) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute("DELETE FROM rules WHERE id = ?1", [id]).map_err(map_store_err("delete_rule"))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> NewRule {
        NewRule {
            trigger: "touching authentication code".to_string(),
            trigger_keywords: "touching authentication code".to_string(),
            must_do: vec!["write a test".to_string()],
            must_not: vec![],
            ask_first: vec![],
            warnings: vec![],
            priority: 10,
        }
    }

    #[test]
    fn insert_and_list_enabled() {
        let store = Store::open_in_memory().unwrap();
        let rule = store.insert_rule(&sample()).unwrap();
        assert!(rule.enabled);
        assert_eq!(store.list_enabled_rules().unwrap().len(), 1);
        store.set_rule_enabled(rule.id, false).unwrap();
        assert!(store.list_enabled_rules().unwrap().is_empty());
        assert_eq!(store.list_all_rules().unwrap().len(), 1);
    }

    #[test]
    fn add_warning_appends() {
        let store = Store::open_in_memory().unwrap();
        let rule = store.insert_rule(&sample()).unwrap();
        let updated = store.add_warning_to_rule(rule.id, "be careful").unwrap();
        assert_eq!(updated.warnings, vec!["be careful".to_string()]);
    }
}
