//! CRUD for `session_state`.

use super::{map_store_err, Store};
use crate::models::{MemoryId, SessionState};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionState> {
    let context_checks: String = row.get("context_checks")?;
    let pending_decisions: String = row.get("pending_decisions")?;
    let last_activity: String = row.get("last_activity")?;
    let created_at: String = row.get("created_at")?;
    Ok(SessionState {
        session_id: row.get("session_id")?,
        project_path: row.get("project_path")?,
        briefed: row.get::<_, i64>("briefed")? != 0,
        context_checks: serde_json::from_str(&context_checks).unwrap_or_default(),
        pending_decisions: serde_json::from_str(&pending_decisions).unwrap_or_default(),
        last_activity: DateTime::parse_from_rfc3339(&last_activity)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

impl Store {
    /// Loads a session by id, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.query_row("SELECT * FROM session_state WHERE session_id = ?1", [session_id], row_to_session)
            .map(Some)
            .or_else(|e| {
                if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                    Ok(None)
                } else {
                    Err(map_store_err("get_session")(e))
                }
            })
    }

    /// Loads the session if it exists, otherwise creates and persists a
    /// fresh one.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn get_or_create_session(&self, session_id: &str, project_path: &str) -> Result<SessionState> {
        if let Some(existing) = self.get_session(session_id)? {
            return Ok(existing);
        }
        let state = SessionState::new(session_id.to_string(), project_path.to_string(), Utc::now());
        self.put_session(&state)?;
        Ok(state)
    }

    /// Writes (inserts or replaces) a session record in full. Last-write-wins:
    /// concurrent callers racing on the same session id simply overwrite
    /// each other, matching the engine's single-writer-per-process model.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn put_session(&self, state: &SessionState) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Fatal("store lock poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO session_state (
                session_id, project_path, briefed, context_checks, pending_decisions,
                last_activity, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(session_id) DO UPDATE SET
                briefed = excluded.briefed,
                context_checks = excluded.context_checks,
                pending_decisions = excluded.pending_decisions,
                last_activity = excluded.last_activity",
            params![
                state.session_id,
                state.project_path,
                i64::from(state.briefed),
                serde_json::to_string(&state.context_checks).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&state.pending_decisions).unwrap_or_else(|_| "[]".to_string()),
                state.last_activity.to_rfc3339(),
                state.created_at.to_rfc3339(),
            ],
        )
        .map_err(map_store_err("put_session"))?;
        Ok(())
    }

    /// Appends a memory id to `pending_decisions` if not already present.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn add_pending_decision(&self, session_id: &str, memory_id: MemoryId) -> Result<()> {
        if let Some(mut state) = self.get_session(session_id)? {
            if !state.pending_decisions.contains(&memory_id) {
                state.pending_decisions.push(memory_id);
                self.put_session(&state)?;
            }
        }
        Ok(())
    }

    /// Removes a memory id from `pending_decisions` once its outcome is
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn clear_pending_decision(&self, session_id: &str, memory_id: MemoryId) -> Result<()> {
        if let Some(mut state) = self.get_session(session_id)? {
            state.pending_decisions.retain(|id| *id != memory_id);
            self.put_session(&state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let first = store.get_or_create_session("abc-2026010100", "/p").unwrap();
        let second = store.get_or_create_session("abc-2026010100", "/p").unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn pending_decisions_add_and_clear() {
        let store = Store::open_in_memory().unwrap();
        store.get_or_create_session("s-1", "/p").unwrap();
        store.add_pending_decision("s-1", 42).unwrap();
        let state = store.get_session("s-1").unwrap().unwrap();
        assert_eq!(state.pending_decisions, vec![42]);
        store.clear_pending_decision("s-1", 42).unwrap();
        assert!(store.get_session("s-1").unwrap().unwrap().pending_decisions.is_empty());
    }
}
