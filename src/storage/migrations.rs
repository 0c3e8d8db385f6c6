//! Ordered, idempotent schema migrations.
//!
//! Applied against `PRAGMA user_version`, following the version/description
//! table-of-migrations idiom: each migration is plain data, applied once in
//! a loop while `migration.version > current_version`. The engine refuses
//! to run if the on-disk version is newer than any migration it knows
//! about (spec: "the engine refuses to run if a migration has been applied
//! that it does not know about").

use crate::{Error, Result};
use rusqlite::Connection;

/// The highest schema version this build knows how to produce.
pub const SCHEMA_VERSION: u32 = 1;

struct Migration {
    version: u32,
    description: &'static str,
    up: fn(&Connection) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial schema: memories, versions, rules, relationships, \
                   sessions, entities, triggers, project links, code-indexer \
                   tables, meta, FTS5 + change-timestamp triggers",
    up: migration_1_initial_schema,
}];

/// Applies every migration with `version > current_version`, in order.
///
/// # Errors
///
/// Returns `Error::Fatal` if the on-disk version exceeds [`SCHEMA_VERSION`];
/// returns `Error::Store` if any migration statement fails (the whole batch
/// is applied inside one transaction, so a failure leaves the prior version
/// intact).
pub fn apply(conn: &Connection) -> Result<()> {
    let current: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| Error::Store {
            operation: "read_user_version".to_string(),
            cause: e.to_string(),
        })?;

    if current > SCHEMA_VERSION {
        return Err(Error::Fatal(format!(
            "database schema version {current} is newer than the highest migration this build knows ({SCHEMA_VERSION})"
        )));
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        (migration.up)(conn).map_err(|e| Error::Store {
            operation: format!("migration_{}", migration.version),
            cause: format!("{}: {e}", migration.description),
        })?;
        conn.pragma_update(None, "user_version", migration.version)
            .map_err(|e| Error::Store {
                operation: "write_user_version".to_string(),
                cause: e.to_string(),
            })?;
    }
    Ok(())
}

/// Guards an `ALTER TABLE ... ADD COLUMN` with a `PRAGMA table_info` probe
/// so migrations stay idempotent across re-runs against a partially
/// upgraded database.
#[allow(dead_code)]
fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    ddl: &str,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(std::result::Result::ok)
        .any(|name| name == column);
    drop(stmt);
    if !exists {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {ddl}"), [])?;
    }
    Ok(())
}

fn migration_1_initial_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r"
        BEGIN;

        CREATE TABLE IF NOT EXISTS memories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            content TEXT NOT NULL,
            rationale TEXT,
            context TEXT NOT NULL DEFAULT '{}',
            tags TEXT NOT NULL DEFAULT '[]',
            file_path TEXT,
            file_path_relative TEXT,
            keywords TEXT NOT NULL DEFAULT '',
            is_permanent INTEGER NOT NULL DEFAULT 0,
            vector_embedding BLOB,
            outcome TEXT,
            worked INTEGER,
            pinned INTEGER NOT NULL DEFAULT 0,
            archived INTEGER NOT NULL DEFAULT 0,
            recall_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            version_number INTEGER NOT NULL,
            content TEXT NOT NULL,
            rationale TEXT,
            context TEXT NOT NULL DEFAULT '{}',
            tags TEXT NOT NULL DEFAULT '[]',
            outcome TEXT,
            worked INTEGER,
            change_type TEXT NOT NULL,
            change_description TEXT,
            changed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memory_versions_memory_id ON memory_versions(memory_id);

        CREATE TABLE IF NOT EXISTS rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trigger TEXT NOT NULL,
            trigger_keywords TEXT NOT NULL DEFAULT '',
            must_do TEXT NOT NULL DEFAULT '[]',
            must_not TEXT NOT NULL DEFAULT '[]',
            ask_first TEXT NOT NULL DEFAULT '[]',
            warnings TEXT NOT NULL DEFAULT '[]',
            priority INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_relationships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            target_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            relationship TEXT NOT NULL,
            description TEXT,
            confidence REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            UNIQUE(source_id, target_id, relationship)
        );
        CREATE INDEX IF NOT EXISTS idx_memory_relationships_source ON memory_relationships(source_id);
        CREATE INDEX IF NOT EXISTS idx_memory_relationships_target ON memory_relationships(target_id);
        CREATE INDEX IF NOT EXISTS idx_memory_relationships_type ON memory_relationships(relationship);

        CREATE TABLE IF NOT EXISTS session_state (
            session_id TEXT PRIMARY KEY,
            project_path TEXT NOT NULL,
            briefed INTEGER NOT NULL DEFAULT 0,
            context_checks TEXT NOT NULL DEFAULT '[]',
            pending_decisions TEXT NOT NULL DEFAULT '[]',
            last_activity TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bypass_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            tool TEXT NOT NULL,
            reason TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS project_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_path TEXT NOT NULL,
            linked_path TEXT NOT NULL,
            relationship TEXT NOT NULL,
            label TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(source_path, linked_path)
        );

        CREATE TABLE IF NOT EXISTS extracted_entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_path TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            name TEXT NOT NULL,
            qualified_name TEXT,
            mention_count INTEGER NOT NULL DEFAULT 1,
            code_entity_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(project_path, entity_type, name)
        );

        CREATE TABLE IF NOT EXISTS memory_entity_refs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            entity_id INTEGER NOT NULL REFERENCES extracted_entities(id) ON DELETE CASCADE,
            relationship TEXT NOT NULL,
            context_snippet TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_memory_entity_refs_memory ON memory_entity_refs(memory_id);

        CREATE TABLE IF NOT EXISTS context_triggers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_path TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            pattern TEXT NOT NULL,
            recall_topic TEXT NOT NULL,
            recall_categories TEXT NOT NULL DEFAULT '[]',
            is_active INTEGER NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 0,
            trigger_count INTEGER NOT NULL DEFAULT 0,
            last_triggered TEXT
        );

        CREATE TABLE IF NOT EXISTS memory_communities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            summary TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            member_count INTEGER NOT NULL DEFAULT 0,
            member_ids TEXT NOT NULL DEFAULT '[]',
            level INTEGER NOT NULL DEFAULT 0,
            parent_id INTEGER REFERENCES memory_communities(id) ON DELETE SET NULL,
            embedding BLOB
        );

        CREATE TABLE IF NOT EXISTS active_context_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_path TEXT NOT NULL,
            memory_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            priority INTEGER NOT NULL DEFAULT 0,
            added_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS file_hashes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_path TEXT NOT NULL,
            file_path TEXT NOT NULL,
            hash TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(project_path, file_path)
        );

        CREATE TABLE IF NOT EXISTS code_entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_path TEXT NOT NULL,
            file_path TEXT NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            qualified_name TEXT
        );

        CREATE TABLE IF NOT EXISTS memory_code_refs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            code_entity_id INTEGER NOT NULL REFERENCES code_entities(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            content, rationale, tags, content='memories', content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS memories_fts_insert AFTER INSERT ON memories BEGIN
            INSERT INTO memories_fts(rowid, content, rationale, tags)
            VALUES (new.id, new.content, new.rationale, new.tags);
        END;

        CREATE TRIGGER IF NOT EXISTS memories_fts_update AFTER UPDATE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content, rationale, tags)
            VALUES ('delete', old.id, old.content, old.rationale, old.tags);
            INSERT INTO memories_fts(rowid, content, rationale, tags)
            VALUES (new.id, new.content, new.rationale, new.tags);
        END;

        CREATE TRIGGER IF NOT EXISTS memories_fts_delete AFTER DELETE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content, rationale, tags)
            VALUES ('delete', old.id, old.content, old.rationale, old.tags);
        END;

        CREATE TRIGGER IF NOT EXISTS memories_meta_insert AFTER INSERT ON memories BEGIN
            INSERT INTO meta(key, value) VALUES ('memories_last_modified', CAST(strftime('%s','now') AS TEXT))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value;
        END;

        CREATE TRIGGER IF NOT EXISTS memories_meta_update AFTER UPDATE ON memories BEGIN
            INSERT INTO meta(key, value) VALUES ('memories_last_modified', CAST(strftime('%s','now') AS TEXT))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value;
        END;

        CREATE TRIGGER IF NOT EXISTS memories_meta_delete AFTER DELETE ON memories BEGIN
            INSERT INTO meta(key, value) VALUES ('memories_last_modified', CAST(strftime('%s','now') AS TEXT))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value;
        END;

        CREATE TRIGGER IF NOT EXISTS rules_meta_insert AFTER INSERT ON rules BEGIN
            INSERT INTO meta(key, value) VALUES ('rules_last_modified', CAST(strftime('%s','now') AS TEXT))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value;
        END;

        CREATE TRIGGER IF NOT EXISTS rules_meta_update AFTER UPDATE ON rules BEGIN
            INSERT INTO meta(key, value) VALUES ('rules_last_modified', CAST(strftime('%s','now') AS TEXT))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value;
        END;

        CREATE TRIGGER IF NOT EXISTS rules_meta_delete AFTER DELETE ON rules BEGIN
            INSERT INTO meta(key, value) VALUES ('rules_last_modified', CAST(strftime('%s','now') AS TEXT))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value;
        END;

        COMMIT;
        ",
    )
}
