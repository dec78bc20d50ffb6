//! Versioned, append-only schema migrations.
//!
//! On open: if no `schema_version` table exists, apply all migrations in
//! order inside a single transaction; else apply every migration whose
//! version exceeds `MAX(version)`, each in its own transaction. Versions are
//! never rewritten; a migration whose SQL body changes in a later release
//! but keeps the same version number does not re-apply (see DESIGN.md).

use rusqlite::{Connection, Transaction};

use crate::error::Result;

pub struct Migration {
    pub version: i64,
    pub label: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        label: "entities, observations, relations",
        sql: r#"
            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                category TEXT,
                embedded_at TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_entities_category ON entities(category);

            CREATE TABLE IF NOT EXISTS observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                source TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_observations_entity ON observations(entity_id);

            CREATE TABLE IF NOT EXISTS relations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                to_entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                relation_type TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_relations_from ON relations(from_entity_id);
            CREATE INDEX IF NOT EXISTS idx_relations_to ON relations(to_entity_id);
        "#,
    },
    Migration {
        version: 2,
        label: "entity FTS index",
        sql: r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS entities_fts USING fts5(
                name, category, content='entities', content_rowid='id', tokenize='porter unicode61'
            );
            CREATE TRIGGER IF NOT EXISTS entities_ai AFTER INSERT ON entities BEGIN
                INSERT INTO entities_fts(rowid, name, category) VALUES (new.id, new.name, new.category);
            END;
            CREATE TRIGGER IF NOT EXISTS entities_ad AFTER DELETE ON entities BEGIN
                INSERT INTO entities_fts(entities_fts, rowid, name, category) VALUES ('delete', old.id, old.name, old.category);
            END;
            CREATE TRIGGER IF NOT EXISTS entities_au AFTER UPDATE ON entities BEGIN
                INSERT INTO entities_fts(entities_fts, rowid, name, category) VALUES ('delete', old.id, old.name, old.category);
                INSERT INTO entities_fts(rowid, name, category) VALUES (new.id, new.name, new.category);
            END;
        "#,
    },
    Migration {
        version: 3,
        label: "workers",
        sql: r#"
            CREATE TABLE IF NOT EXISTS workers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                system_prompt TEXT,
                description TEXT,
                model TEXT,
                is_default INTEGER NOT NULL DEFAULT 0,
                task_count INTEGER NOT NULL DEFAULT 0
            );
        "#,
    },
    Migration {
        version: 4,
        label: "tasks",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                prompt TEXT NOT NULL,
                executor TEXT NOT NULL DEFAULT 'default',
                status TEXT NOT NULL DEFAULT 'active',
                trigger_type TEXT NOT NULL,
                cron_expression TEXT,
                scheduled_at TEXT,
                trigger_config TEXT,
                last_run TEXT,
                last_result TEXT,
                error_count INTEGER NOT NULL DEFAULT 0,
                max_runs INTEGER,
                run_count INTEGER NOT NULL DEFAULT 0,
                memory_entity_id INTEGER REFERENCES entities(id) ON DELETE SET NULL,
                worker_id INTEGER REFERENCES workers(id) ON DELETE SET NULL,
                session_continuity INTEGER NOT NULL DEFAULT 0,
                session_id TEXT,
                timeout_minutes INTEGER,
                nudge_mode TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_trigger_type ON tasks(trigger_type);
        "#,
    },
    Migration {
        version: 5,
        label: "task_runs, console_logs",
        sql: r#"
            CREATE TABLE IF NOT EXISTS task_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                finished_at TEXT,
                status TEXT NOT NULL DEFAULT 'running',
                result TEXT,
                result_file TEXT,
                error_message TEXT,
                duration_ms INTEGER,
                session_id TEXT,
                progress REAL,
                progress_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_task_runs_task ON task_runs(task_id);
            CREATE INDEX IF NOT EXISTS idx_task_runs_status ON task_runs(status);

            CREATE TABLE IF NOT EXISTS console_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES task_runs(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                entry_type TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_console_logs_run_seq ON console_logs(run_id, seq);
        "#,
    },
    Migration {
        version: 6,
        label: "watches",
        sql: r#"
            CREATE TABLE IF NOT EXISTS watches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                description TEXT,
                action_prompt TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                last_triggered TEXT,
                trigger_count INTEGER NOT NULL DEFAULT 0
            );
        "#,
    },
    Migration {
        version: 7,
        label: "embeddings, settings",
        sql: r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                source_type TEXT NOT NULL,
                source_id INTEGER NOT NULL,
                text_hash TEXT NOT NULL,
                vector BLOB NOT NULL,
                model TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                UNIQUE(source_type, source_id, model)
            );
            CREATE INDEX IF NOT EXISTS idx_embeddings_entity ON embeddings(entity_id);

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
    },
];

/// Fresh install: apply every migration in order inside a single
/// transaction. Either the whole schema lands or none of it does.
fn apply_all_in_one_transaction(conn: &mut Connection) -> Result<()> {
    let tx: Transaction = conn.transaction()?;
    for migration in MIGRATIONS.iter() {
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )?;
        tracing::info!(version = migration.version, label = migration.label, "applied migration");
    }
    tx.commit()?;
    Ok(())
}

/// Incremental upgrade: apply every migration whose version exceeds
/// `current`, each in its own transaction, so a mid-upgrade crash leaves the
/// schema at a valid prior version rather than a half-applied one.
fn apply_incremental(conn: &mut Connection, current: i64) -> Result<()> {
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx: Transaction = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, label = migration.label, "applied migration");
    }
    Ok(())
}

pub fn run(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')));",
    )?;

    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))?;

    if current == 0 {
        apply_all_in_one_transaction(conn)
    } else {
        apply_incremental(conn, current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    // Invariant 6: schema version is monotonically non-decreasing across
    // process restarts (re-opening an up-to-date db never re-applies or
    // rewinds versions).
    #[test]
    fn reopening_an_up_to_date_store_does_not_regress_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("daymon.db");

        let first = Store::open(&db_path).unwrap();
        let version_after_first_open = first.schema_version().unwrap();
        assert_eq!(version_after_first_open, MIGRATIONS.last().unwrap().version);
        drop(first);

        let second = Store::open(&db_path).unwrap();
        let version_after_second_open = second.schema_version().unwrap();
        assert_eq!(version_after_second_open, version_after_first_open);
    }

    #[test]
    fn migrations_are_applied_in_strictly_increasing_version_order() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }
}
