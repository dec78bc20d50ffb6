//! Embedded SQL store: the only component touching persistent state.
//!
//! Multiple sidecar processes may open the same file concurrently (WAL
//! mode, 5s busy-timeout absorbs write contention). Pragmas are applied via
//! `SqliteConnectionManager::with_init` so every pooled connection gets them
//! uniformly, not just the first.

mod console_logs;
mod embeddings;
mod entities;
mod migrations;
mod runs;
mod search;
pub mod settings;
mod tasks;
mod watches;
mod workers;

pub mod types;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::Result;

pub type Conn = PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000; PRAGMA foreign_keys=ON;",
            )
        });
        let pool = Pool::builder().max_size(8).build(manager)?;

        {
            let mut conn: Connection = Connection::open(db_path)?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000; PRAGMA foreign_keys=ON;",
            )?;
            migrations::run(&mut conn)?;
        }

        let store = Self { pool };
        store.cleanup_orphan_runs()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> Result<Conn> {
        Ok(self.pool.get()?)
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| {
            r.get(0)
        })?)
    }

    /// Startup cleanup (spec §4.1): any TaskRun left `running` with no
    /// `finished_at` is from a crashed prior process. Mark it failed.
    /// Unconditional (no age bound) — at startup there is no live process yet
    /// to race against, so every `running` row still open is, by definition,
    /// left over from a process that no longer exists.
    fn cleanup_orphan_runs(&self) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            r#"
            UPDATE task_runs
            SET status = 'failed',
                finished_at = ?1,
                error_message = 'orphaned',
                duration_ms = CAST((julianday(?1) - julianday(started_at)) * 86400000 AS INTEGER)
            WHERE status = 'running' AND finished_at IS NULL
            "#,
            [&now],
        )?;
        Ok(())
    }

    /// Periodic stale-run sweep (spec §4.4 sync step 1): unlike the startup
    /// sweep, other live sidecar processes may legitimately hold a `running`
    /// row here, so this only reaps rows older than `max_age_minutes` —
    /// recovering a task wedged behind a crashed sibling's orphaned lock
    /// (spec §4.3 pre-flight step 2) without a restart, while leaving runs
    /// that are merely still in flight alone. See DESIGN.md for the chosen
    /// threshold.
    pub fn sweep_stale_runs(&self, max_age_minutes: i64) -> Result<u64> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        let cutoff = format!("-{} minutes", max_age_minutes.max(0));
        let swept = conn.execute(
            r#"
            UPDATE task_runs
            SET status = 'failed',
                finished_at = ?1,
                error_message = 'orphaned',
                duration_ms = CAST((julianday(?1) - julianday(started_at)) * 86400000 AS INTEGER)
            WHERE status = 'running'
              AND finished_at IS NULL
              AND started_at < datetime(?1, ?2)
            "#,
            rusqlite::params![now, cutoff],
        )?;
        Ok(swept as u64)
    }

    /// Periodic prune: delete TaskRuns (and cascaded ConsoleLogs) older than
    /// `retention_days`. Called by the Scheduler on each sync tick.
    pub fn prune_old_runs(&self, retention_days: i64) -> Result<u64> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM task_runs WHERE started_at < datetime('now', ?1)",
            [format!("-{} days", retention_days)],
        )?;
        Ok(deleted as u64)
    }
}
