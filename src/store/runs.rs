//! TaskRun lifecycle: create (running) -> complete (completed|failed).
//!
//! The cross-process execution lock (spec §3 invariant, §5) is implemented
//! here as "is there already a TaskRun row with status=running for this
//! task" — read-then-insert, not a true mutex. Two processes racing past the
//! read is the one tolerated anomaly (spec §5); both will attempt
//! `complete_run` by id, which is idempotent.

use rusqlite::{params, OptionalExtension};

use super::types::TaskRun;
use super::Store;
use crate::error::Result;

impl Store {
    /// Cross-process lock check: is the latest run for this task still
    /// `running`? (spec §4.3 pre-flight step 2).
    pub fn latest_run_is_running(&self, task_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM task_runs WHERE task_id = ?1 ORDER BY id DESC LIMIT 1",
                [task_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(status.as_deref() == Some("running"))
    }

    pub fn create_run(&self, task_id: i64) -> Result<TaskRun> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO task_runs (task_id, status) VALUES (?1, 'running')",
            [task_id],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_run(id)?.ok_or_else(|| {
            crate::error::DaymonError::Store(rusqlite::Error::QueryReturnedNoRows)
        })
    }

    pub fn get_run(&self, id: i64) -> Result<Option<TaskRun>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{} WHERE id = ?1", RUN_SELECT), [id], row_to_run)
            .optional()
            .map_err(Into::into)
    }

    /// Complete a run: sets finished_at, status (failed iff error_message is
    /// Some), computes duration_ms, and folds the outcome back onto the
    /// parent Task (last_run/last_result, error_count reset-or-increment).
    pub fn complete_run(
        &self,
        run_id: i64,
        result: &str,
        result_file: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<TaskRun> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        let status = if error_message.is_some() { "failed" } else { "completed" };

        conn.execute(
            r#"
            UPDATE task_runs
            SET finished_at = ?2,
                status = ?3,
                result = ?4,
                result_file = ?5,
                error_message = ?6,
                duration_ms = CAST((julianday(?2) - julianday(started_at)) * 86400000 AS INTEGER)
            WHERE id = ?1
            "#,
            params![run_id, now, status, result, result_file, error_message],
        )?;

        let task_id: i64 = conn.query_row(
            "SELECT task_id FROM task_runs WHERE id = ?1",
            [run_id],
            |r| r.get(0),
        )?;
        drop(conn);

        self.set_task_last_run(task_id, &now, result)?;
        if error_message.is_some() {
            self.record_failed_run(task_id)?;
        } else {
            self.record_successful_run(task_id)?;
        }

        self.get_run(run_id)?.ok_or_else(|| {
            crate::error::DaymonError::Store(rusqlite::Error::QueryReturnedNoRows)
        })
    }

    pub fn update_run_progress(&self, run_id: i64, progress: Option<f64>, message: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE task_runs SET progress = ?2, progress_message = ?3 WHERE id = ?1",
            params![run_id, progress, message],
        )?;
        Ok(())
    }

    pub fn update_run_session_id(&self, run_id: i64, session_id: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE task_runs SET session_id = ?2 WHERE id = ?1",
            params![run_id, session_id],
        )?;
        Ok(())
    }

    pub fn latest_run_for_task(&self, task_id: i64) -> Result<Option<TaskRun>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{} WHERE task_id = ?1 ORDER BY id DESC LIMIT 1", RUN_SELECT),
            [task_id],
            row_to_run,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_runs(&self, limit: i64) -> Result<Vec<TaskRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id DESC LIMIT ?1", RUN_SELECT))?;
        let rows = stmt.query_map([limit], row_to_run)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_running_runs(&self) -> Result<Vec<TaskRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE status = 'running' ORDER BY id DESC", RUN_SELECT))?;
        let rows = stmt.query_map([], row_to_run)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

const RUN_SELECT: &str = r#"
    SELECT id, task_id, started_at, finished_at, status, result, result_file,
           error_message, duration_ms, session_id, progress, progress_message
    FROM task_runs
"#;

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<TaskRun> {
    Ok(TaskRun {
        id: row.get(0)?,
        task_id: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        status: row.get(4)?,
        result: row.get(5)?,
        result_file: row.get(6)?,
        error_message: row.get(7)?,
        duration_ms: row.get(8)?,
        session_id: row.get(9)?,
        progress: row.get(10)?,
        progress_message: row.get(11)?,
    })
}
