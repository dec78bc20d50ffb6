//! Task CRUD, pause/resume, and the cron-sync helpers the Scheduler needs.

use rusqlite::params;

use super::types::{Task, TaskPatch};
use super::Store;
use crate::error::Result;

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &self,
        name: &str,
        description: Option<&str>,
        prompt: &str,
        executor: &str,
        trigger_type: &str,
        cron_expression: Option<&str>,
        scheduled_at: Option<&str>,
        trigger_config: Option<&str>,
        max_runs: Option<i64>,
        worker_id: Option<i64>,
        session_continuity: bool,
        timeout_minutes: Option<i64>,
    ) -> Result<Task> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO tasks (
                name, description, prompt, executor, status, trigger_type,
                cron_expression, scheduled_at, trigger_config, max_runs,
                worker_id, session_continuity, timeout_minutes
            ) VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                name,
                description,
                prompt,
                executor,
                trigger_type,
                cron_expression,
                scheduled_at,
                trigger_config,
                max_runs,
                worker_id,
                session_continuity,
                timeout_minutes
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_task(id)?.ok_or_else(|| {
            crate::error::DaymonError::Store(rusqlite::Error::QueryReturnedNoRows)
        })
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let conn = self.conn()?;
        let result = conn.query_row(&format!("{} WHERE id = ?1", TASK_SELECT), [id], row_to_task);
        match result {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_tasks(&self, status: Option<&str>) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = if status.is_some() {
            conn.prepare(&format!("{} WHERE status = ?1 ORDER BY id DESC", TASK_SELECT))?
        } else {
            conn.prepare(&format!("{} ORDER BY id DESC", TASK_SELECT))?
        };
        let rows = if let Some(s) = status {
            stmt.query_map([s], row_to_task)?
        } else {
            stmt.query_map([], row_to_task)?
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_active_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks(Some("active"))
    }

    /// Tasks with `trigger_type=once, status=active, scheduled_at <= now`.
    pub fn due_once_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE trigger_type = 'once' AND status = 'active' AND scheduled_at <= ?1",
            TASK_SELECT
        ))?;
        let rows = stmt.query_map([&now], row_to_task)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE tasks SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                prompt = COALESCE(?4, prompt),
                executor = COALESCE(?5, executor),
                status = COALESCE(?6, status),
                trigger_type = COALESCE(?7, trigger_type),
                cron_expression = COALESCE(?8, cron_expression),
                scheduled_at = COALESCE(?9, scheduled_at),
                trigger_config = COALESCE(?10, trigger_config),
                max_runs = COALESCE(?11, max_runs),
                worker_id = COALESCE(?12, worker_id),
                session_continuity = COALESCE(?13, session_continuity),
                timeout_minutes = COALESCE(?14, timeout_minutes),
                nudge_mode = COALESCE(?15, nudge_mode),
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE id = ?1
            "#,
            params![
                id,
                patch.name,
                patch.description,
                patch.prompt,
                patch.executor,
                patch.status,
                patch.trigger_type,
                patch.cron_expression,
                patch.scheduled_at,
                patch.trigger_config,
                patch.max_runs,
                patch.worker_id,
                patch.session_continuity,
                patch.timeout_minutes,
                patch.nudge_mode,
            ],
        )?;
        Ok(())
    }

    pub fn set_task_status(&self, id: i64, status: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tasks SET status = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
            params![id, status],
        )?;
        Ok(())
    }

    pub fn pause_task(&self, id: i64) -> Result<()> {
        self.set_task_status(id, "paused")
    }

    pub fn resume_task(&self, id: i64) -> Result<()> {
        self.set_task_status(id, "active")
    }

    pub fn delete_task(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn set_task_session_id(&self, id: i64, session_id: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tasks SET session_id = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
            params![id, session_id],
        )?;
        Ok(())
    }

    pub fn set_task_memory_entity(&self, id: i64, entity_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tasks SET memory_entity_id = ?2 WHERE id = ?1",
            params![id, entity_id],
        )?;
        Ok(())
    }

    /// Count prior runs sharing `session_id` (used by the runner's session
    /// rotation decision — spec §4.3, threshold 20).
    pub fn count_runs_with_session(&self, task_id: i64, session_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM task_runs WHERE task_id = ?1 AND session_id = ?2",
            params![task_id, session_id],
            |r| r.get(0),
        )?)
    }

    /// On a successful run: increment run_count; if max_runs reached,
    /// transition status to completed (spec invariant 2).
    pub fn record_successful_run(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tasks SET run_count = run_count + 1, error_count = 0, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
            [id],
        )?;
        conn.execute(
            "UPDATE tasks SET status = 'completed' WHERE id = ?1 AND max_runs IS NOT NULL AND run_count >= max_runs",
            [id],
        )?;
        Ok(())
    }

    pub fn record_failed_run(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tasks SET error_count = error_count + 1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    pub fn set_task_last_run(&self, id: i64, last_run: &str, last_result: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tasks SET last_run = ?2, last_result = ?3 WHERE id = ?1",
            params![id, last_run, last_result],
        )?;
        Ok(())
    }
}

const TASK_SELECT: &str = r#"
    SELECT id, name, description, prompt, executor, status, trigger_type,
           cron_expression, scheduled_at, trigger_config, last_run, last_result,
           error_count, max_runs, run_count, memory_entity_id, worker_id,
           session_continuity, session_id, timeout_minutes, nudge_mode,
           created_at, updated_at
    FROM tasks
"#;

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        prompt: row.get(3)?,
        executor: row.get(4)?,
        status: row.get(5)?,
        trigger_type: row.get(6)?,
        cron_expression: row.get(7)?,
        scheduled_at: row.get(8)?,
        trigger_config: row.get(9)?,
        last_run: row.get(10)?,
        last_result: row.get(11)?,
        error_count: row.get(12)?,
        max_runs: row.get(13)?,
        run_count: row.get(14)?,
        memory_entity_id: row.get(15)?,
        worker_id: row.get(16)?,
        session_continuity: row.get(17)?,
        session_id: row.get(18)?,
        timeout_minutes: row.get(19)?,
        nudge_mode: row.get(20)?,
        created_at: row.get(21)?,
        updated_at: row.get(22)?,
    })
}
