//! Worker CRUD. At most one worker has `is_default = true`; setting a new
//! default clears the previous one in the same transaction (spec §3).

use rusqlite::{params, OptionalExtension};

use super::types::Worker;
use super::Store;
use crate::error::Result;

impl Store {
    pub fn create_worker(
        &self,
        name: &str,
        system_prompt: Option<&str>,
        description: Option<&str>,
        model: Option<&str>,
        is_default: bool,
    ) -> Result<Worker> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if is_default {
            tx.execute("UPDATE workers SET is_default = 0", [])?;
        }
        tx.execute(
            "INSERT INTO workers (name, system_prompt, description, model, is_default) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, system_prompt, description, model, is_default],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        drop(conn);
        self.get_worker(id)?.ok_or_else(|| {
            crate::error::DaymonError::Store(rusqlite::Error::QueryReturnedNoRows)
        })
    }

    pub fn get_worker(&self, id: i64) -> Result<Option<Worker>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{} WHERE id = ?1", WORKER_SELECT), [id], row_to_worker)
            .optional()
            .map_err(Into::into)
    }

    pub fn get_default_worker(&self) -> Result<Option<Worker>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{} WHERE is_default = 1", WORKER_SELECT), [], row_to_worker)
            .optional()
            .map_err(Into::into)
    }

    pub fn list_workers(&self) -> Result<Vec<Worker>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", WORKER_SELECT))?;
        let rows = stmt.query_map([], row_to_worker)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn set_default_worker(&self, id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE workers SET is_default = 0", [])?;
        tx.execute("UPDATE workers SET is_default = 1 WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_worker(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM workers WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn increment_worker_task_count(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("UPDATE workers SET task_count = task_count + 1 WHERE id = ?1", [id])?;
        Ok(())
    }
}

const WORKER_SELECT: &str =
    "SELECT id, name, system_prompt, description, model, is_default, task_count FROM workers";

fn row_to_worker(row: &rusqlite::Row) -> rusqlite::Result<Worker> {
    Ok(Worker {
        id: row.get(0)?,
        name: row.get(1)?,
        system_prompt: row.get(2)?,
        description: row.get(3)?,
        model: row.get(4)?,
        is_default: row.get(5)?,
        task_count: row.get(6)?,
    })
}
