//! Watch CRUD (filesystem-change triggers, spec §3/§4.5).

use rusqlite::{params, OptionalExtension};

use super::types::Watch;
use super::Store;
use crate::error::Result;

impl Store {
    pub fn create_watch(&self, path: &str, description: Option<&str>, action_prompt: &str) -> Result<Watch> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO watches (path, description, action_prompt) VALUES (?1, ?2, ?3)",
            params![path, description, action_prompt],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_watch(id)?.ok_or_else(|| {
            crate::error::DaymonError::Store(rusqlite::Error::QueryReturnedNoRows)
        })
    }

    pub fn get_watch(&self, id: i64) -> Result<Option<Watch>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{} WHERE id = ?1", WATCH_SELECT), [id], row_to_watch)
            .optional()
            .map_err(Into::into)
    }

    pub fn list_watches(&self, status: Option<&str>) -> Result<Vec<Watch>> {
        let conn = self.conn()?;
        let mut stmt = if status.is_some() {
            conn.prepare(&format!("{} WHERE status = ?1 ORDER BY id", WATCH_SELECT))?
        } else {
            conn.prepare(&format!("{} ORDER BY id", WATCH_SELECT))?
        };
        let rows = if let Some(s) = status {
            stmt.query_map([s], row_to_watch)?
        } else {
            stmt.query_map([], row_to_watch)?
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_active_watches(&self) -> Result<Vec<Watch>> {
        self.list_watches(Some("active"))
    }

    pub fn pause_watch(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("UPDATE watches SET status = 'paused' WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn resume_watch(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("UPDATE watches SET status = 'active' WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn delete_watch(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM watches WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Best-effort bookkeeping on fire (spec §4.5 step 4): never fails the
    /// triggering pipeline if this write fails.
    pub fn record_watch_trigger(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE watches SET trigger_count = trigger_count + 1, last_triggered = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }
}

const WATCH_SELECT: &str = "SELECT id, path, description, action_prompt, status, last_triggered, trigger_count FROM watches";

fn row_to_watch(row: &rusqlite::Row) -> rusqlite::Result<Watch> {
    Ok(Watch {
        id: row.get(0)?,
        path: row.get(1)?,
        description: row.get(2)?,
        action_prompt: row.get(3)?,
        status: row.get(4)?,
        last_triggered: row.get(5)?,
        trigger_count: row.get(6)?,
    })
}
