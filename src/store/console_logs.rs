//! Append-only ConsoleLog stream, keyed by (run_id, seq) with seq strictly
//! increasing from 1 per run (spec §3, invariant 4). Callers own the seq
//! counter (the Task Runner's console-log sink, spec §4.3) and bulk-insert
//! in one transaction.

use rusqlite::params;

use super::types::{ConsoleLog, ConsoleLogEntry};
use super::Store;
use crate::error::Result;

impl Store {
    /// Bulk-insert a batch of already-sequenced console log entries.
    pub fn append_console_logs(&self, run_id: i64, entries: &[(i64, ConsoleLogEntry)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO console_logs (run_id, seq, entry_type, content) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (seq, entry) in entries {
                stmt.execute(params![run_id, seq, entry.entry_type, entry.content])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_console_logs(&self, run_id: i64, from_seq: i64) -> Result<Vec<ConsoleLog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, seq, entry_type, content, created_at FROM console_logs WHERE run_id = ?1 AND seq >= ?2 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![run_id, from_seq], row_to_log)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn max_console_log_seq(&self, run_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM console_logs WHERE run_id = ?1",
            [run_id],
            |r| r.get(0),
        )?)
    }
}

fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<ConsoleLog> {
    Ok(ConsoleLog {
        id: row.get(0)?,
        run_id: row.get(1)?,
        seq: row.get(2)?,
        entry_type: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("daymon.db")).unwrap();
        (store, dir)
    }

    // Invariant 4: all ConsoleLog rows for a run have strictly increasing
    // seq starting at 1, even across multiple flush batches.
    #[test]
    fn console_logs_have_strictly_increasing_seq_across_batches() {
        let (store, _dir) = test_store();
        let task = store
            .create_task("Digest", None, "Summarize", "claude", "manual", None, None, None, None, None, false, None)
            .unwrap();
        let run = store.create_run(task.id).unwrap();

        let first_batch = vec![
            (1, ConsoleLogEntry { entry_type: "tool_call".into(), content: "a".into() }),
            (2, ConsoleLogEntry { entry_type: "assistant_text".into(), content: "b".into() }),
        ];
        store.append_console_logs(run.id, &first_batch).unwrap();

        let second_batch = vec![(3, ConsoleLogEntry { entry_type: "result".into(), content: "c".into() })];
        store.append_console_logs(run.id, &second_batch).unwrap();

        let logs = store.list_console_logs(run.id, 1).unwrap();
        let seqs: Vec<i64> = logs.iter().map(|l| l.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(store.max_console_log_seq(run.id).unwrap(), 3);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let (store, _dir) = test_store();
        let task = store
            .create_task("Digest", None, "Summarize", "claude", "manual", None, None, None, None, None, false, None)
            .unwrap();
        let run = store.create_run(task.id).unwrap();
        store.append_console_logs(run.id, &[]).unwrap();
        assert_eq!(store.max_console_log_seq(run.id).unwrap(), 0);
    }
}
