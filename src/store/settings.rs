//! Scalar key/value settings (spec §3). Holds the runtime-tunable values
//! SPEC_FULL's Open Question resolutions assign here rather than to env
//! vars, since they need to be shared across sibling processes: the
//! retention window, the default nudge mode, and quiet hours.

use rusqlite::{params, OptionalExtension};

use super::Store;
use crate::error::Result;

pub const RETENTION_DAYS: &str = "retention_days";
pub const DEFAULT_NUDGE_MODE: &str = "default_nudge_mode";
pub const QUIET_HOURS_FROM: &str = "quiet_hours_from";
pub const QUIET_HOURS_UNTIL: &str = "quiet_hours_until";
pub const NOTIFICATIONS_ENABLED: &str = "notifications_enabled";
pub const STALE_RUN_MAX_AGE_MINUTES: &str = "stale_run_max_age_minutes";

impl Store {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get_setting(key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn retention_days(&self) -> Result<i64> {
        Ok(self.get_setting_or(RETENTION_DAYS, "30")?.parse().unwrap_or(30))
    }

    /// Default of 60 minutes: twice the executor's default 30-minute task
    /// timeout (`executor::DEFAULT_TIMEOUT`), so the periodic sweep never
    /// reaps a run that is merely running long under its own configured
    /// timeout — only one truly abandoned by a dead process.
    pub fn stale_run_max_age_minutes(&self) -> Result<i64> {
        Ok(self.get_setting_or(STALE_RUN_MAX_AGE_MINUTES, "60")?.parse().unwrap_or(60))
    }
}
