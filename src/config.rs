//! Configuration for the sidecar.
//!
//! Configuration is env-only (see spec §6): `DAYMON_DB_PATH`,
//! `DAYMON_RESULTS_DIR`, `DAYMON_DATA_DIR`, `DAYMON_SIDECAR_PORT`. Runtime
//! tunables that used to live in a config file (default nudge mode, quiet
//! hours, retention window) live in the Store's `Settings` table instead,
//! since they need to be shared across sibling processes.

use std::path::{Path, PathBuf};

use crate::error::{DaymonError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub results_dir: PathBuf,
    pub data_dir: PathBuf,
    pub requested_port: u16,
}

impl Config {
    /// Load from the environment, expanding a leading `~/` to the user's home
    /// and creating `results_dir`/`data_dir` on demand.
    pub fn from_env() -> Result<Self> {
        let db_path_raw = std::env::var("DAYMON_DB_PATH").map_err(|_| {
            DaymonError::Configuration("DAYMON_DB_PATH is required".to_string())
        })?;
        let db_path = expand_home(&db_path_raw);

        let results_dir = std::env::var("DAYMON_RESULTS_DIR")
            .map(|v| expand_home(&v))
            .unwrap_or_else(|_| default_data_subdir("results"));
        let data_dir = std::env::var("DAYMON_DATA_DIR")
            .map(|v| expand_home(&v))
            .unwrap_or_else(|_| default_data_subdir("data"));

        let requested_port = std::env::var("DAYMON_SIDECAR_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(0);

        std::fs::create_dir_all(&results_dir)?;
        std::fs::create_dir_all(&data_dir)?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            db_path,
            results_dir,
            data_dir,
            requested_port,
        })
    }
}

fn default_data_subdir(leaf: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".daymon")
        .join(leaf)
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(raw).to_path_buf()
}
