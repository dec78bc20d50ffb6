//! Typed error taxonomy for Daymon's internal boundaries.
//!
//! The Task Runner is the translating boundary (see runner::execute_task):
//! everything below here is coerced into a `TaskOutcome`. `main.rs` and the
//! CLI glue use `anyhow` for top-level `?` propagation and human-facing
//! context instead of matching on these variants.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaymonError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("store pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("executor could not locate the AI CLI binary")]
    ExecutorNotFound,

    #[error("executor spawn failed: {0}")]
    ExecutorSpawn(std::io::Error),

    #[error("executor exited with code {code}: {stderr}")]
    ExecutorRuntime { code: i32, stderr: String },

    #[error("executor timed out after {0}ms")]
    ExecutorTimeout(u64),

    #[error("memory operation failed: {0}")]
    Memory(String),

    #[error("watcher error on path {path}: {source}")]
    Watcher {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("control surface error: {0}")]
    ControlSurface(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaymonError>;
