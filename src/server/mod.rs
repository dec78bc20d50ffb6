//! Control Surface: loopback HTTP for health, ad-hoc runs, sync, shutdown,
//! and an SSE feed of task lifecycle events (spec §4.6).
//!
//! Router/state/error shape is grounded in the teacher's
//! `proxy/server.rs` + `proxy/api/mod.rs` (`ApiError` → `IntoResponse`,
//! state passed via `.with_state()`, `axum::serve(...).with_graceful_shutdown(...)`).
//! The teacher has no live SSE broadcast endpoint (its `sse/mod.rs` only
//! parses historical batches) — `/events` here is built straight from
//! axum's own `Sse`/`BroadcastStream` primitives, noted in DESIGN.md as a
//! fresh extension of the teacher's pattern rather than a copy of one.

mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::notifier::Notifier;
use crate::runner::RunningTasks;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::watcher::Watcher;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub scheduler: Arc<Scheduler>,
    pub watcher: Arc<Watcher>,
    pub notifier: Arc<Notifier>,
    pub running: Arc<RunningTasks>,
    pub results_dir: PathBuf,
    pub start_time: Instant,
    pub shutdown_tx: Arc<std::sync::Mutex<Option<oneshot::Sender<()>>>>,
}

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "control surface internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/events", get(routes::events))
        .route("/tasks/:id/run", post(routes::run_task))
        .route("/notify", post(routes::notify))
        .route("/sync", post(routes::sync))
        .route("/shutdown", post(routes::shutdown))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

/// Bind on an OS-assigned (or requested) loopback port, write the discovery
/// files, and serve until either a `POST /shutdown` or the process-level
/// shutdown signal fires. Returns the discovery-file paths so the caller can
/// remove them on the way out.
pub async fn serve(
    requested_port: u16,
    data_dir: PathBuf,
    state: AppState,
    shutdown_rx: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], requested_port));
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let port_path = data_dir.join("sidecar.port");
    let pid_path = data_dir.join("sidecar.pid");
    write_discovery_file(&port_path, &local_addr.port().to_string())?;
    write_discovery_file(&pid_path, &std::process::id().to_string())?;

    tracing::info!(port = local_addr.port(), "control surface listening");

    let app = build_router(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await;

    let _ = std::fs::remove_file(&port_path);
    let _ = std::fs::remove_file(&pid_path);

    result.map_err(Into::into)
}

/// Atomic-enough for a single-writer local file: write to a temp path in the
/// same directory, then rename over the target.
fn write_discovery_file(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}
