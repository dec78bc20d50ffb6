//! Route handlers for the Control Surface (spec §4.6).

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Json};
use axum::http::StatusCode;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::{ApiError, AppState};
use crate::config::VERSION;
use crate::notifier::NotifyEvent;

pub async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let uptime_s = state.start_time.elapsed().as_secs();
    let snapshot = state.scheduler.snapshot().await;

    Ok(Json(json!({
        "ok": true,
        "uptime_s": uptime_s,
        "version": VERSION,
        "pid": std::process::id(),
        "scheduler": {
            "running": snapshot.running,
            "jobCount": snapshot.job_count,
            "jobs": snapshot.jobs,
        },
    })))
}

pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.notifier.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let event = item.ok()?;
        let name = match &event {
            NotifyEvent::Complete { .. } => "task:complete",
            NotifyEvent::Failed { .. } => "task:failed",
        };
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok(SseEvent::default().event(name).data(data)))
    });
    Sse::new(stream)
}

pub async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    tokio::spawn(async move {
        state.scheduler.run_adhoc(id).await;
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true, "task_id": id }))))
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    event: String,
    task_id: Option<i64>,
    task_name: Option<String>,
    output_excerpt: Option<String>,
    duration_ms: Option<i64>,
    error_message: Option<String>,
}

pub async fn notify(
    State(state): State<AppState>,
    Json(body): Json<NotifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event = match body.event.as_str() {
        "task:complete" => NotifyEvent::Complete {
            task_id: body.task_id.ok_or_else(|| ApiError::BadRequest("task_id required".to_string()))?,
            task_name: body.task_name.unwrap_or_default(),
            output_excerpt: body.output_excerpt.unwrap_or_default(),
            duration_ms: body.duration_ms.unwrap_or(0),
        },
        "task:failed" => NotifyEvent::Failed {
            task_id: body.task_id.ok_or_else(|| ApiError::BadRequest("task_id required".to_string()))?,
            task_name: body.task_name.unwrap_or_default(),
            error_message: body.error_message.unwrap_or_default(),
        },
        other => return Err(ApiError::BadRequest(format!("unknown event kind: {other}"))),
    };
    state.notifier.relay(event);
    Ok(Json(json!({ "relayed": true })))
}

pub async fn sync(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.sync().await.map_err(|err| ApiError::Internal(err.to_string()))?;
    state.watcher.sync().await;
    Ok(Json(json!({ "synced": true })))
}

pub async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(tx) = state.shutdown_tx.lock().unwrap().take() {
        let _ = tx.send(());
    }
    Json(json!({ "shutting_down": true }))
}
