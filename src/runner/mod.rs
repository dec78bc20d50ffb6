//! Task Runner: execute one task end-to-end (spec §4.3).
//!
//! The single "translating boundary" (spec §7) — everything below (executor
//! spawn/runtime errors, memory/embedding writes) is coerced into a
//! `TaskOutcome`; callers (Scheduler, Control Surface) only ever see
//! `{success, error_message}` and decide how to notify.

mod memory;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::executor::{ConsoleEvent, ExecutorOptions, ExecutorOutcome, ProgressEvent, TaskExecutor};
use crate::store::types::{ConsoleLogEntry, Task, TaskRun, TaskStatus};
use crate::store::Store;

/// Below this many prior runs sharing a session id, a continuing task
/// resumes it; at or above, the session rotates (spec §4.3 Session decision).
const SESSION_ROTATION_THRESHOLD: i64 = 20;

const MAX_OBSERVATION_CHARS: usize = 2_000;
const MAX_OBSERVATIONS_KEPT: i64 = 10;
const MAX_FILENAME_CHARS: usize = 50;

/// In-process fast-path re-entrancy guard (spec §5) — the cross-process
/// invariant lives in the Store (`latest_run_is_running`).
#[derive(Default)]
pub struct RunningTasks(Mutex<HashSet<i64>>);

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, task_id: i64) -> bool {
        self.0.lock().unwrap().insert(task_id)
    }

    fn release(&self, task_id: i64) {
        self.0.lock().unwrap().remove(&task_id);
    }
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub success: bool,
    pub output: String,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub result_file_path: Option<String>,
}

/// Execute `task_id` end to end: pre-flight checks, setup, worker/session
/// resolution, prompt composition, execution (with one resume retry),
/// finalization and memory write-back. Always releases the in-memory lock.
pub async fn execute_task(
    task_id: i64,
    store: &Store,
    executor: &dyn TaskExecutor,
    results_dir: &Path,
    running: &RunningTasks,
) -> TaskOutcome {
    if !running.try_acquire(task_id) {
        return fail_fast("already running");
    }

    let outcome = execute_task_locked(task_id, store, executor, results_dir).await;
    running.release(task_id);
    outcome
}

async fn execute_task_locked(
    task_id: i64,
    store: &Store,
    executor: &dyn TaskExecutor,
    results_dir: &Path,
) -> TaskOutcome {
    match store.latest_run_is_running(task_id) {
        Ok(true) => return fail_fast("running in another process"),
        Ok(false) => {}
        Err(err) => return fail_fast(&err.to_string()),
    }

    let task = match store.get_task(task_id) {
        Ok(Some(task)) => task,
        Ok(None) => return fail_fast("task not found"),
        Err(err) => return fail_fast(&err.to_string()),
    };
    if task.status != TaskStatus::Active.as_str() {
        return fail_fast("task is not active");
    }

    let run = match store.create_run(task_id) {
        Ok(run) => run,
        Err(err) => return fail_fast(&err.to_string()),
    };

    match run_task_body(&task, &run, store, executor, results_dir).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let message = err.to_string();
            let _ = store.complete_run(run.id, "", None, Some(&message));
            TaskOutcome {
                success: false,
                output: String::new(),
                error_message: Some(message),
                duration_ms: 0,
                result_file_path: None,
            }
        }
    }
}

async fn run_task_body(
    task: &Task,
    run: &TaskRun,
    store: &Store,
    executor: &dyn TaskExecutor,
    results_dir: &Path,
) -> Result<TaskOutcome> {
    let worker = match task.worker_id {
        Some(worker_id) => store.get_worker(worker_id)?,
        None => store.get_default_worker()?,
    };
    let system_prompt = worker.as_ref().and_then(|w| w.system_prompt.clone());
    let model = worker.as_ref().and_then(|w| w.model.clone());

    let mut resume_session_id = None;
    if task.session_continuity {
        if let Some(session_id) = &task.session_id {
            let prior_runs = store.count_runs_with_session(task.id, session_id)?;
            if prior_runs < SESSION_ROTATION_THRESHOLD {
                resume_session_id = Some(session_id.clone());
            }
        }
    }

    let context = if resume_session_id.is_some() {
        memory::compose_cross_task_context(store, task)?
    } else {
        memory::compose_full_context(store, task)?
    };
    let prompt = memory::compose_prompt(context.as_deref(), &task.prompt);

    let timeout = task.timeout_minutes.map(|minutes| Duration::from_secs((minutes.max(0) as u64) * 60));
    let options = ExecutorOptions {
        timeout,
        resume_session_id: resume_session_id.clone(),
        system_prompt: system_prompt.clone(),
        model: model.clone(),
    };

    let first = run_executor_with_sinks(executor, &prompt, options, store, run.id).await;

    let executor_outcome = if first.exit_code != 0 && resume_session_id.is_some() {
        store.set_task_session_id(task.id, None)?;
        let retry_context = memory::compose_full_context(store, task)?;
        let retry_prompt = memory::compose_prompt(retry_context.as_deref(), &task.prompt);
        let retry_options = ExecutorOptions { timeout, resume_session_id: None, system_prompt, model };
        run_executor_with_sinks(executor, &retry_prompt, retry_options, store, run.id).await
    } else {
        first
    };

    finalize(task, run, store, results_dir, executor_outcome)
}

async fn run_executor_with_sinks(
    executor: &dyn TaskExecutor,
    prompt: &str,
    options: ExecutorOptions,
    store: &Store,
    run_id: i64,
) -> ExecutorOutcome {
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let (console_tx, console_rx) = mpsc::unbounded_channel();

    let progress_handle = tokio::spawn(run_progress_sink(store.clone(), run_id, progress_rx));
    let console_handle = tokio::spawn(run_console_sink(store.clone(), run_id, console_rx));

    let outcome = executor.execute(prompt, options, progress_tx, console_tx).await;

    let _ = progress_handle.await;
    let _ = console_handle.await;

    outcome
}

/// Throttled (≥1s spacing) progress writes (spec §4.3).
async fn run_progress_sink(store: Store, run_id: i64, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    let mut last_write: Option<Instant> = None;
    while let Some(event) = rx.recv().await {
        let now = Instant::now();
        let due = last_write.map(|t| now.duration_since(t) >= Duration::from_secs(1)).unwrap_or(true);
        if due {
            if let Err(err) = store.update_run_progress(run_id, event.fraction, Some(&event.message)) {
                tracing::warn!(run_id, error = %err, "progress update failed");
            }
            last_write = Some(now);
        }
    }
}

/// Buffered console log sink: flush every 1s or when the channel closes,
/// whichever is sooner (spec §4.3). Flush failures are logged, non-fatal.
async fn run_console_sink(store: Store, run_id: i64, mut rx: mpsc::UnboundedReceiver<ConsoleEvent>) {
    let mut buffer: Vec<(i64, ConsoleLogEntry)> = Vec::new();
    let mut seq: i64 = 0;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        seq += 1;
                        buffer.push((seq, ConsoleLogEntry { entry_type: event.entry_type, content: event.content }));
                    }
                    None => {
                        flush_console(&store, run_id, &mut buffer);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                flush_console(&store, run_id, &mut buffer);
            }
        }
    }
}

fn flush_console(store: &Store, run_id: i64, buffer: &mut Vec<(i64, ConsoleLogEntry)>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    if let Err(err) = store.append_console_logs(run_id, &batch) {
        tracing::warn!(run_id, error = %err, "console log flush failed");
    }
}

fn finalize(
    task: &Task,
    run: &TaskRun,
    store: &Store,
    results_dir: &Path,
    executor_outcome: ExecutorOutcome,
) -> Result<TaskOutcome> {
    let (success, error_message) = if executor_outcome.timed_out {
        (false, Some(format!("Timed out after {}ms", executor_outcome.duration_ms)))
    } else if executor_outcome.exit_code != 0 {
        let stderr = if executor_outcome.stderr.trim().is_empty() {
            "(no stderr)".to_string()
        } else {
            executor_outcome.stderr.clone()
        };
        (false, Some(format!("Exit code {}: {stderr}", executor_outcome.exit_code)))
    } else {
        (true, None)
    };
    let output = executor_outcome.stdout.clone();

    let finished_at = chrono::Utc::now();
    let result_file_path = write_result_file(
        results_dir,
        &task.name,
        finished_at,
        executor_outcome.duration_ms,
        success,
        executor_outcome.timed_out,
        executor_outcome.exit_code,
        &output,
    )?;

    store.update_run_session_id(run.id, executor_outcome.session_id.as_deref())?;
    if task.session_continuity {
        store.set_task_session_id(task.id, executor_outcome.session_id.as_deref())?;
    }

    store.complete_run(run.id, &output, Some(&result_file_path), error_message.as_deref())?;

    let entity_id = ensure_memory_entity(store, task)?;
    let marker = if success { "[SUCCESS]" } else { "[FAILED]" };
    let observation = truncate_with_marker(&format!("{marker} {output}"), MAX_OBSERVATION_CHARS);
    store.add_observation(entity_id, &observation, Some("task_run"))?;
    store.prune_observations(entity_id, MAX_OBSERVATIONS_KEPT)?;

    Ok(TaskOutcome {
        success,
        output,
        error_message,
        duration_ms: executor_outcome.duration_ms,
        result_file_path: Some(result_file_path),
    })
}

fn ensure_memory_entity(store: &Store, task: &Task) -> Result<i64> {
    if let Some(id) = task.memory_entity_id {
        return Ok(id);
    }
    let entity = store.create_entity(&format!("Task: {}", task.name), "task_result", Some("task"))?;
    store.set_task_memory_entity(task.id, entity.id)?;
    Ok(entity.id)
}

fn truncate_with_marker(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut truncated: String = s.chars().take(max).collect();
        truncated.push_str("\n[...truncated]");
        truncated
    }
}

fn sanitize_filename(name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^A-Za-z0-9]+").unwrap());
    let cleaned = re.replace_all(name, "-").trim_matches('-').to_string();
    let cleaned = if cleaned.is_empty() { "task".to_string() } else { cleaned };
    cleaned.chars().take(MAX_FILENAME_CHARS).collect()
}

#[allow(clippy::too_many_arguments)]
fn write_result_file(
    results_dir: &Path,
    task_name: &str,
    finished_at: chrono::DateTime<chrono::Utc>,
    duration_ms: i64,
    success: bool,
    timed_out: bool,
    exit_code: i32,
    output: &str,
) -> Result<String> {
    std::fs::create_dir_all(results_dir)?;

    let slug = sanitize_filename(task_name);
    let timestamp = finished_at.to_rfc3339().replace(':', "-");
    let path = results_dir.join(format!("{slug}-{timestamp}.md"));

    let status_line = if timed_out {
        "Timed Out".to_string()
    } else if !success {
        format!("Failed (exit {exit_code})")
    } else {
        "Success".to_string()
    };
    let seconds = duration_ms as f64 / 1000.0;
    let local_date = finished_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S");

    let body = format!(
        "# Task: {task_name}\n\n**Date:** {local_date}\n**Duration:** {seconds:.1}s\n**Status:** {status_line}\n\n---\n\n{output}\n"
    );
    std::fs::write(&path, body)?;
    Ok(path.to_string_lossy().to_string())
}

fn fail_fast(message: &str) -> TaskOutcome {
    TaskOutcome {
        success: false,
        output: String::new(),
        error_message: Some(message.to_string()),
        duration_ms: 0,
        result_file_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::MockExecutor;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("daymon.db")).unwrap();
        (store, dir)
    }

    fn seed_task(store: &Store, max_runs: Option<i64>) -> Task {
        store
            .create_task(
                "Digest",
                None,
                "Summarize",
                "claude",
                "manual",
                None,
                None,
                None,
                max_runs,
                None,
                false,
                None,
            )
            .unwrap()
    }

    fn outcome(exit_code: i32, stdout: &str, timed_out: bool, duration_ms: i64, session_id: Option<&str>) -> ExecutorOutcome {
        ExecutorOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration_ms,
            timed_out,
            session_id: session_id.map(str::to_string),
        }
    }

    // Scenario A: cron/manual task succeeds.
    #[tokio::test]
    async fn successful_run_completes_and_writes_memory() {
        let (store, results_dir) = test_store();
        let task = seed_task(&store, None);
        let executor = MockExecutor::new(vec![outcome(0, "Hello world", false, 1234, None)]);
        let running = RunningTasks::new();

        let result = execute_task(task.id, &store, &executor, results_dir.path(), &running).await;

        assert!(result.success);
        assert_eq!(result.output, "Hello world");
        assert_eq!(result.duration_ms, 1234);

        let run = store.latest_run_for_task(task.id).unwrap().unwrap();
        assert_eq!(run.status, "completed");
        assert_eq!(run.result.as_deref(), Some("Hello world"));

        let updated = store.get_task(task.id).unwrap().unwrap();
        assert!(updated.last_run.is_some());
        assert_eq!(updated.error_count, 0);

        let result_file = std::fs::read_to_string(result.result_file_path.unwrap()).unwrap();
        assert!(result_file.starts_with("# Task: Digest"));
        assert!(result_file.contains("Success"));
    }

    // Scenario B: timeout.
    #[tokio::test]
    async fn timeout_marks_run_failed_with_message_and_memory() {
        let (store, results_dir) = test_store();
        let task = seed_task(&store, None);
        let executor = MockExecutor::new(vec![outcome(1, "", true, 300_000, None)]);
        let running = RunningTasks::new();

        let result = execute_task(task.id, &store, &executor, results_dir.path(), &running).await;

        assert!(!result.success);
        assert!(result.error_message.unwrap().starts_with("Timed out after 300000ms"));

        let updated = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(updated.error_count, 1);

        let entity_id = updated.memory_entity_id.unwrap();
        let observations = store.list_observations(entity_id, Some(1)).unwrap();
        assert!(observations[0].content.starts_with("[FAILED]"));
    }

    // Scenario D: max_runs auto-complete, third run rejected pre-flight.
    #[tokio::test]
    async fn max_runs_auto_completes_and_blocks_further_dispatch() {
        let (store, results_dir) = test_store();
        let task = seed_task(&store, Some(2));
        let executor = MockExecutor::new(vec![outcome(0, "ok", false, 10, None)]);
        let running = RunningTasks::new();

        execute_task(task.id, &store, &executor, results_dir.path(), &running).await;
        execute_task(task.id, &store, &executor, results_dir.path(), &running).await;

        let after_two = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(after_two.status, "completed");
        assert_eq!(after_two.run_count, 2);

        let third = execute_task(task.id, &store, &executor, results_dir.path(), &running).await;
        assert!(!third.success);
        assert_eq!(third.error_message.as_deref(), Some("task is not active"));

        let after_three = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(after_three.run_count, 2);
        assert_eq!(after_three.status, "completed");
    }

    // Scenario F: session rotation past the threshold.
    #[tokio::test]
    async fn session_rotates_after_threshold_runs() {
        let (store, results_dir) = test_store();
        let task = store
            .create_task(
                "Chat", None, "Continue", "claude", "manual", None, None, None, None, None, true, None,
            )
            .unwrap();
        store.set_task_session_id(task.id, Some("S")).unwrap();

        for _ in 0..SESSION_ROTATION_THRESHOLD {
            store.create_run(task.id).unwrap();
            let run = store.latest_run_for_task(task.id).unwrap().unwrap();
            store.update_run_session_id(run.id, Some("S")).unwrap();
            store.complete_run(run.id, "ok", None, None).unwrap();
        }

        let executor = MockExecutor::new(vec![outcome(0, "fresh", false, 5, Some("S-prime"))]);
        let running = RunningTasks::new();
        let result = execute_task(task.id, &store, &executor, results_dir.path(), &running).await;

        assert!(result.success);
        let calls = executor.calls();
        assert_eq!(calls.last().unwrap().resume_session_id, None);

        let updated = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(updated.session_id.as_deref(), Some("S-prime"));
    }

    // Scenario G: resume failure triggers exactly one retry with no resume.
    #[tokio::test]
    async fn resume_failure_retries_once_without_resume() {
        let (store, results_dir) = test_store();
        let task = store
            .create_task(
                "Chat", None, "Continue", "claude", "manual", None, None, None, None, None, true, None,
            )
            .unwrap();
        store.set_task_session_id(task.id, Some("S")).unwrap();

        let executor = MockExecutor::new(vec![
            outcome(1, "broken", false, 10, None),
            outcome(0, "recovered", false, 20, Some("S2")),
        ]);
        let running = RunningTasks::new();
        let result = execute_task(task.id, &store, &executor, results_dir.path(), &running).await;

        assert!(result.success);
        assert_eq!(result.output, "recovered");
        assert_eq!(executor.call_count(), 2);
        let calls = executor.calls();
        assert_eq!(calls[0].resume_session_id.as_deref(), Some("S"));
        assert_eq!(calls[1].resume_session_id, None);

        let updated = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(updated.session_id.as_deref(), Some("S2"));
    }

    #[tokio::test]
    async fn same_process_reentrancy_is_rejected() {
        let (store, results_dir) = test_store();
        let task = seed_task(&store, None);
        let running = RunningTasks::new();
        assert!(running.try_acquire(task.id));

        let executor = MockExecutor::new(vec![outcome(0, "ok", false, 1, None)]);
        let result = execute_task(task.id, &store, &executor, results_dir.path(), &running).await;
        assert_eq!(result.error_message.as_deref(), Some("already running"));
    }
}
