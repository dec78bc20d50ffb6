//! Scheduler: translate persistent task definitions into wall-clock triggers
//! (spec §4.4).
//!
//! The source's `scheduledJobs: map<task_id, job_handle>` becomes an async
//! `HashMap<i64, JoinHandle<()>>` behind a tokio mutex: one tokio task per
//! cron job sleeps until its next fire time and loops, so "stop the job" is
//! just `JoinHandle::abort()` — no separate cancellation-token plumbing
//! needed. The sync cycle and the embedding indexer are each their own
//! `tokio::time::interval` loop, spawned once at startup (spec §9: avoid
//! module-level globals — everything here lives behind `Arc<Scheduler>`,
//! passed down rather than reached for as a static).

mod cron_expr;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::embedding::{self, EmbeddingEngine};
use crate::executor::TaskExecutor;
use crate::notifier::Notifier;
use crate::runner::{self, RunningTasks};
use crate::store::types::Embedding;
use crate::store::Store;

pub const SYNC_INTERVAL: Duration = Duration::from_secs(30);
pub const EMBEDDING_INTERVAL: Duration = Duration::from_secs(5 * 60);
const EMBEDDING_BATCH: i64 = 20;

pub struct SchedulerSnapshot {
    pub running: bool,
    pub job_count: usize,
    pub jobs: Vec<i64>,
}

pub struct Scheduler {
    store: Store,
    executor: Arc<dyn TaskExecutor>,
    notifier: Arc<Notifier>,
    running: Arc<RunningTasks>,
    results_dir: PathBuf,
    embedder: Arc<dyn EmbeddingEngine>,
    scheduled_jobs: AsyncMutex<HashMap<i64, JoinHandle<()>>>,
    pending_once: AsyncMutex<HashSet<i64>>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        executor: Arc<dyn TaskExecutor>,
        notifier: Arc<Notifier>,
        running: Arc<RunningTasks>,
        results_dir: PathBuf,
        embedder: Arc<dyn EmbeddingEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            executor,
            notifier,
            running,
            results_dir,
            embedder,
            scheduled_jobs: AsyncMutex::new(HashMap::new()),
            pending_once: AsyncMutex::new(HashSet::new()),
        })
    }

    /// Spawn the periodic sync and embedding-indexer loops. Callers keep the
    /// returned handles to await them at shutdown.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let sync_self = self.clone();
        let sync_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SYNC_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(err) = sync_self.sync().await {
                    tracing::warn!(error = %err, "scheduler sync failed, retrying next tick");
                }
            }
        });

        let embed_self = self.clone();
        let embed_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EMBEDDING_INTERVAL);
            loop {
                ticker.tick().await;
                embed_self.run_embedding_indexer();
            }
        });

        vec![sync_handle, embed_handle]
    }

    pub async fn snapshot(&self) -> SchedulerSnapshot {
        let jobs = self.scheduled_jobs.lock().await;
        SchedulerSnapshot { running: true, job_count: jobs.len(), jobs: jobs.keys().copied().collect() }
    }

    /// One sync cycle (spec §4.4): stale-run sweep, cron job reconciliation,
    /// due-once dispatch. Called on the 30s tick and from `POST /sync`.
    pub async fn sync(self: &Arc<Self>) -> crate::error::Result<()> {
        let max_age_minutes = self.store.stale_run_max_age_minutes()?;
        let swept = self.store.sweep_stale_runs(max_age_minutes)?;
        if swept > 0 {
            tracing::warn!(swept, max_age_minutes, "swept stale running task runs");
        }

        let retention_days = self.store.retention_days()?;
        let _ = self.store.prune_old_runs(retention_days)?;

        let active = self.store.list_active_tasks()?;
        let active_cron_ids: HashSet<i64> =
            active.iter().filter(|t| t.trigger_type == "cron").map(|t| t.id).collect();

        {
            let mut jobs = self.scheduled_jobs.lock().await;
            let stale: Vec<i64> = jobs.keys().copied().filter(|id| !active_cron_ids.contains(id)).collect();
            for id in stale {
                if let Some(handle) = jobs.remove(&id) {
                    handle.abort();
                }
            }
        }

        for task in active.iter().filter(|t| t.trigger_type == "cron") {
            let already_scheduled = self.scheduled_jobs.lock().await.contains_key(&task.id);
            if already_scheduled {
                continue;
            }
            let Some(expr) = &task.cron_expression else { continue };
            match cron_expr::parse_cron(expr) {
                Ok(schedule) => {
                    let handle = self.spawn_cron_job(task.id, schedule);
                    self.scheduled_jobs.lock().await.insert(task.id, handle);
                }
                Err(err) => {
                    tracing::warn!(task_id = task.id, cron_expression = %expr, error = %err, "invalid cron expression, skipping");
                }
            }
        }

        self.check_due_once_tasks().await?;
        Ok(())
    }

    fn spawn_cron_job(self: &Arc<Self>, task_id: i64, schedule: cron::Schedule) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(chrono::Utc).next() else { break };
                let wait = (next - chrono::Utc::now()).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(wait).await;
                scheduler.run_task(task_id).await;
            }
        })
    }

    /// Due-once dispatch (spec §4.4): query, guard against duplicate
    /// dispatch within the same tick via `pending_once`, always clear the
    /// guard, transition to completed only after a successful run.
    async fn check_due_once_tasks(self: &Arc<Self>) -> crate::error::Result<()> {
        let due = self.store.due_once_tasks()?;
        for task in due {
            {
                let mut pending = self.pending_once.lock().await;
                if !pending.insert(task.id) {
                    continue;
                }
            }
            let scheduler = self.clone();
            tokio::spawn(async move {
                let outcome = scheduler.run_task(task.id).await;
                if outcome.success {
                    if let Err(err) = scheduler.store.set_task_status(task.id, "completed") {
                        tracing::warn!(task_id = task.id, error = %err, "failed to complete one-shot task");
                    }
                }
                scheduler.pending_once.lock().await.remove(&task.id);
            });
        }
        Ok(())
    }

    /// Cron/once dispatch path: loads the task (for logging/notification),
    /// runs it, forwards the outcome to the Notifier.
    async fn run_task(self: &Arc<Self>, task_id: i64) -> runner::TaskOutcome {
        let task = match self.store.get_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::warn!(task_id, "scheduled task vanished before dispatch");
                return runner::TaskOutcome {
                    success: false,
                    output: String::new(),
                    error_message: Some("task not found".to_string()),
                    duration_ms: 0,
                    result_file_path: None,
                };
            }
            Err(err) => {
                tracing::warn!(task_id, error = %err, "failed to load task for dispatch");
                return runner::TaskOutcome {
                    success: false,
                    output: String::new(),
                    error_message: Some(err.to_string()),
                    duration_ms: 0,
                    result_file_path: None,
                };
            }
        };

        let outcome =
            runner::execute_task(task_id, &self.store, self.executor.as_ref(), &self.results_dir, &self.running).await;

        if outcome.success {
            self.notifier.notify_success(&task, &outcome.output, outcome.duration_ms);
        } else if let Some(message) = &outcome.error_message {
            self.notifier.notify_failure(&task, message);
        }
        outcome
    }

    /// Ad-hoc run (Control Surface `POST /tasks/{id}/run`, spec §4.4): flip
    /// paused tasks to active for the duration of the run, restore after,
    /// best-effort.
    pub async fn run_adhoc(self: &Arc<Self>, task_id: i64) -> runner::TaskOutcome {
        let original_status = match self.store.get_task(task_id) {
            Ok(Some(task)) => Some(task.status),
            _ => None,
        };

        let mut flipped = false;
        if let Some(status) = &original_status {
            if status != "active" {
                match self.store.set_task_status(task_id, "active") {
                    Ok(()) => flipped = true,
                    Err(err) => tracing::warn!(task_id, error = %err, "failed to activate task for ad-hoc run"),
                }
            }
        }

        let outcome = self.run_task(task_id).await;

        if flipped {
            if let Some(status) = original_status {
                if let Err(err) = self.store.set_task_status(task_id, &status) {
                    tracing::warn!(task_id, error = %err, "failed to restore task status after ad-hoc run");
                }
            }
        }

        outcome
    }

    /// Embedding indexer (spec §4.4): up to `EMBEDDING_BATCH` never-embedded
    /// entities per tick. All failures are non-fatal and logged.
    fn run_embedding_indexer(&self) {
        let ids = match self.store.list_unembedded_entities(EMBEDDING_BATCH) {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list unembedded entities");
                return;
            }
        };

        for entity_id in ids {
            let entity = match self.store.get_entity(entity_id) {
                Ok(Some(entity)) => entity,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(entity_id, error = %err, "failed to load entity for embedding");
                    continue;
                }
            };

            let text = format!("{} {}", entity.name, entity.category.clone().unwrap_or_default());
            let Some(vector) = self.embedder.embed(&text) else { continue };

            let embedding = Embedding {
                entity_id,
                source_type: "entity".to_string(),
                source_id: entity_id,
                text_hash: embedding::text_hash(&text),
                vector: embedding::vector_to_blob(&vector),
                model: self.embedder.model_name().to_string(),
                dimensions: vector.len() as i64,
            };
            if let Err(err) = self.store.upsert_embedding(&embedding) {
                tracing::warn!(entity_id, error = %err, "failed to upsert embedding");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NoopEmbeddingEngine;
    use crate::executor::mock::MockExecutor;
    use crate::executor::ExecutorOutcome;

    fn test_scheduler() -> (Arc<Scheduler>, tempfile::TempDir, Arc<MockExecutor>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("daymon.db")).unwrap();
        let executor = Arc::new(MockExecutor::new(vec![ExecutorOutcome {
            exit_code: 0,
            stdout: "done".to_string(),
            stderr: String::new(),
            duration_ms: 5,
            timed_out: false,
            session_id: None,
        }]));
        let notifier = Arc::new(Notifier::new(store.clone()));
        let scheduler = Scheduler::new(
            store,
            executor.clone(),
            notifier,
            Arc::new(RunningTasks::new()),
            dir.path().join("results"),
            Arc::new(NoopEmbeddingEngine),
        );
        (scheduler, dir, executor)
    }

    // Scenario C: one-shot task due in the past dispatches exactly once and completes.
    #[tokio::test]
    async fn due_once_task_dispatches_and_completes() {
        let (scheduler, _dir, executor) = test_scheduler();
        let scheduled_at = (chrono::Utc::now() - chrono::Duration::minutes(2)).to_rfc3339();
        let task = scheduler
            .store
            .create_task("Backup", None, "x", "claude", "once", None, Some(&scheduled_at), None, None, None, false, None)
            .unwrap();

        scheduler.sync().await.unwrap();
        // pending_once dispatch spawns a detached task; give it a tick to run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(executor.call_count(), 1);
        let updated = scheduler.store.get_task(task.id).unwrap().unwrap();
        assert_eq!(updated.status, "completed");
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_skipped_not_fatal() {
        let (scheduler, _dir, _executor) = test_scheduler();
        scheduler
            .store
            .create_task("Bad", None, "x", "claude", "cron", Some("nonsense"), None, None, None, None, false, None)
            .unwrap();
        assert!(scheduler.sync().await.is_ok());
        assert_eq!(scheduler.scheduled_jobs.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn ad_hoc_run_restores_paused_status() {
        let (scheduler, _dir, executor) = test_scheduler();
        let task = scheduler
            .store
            .create_task("Manual", None, "x", "claude", "manual", None, None, None, None, None, false, None)
            .unwrap();
        scheduler.store.pause_task(task.id).unwrap();

        let outcome = scheduler.run_adhoc(task.id).await;
        assert!(outcome.success);
        assert_eq!(executor.call_count(), 1);

        let restored = scheduler.store.get_task(task.id).unwrap().unwrap();
        assert_eq!(restored.status, "paused");
    }
}
