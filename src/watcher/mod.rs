//! File Watcher: translate filesystem change events into AI-CLI invocations
//! for watches (spec §4.5).
//!
//! No example in the retrieval pack reaches for the `notify` crate, so the
//! watcher callback wiring here is fresh — built from the crate's own
//! conventions (`recommended_watcher` + a channel-fed consumer loop) rather
//! than imitated from a pack file. Everything above that line — per-watch
//! execution state, debounce, cooldown, the 30s sync cycle shape — follows
//! the same actor-behind-`Arc` pattern as the Scheduler.

pub mod policy;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::executor::{ExecutorOptions, TaskExecutor};
use crate::store::Store;

pub const SYNC_INTERVAL: Duration = Duration::from_secs(30);
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(10);
const POST_EXEC_COOLDOWN: Duration = Duration::from_secs(5);
/// Directories recurse at most 2 levels from the watch root (spec §4.5).
const MAX_RECURSE_DEPTH: usize = 2;

struct WatchRuntime {
    watch_id: i64,
    root: PathBuf,
    is_dir: bool,
    executing: AtomicBool,
    cooldown_until: Mutex<Option<Instant>>,
}

struct LiveWatch {
    _watcher: RecommendedWatcher,
    consumer: JoinHandle<()>,
}

pub struct Watcher {
    store: Store,
    executor: Arc<dyn TaskExecutor>,
    live: AsyncMutex<HashMap<i64, LiveWatch>>,
    debounce: Mutex<HashMap<String, Instant>>,
}

impl Watcher {
    pub fn new(store: Store, executor: Arc<dyn TaskExecutor>) -> Arc<Self> {
        Arc::new(Self { store, executor, live: AsyncMutex::new(HashMap::new()), debounce: Mutex::new(HashMap::new()) })
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let watcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SYNC_INTERVAL);
            loop {
                ticker.tick().await;
                watcher.sync().await;
            }
        })
    }

    /// Reconcile active watches against the live map (spec §4.5 Setup).
    /// Called on the 30s tick and from `POST /sync`.
    pub async fn sync(self: &Arc<Self>) {
        let active = match self.store.list_active_watches() {
            Ok(watches) => watches,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list active watches, retrying next tick");
                return;
            }
        };
        let active_ids: std::collections::HashSet<i64> = active.iter().map(|w| w.id).collect();

        {
            let mut live = self.live.lock().await;
            let stale: Vec<i64> = live.keys().copied().filter(|id| !active_ids.contains(id)).collect();
            for id in stale {
                if let Some(entry) = live.remove(&id) {
                    entry.consumer.abort();
                }
            }
        }

        for watch in active {
            let already_live = self.live.lock().await.contains_key(&watch.id);
            if already_live {
                continue;
            }
            self.start_watch(watch.id, &watch.path).await;
        }
    }

    async fn start_watch(self: &Arc<Self>, watch_id: i64, path_str: &str) {
        let path = Path::new(path_str).to_path_buf();
        if !path.exists() {
            tracing::warn!(watch_id, path = %path.display(), "watch path missing, will retry next sync");
            return;
        }
        let is_dir = path.is_dir();

        let (tx, rx) = mpsc::unbounded_channel();
        let root = path.clone();
        let callback_root = root.clone();
        let result = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(watch_id, error = %err, "watcher event error");
                    return;
                }
            };
            for event_path in event.paths {
                if is_dir && !depth_allowed(&callback_root, &event_path) {
                    continue;
                }
                let _ = tx.send(event_path);
            }
        });

        let mut notify_watcher = match result {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!(watch_id, error = %err, "failed to construct watcher");
                return;
            }
        };

        let mode = if is_dir { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
        if let Err(err) = notify_watcher.watch(&path, mode) {
            tracing::warn!(watch_id, path = %path.display(), error = %err, "failed to start watch");
            return;
        }

        let runtime = Arc::new(WatchRuntime {
            watch_id,
            root,
            is_dir,
            executing: AtomicBool::new(false),
            cooldown_until: Mutex::new(None),
        });
        let watcher_self = self.clone();
        let consumer = tokio::spawn(async move {
            watcher_self.run_consumer(runtime, rx).await;
        });

        self.live.lock().await.insert(watch_id, LiveWatch { _watcher: notify_watcher, consumer });
    }

    async fn run_consumer(self: Arc<Self>, runtime: Arc<WatchRuntime>, mut rx: mpsc::UnboundedReceiver<PathBuf>) {
        while let Some(path) = rx.recv().await {
            self.handle_event(&runtime, path).await;
        }
    }

    /// The event pipeline (spec §4.5): debounce, execution lock + cooldown,
    /// best-effort bookkeeping, execute, release.
    async fn handle_event(&self, runtime: &WatchRuntime, path: PathBuf) {
        let key = format!("{}:{}", runtime.watch_id, path.display());
        let now = Instant::now();

        {
            let debounce = self.debounce.lock().unwrap();
            if let Some(last) = debounce.get(&key) {
                if now.duration_since(*last) < DEBOUNCE_WINDOW {
                    return;
                }
            }
        }

        if runtime.executing.load(Ordering::SeqCst) {
            return;
        }
        {
            let cooldown = runtime.cooldown_until.lock().unwrap();
            if let Some(until) = *cooldown {
                if now < until {
                    return;
                }
            }
        }

        self.debounce.lock().unwrap().insert(key, now);
        let _ = self.store.record_watch_trigger(runtime.watch_id);

        runtime.executing.store(true, Ordering::SeqCst);
        self.fire(runtime.watch_id, &path).await;
        runtime.executing.store(false, Ordering::SeqCst);
        *runtime.cooldown_until.lock().unwrap() = Some(Instant::now() + POST_EXEC_COOLDOWN);
    }

    async fn fire(&self, watch_id: i64, path: &Path) {
        let Ok(Some(watch)) = self.store.get_watch(watch_id) else {
            tracing::warn!(watch_id, "watch vanished before firing");
            return;
        };

        let file_path_json = serde_json::to_string(&path.display().to_string()).unwrap_or_default();
        let prompt = format!("{}\n\nTriggered by file change. File path: {file_path_json}", watch.action_prompt);

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (console_tx, mut console_rx) = mpsc::unbounded_channel();
        let progress_drain = tokio::spawn(async move { while progress_rx.recv().await.is_some() {} });
        let console_drain = tokio::spawn(async move { while console_rx.recv().await.is_some() {} });

        let outcome = self.executor.execute(&prompt, ExecutorOptions::default(), progress_tx, console_tx).await;
        let _ = progress_drain.await;
        let _ = console_drain.await;

        if outcome.exit_code == 0 {
            tracing::info!(watch_id, path = %path.display(), "watch action completed");
        } else {
            tracing::warn!(watch_id, path = %path.display(), exit_code = outcome.exit_code, stderr = %outcome.stderr, "watch action failed");
        }
    }
}

/// Depth relative to the watch root, counted in path separator segments:
/// root's children are depth 1, grandchildren depth 2. Anything deeper, or
/// not under the root at all (unexpected but harmless), is dropped /
/// allowed respectively per spec §4.5.
fn depth_allowed(root: &Path, event_path: &Path) -> bool {
    match event_path.strip_prefix(root) {
        Ok(rel) => rel.components().count() <= MAX_RECURSE_DEPTH,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_allowed_within_two_levels() {
        let root = Path::new("/tmp/watched");
        assert!(depth_allowed(root, Path::new("/tmp/watched/a")));
        assert!(depth_allowed(root, Path::new("/tmp/watched/a/b")));
        assert!(!depth_allowed(root, Path::new("/tmp/watched/a/b/c")));
    }

    #[test]
    fn depth_allowed_for_unrelated_path_defaults_true() {
        assert!(depth_allowed(Path::new("/tmp/watched"), Path::new("/var/other")));
    }
}
