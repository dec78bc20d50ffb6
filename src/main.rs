//! Daymon sidecar entry point (spec §1 "the core"): wires Config, Store,
//! logging, and the four concurrent subsystems (Scheduler, File Watcher,
//! Control Surface, plus the AI Executor they all call through), then blocks
//! until SIGINT/SIGTERM or `POST /shutdown` fires a single shutdown sequence.
//!
//! The `#[tokio::main]` + channel-wired-shutdown shape follows the teacher's
//! `main.rs`: an `oneshot` channel carries the shutdown signal into the
//! server's graceful-shutdown future, and every background subsystem's
//! `JoinHandle` is collected and awaited on the way out.

mod cli;
mod config;
mod embedding;
mod error;
mod executor;
mod logging;
mod notifier;
mod runner;
mod scheduler;
mod server;
mod store;
mod watcher;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use clap::Parser;
use tokio::sync::oneshot;

use cli::Cli;
use config::Config;
use embedding::{EmbeddingEngine, NoopEmbeddingEngine};
use executor::ChildProcessExecutor;
use notifier::Notifier;
use runner::RunningTasks;
use scheduler::Scheduler;
use server::AppState;
use store::Store;
use watcher::Watcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli::handle_cli(&cli).await? {
        return Ok(());
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("daymon: configuration error: {err}");
            std::process::exit(1);
        }
    };

    let _log_guard = logging::init(&config.data_dir)?;
    tracing::info!(version = config::VERSION, "daymon starting");

    let store = Store::open(&config.db_path)?;
    let executor: Arc<dyn executor::TaskExecutor> = Arc::new(ChildProcessExecutor::new());
    let running = Arc::new(RunningTasks::new());
    let notifier = Arc::new(Notifier::new(store.clone()));
    let embedder = resolve_embedder();

    let scheduler = Scheduler::new(
        store.clone(),
        executor.clone(),
        notifier.clone(),
        running.clone(),
        config.results_dir.clone(),
        embedder,
    );
    let watcher = Watcher::new(store.clone(), executor.clone());

    let mut background_handles = scheduler.spawn();
    background_handles.push(watcher.spawn());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let state = AppState {
        store,
        scheduler,
        watcher,
        notifier,
        running,
        results_dir: config.results_dir.clone(),
        start_time: Instant::now(),
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
    };
    let shutdown_trigger = state.shutdown_tx.clone();

    let server_handle = tokio::spawn(server::serve(config.requested_port, config.data_dir.clone(), state, shutdown_rx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to install ctrl-c handler");
            }
            tracing::info!("received interrupt, shutting down");
        }
        _ = wait_for_sigterm() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    if let Some(tx) = shutdown_trigger.lock().unwrap().take() {
        let _ = tx.send(());
    }

    for handle in background_handles {
        handle.abort();
    }
    if let Err(err) = server_handle.await {
        tracing::warn!(error = %err, "control surface task did not shut down cleanly");
    }

    tracing::info!("daymon shut down");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

fn resolve_embedder() -> Arc<dyn EmbeddingEngine> {
    #[cfg(feature = "local-embeddings")]
    {
        match embedding::FastEmbedEngine::try_new() {
            Ok(engine) => return Arc::new(engine),
            Err(err) => tracing::warn!(error = %err, "failed to load local embedding model, falling back to no-op"),
        }
    }
    Arc::new(NoopEmbeddingEngine)
}
