//! CLI surface: clap derive, grounded in the teacher's `cli.rs`
//! (`Commands` enum + `handle_cli() -> bool` early-exit pattern). Running
//! with no subcommand starts the sidecar; everything else is a one-shot
//! command against either the environment or a running sidecar's `/health`.

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::store::settings;
use crate::store::Store;

#[derive(Parser)]
#[command(name = "daymon", version = crate::config::VERSION, about = "Personal background AI-task daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or change runtime settings (retention window, default nudge mode, quiet hours).
    Settings {
        #[arg(long)]
        show: bool,
        /// key=value, e.g. retention_days=14
        #[arg(long)]
        set: Option<String>,
    },
    /// One-shot health check against a running sidecar.
    Status,
}

/// Dispatch a parsed subcommand. Returns `true` if a command was handled
/// (caller should exit without starting the sidecar).
pub async fn handle_cli(cli: &Cli) -> anyhow::Result<bool> {
    let Some(command) = &cli.command else { return Ok(false) };

    match command {
        Commands::Settings { show, set } => {
            let config = Config::from_env()?;
            let store = Store::open(&config.db_path)?;

            if let Some(pair) = set {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("--set expects key=value"))?;
                store.set_setting(key, value)?;
                println!("{key} = {value}");
            }

            if *show || set.is_none() {
                for (key, value) in store.list_settings()? {
                    println!("{key} = {value}");
                }
                print_defaults_if_unset(&store)?;
            }
            Ok(true)
        }
        Commands::Status => {
            let config = Config::from_env()?;
            let port_path = config.data_dir.join("sidecar.port");
            let port = std::fs::read_to_string(&port_path)
                .map_err(|_| anyhow::anyhow!("no running sidecar found ({} missing)", port_path.display()))?;
            let port = port.trim();

            let client = reqwest::Client::new();
            let response = client.get(format!("http://127.0.0.1:{port}/health")).send().await?;
            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(true)
        }
    }
}

fn print_defaults_if_unset(store: &Store) -> anyhow::Result<()> {
    let known = [
        (settings::RETENTION_DAYS, "30"),
        (settings::DEFAULT_NUDGE_MODE, "always"),
        (settings::NOTIFICATIONS_ENABLED, "true"),
    ];
    for (key, default) in known {
        if store.get_setting(key)?.is_none() {
            println!("{key} = {default} (default)");
        }
    }
    Ok(())
}
