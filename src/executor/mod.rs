//! AI Executor: spawn the external AI CLI for a prompt, stream-parse its
//! structured output into progress/console events, enforce a timeout, and
//! surface the session id (spec §4.2).
//!
//! The callback-soup of the source (`on_progress`, `on_console`) becomes two
//! channels consumed by the caller (spec §9): `execute` takes sender halves
//! and pushes events as they're parsed, returning the final `ExecutorOutcome`
//! once the child exits or the timeout fires. `TaskExecutor` is a trait so
//! the Task Runner, Scheduler and File Watcher can all be tested against a
//! scripted `mock::MockExecutor` instead of spawning a real child process —
//! the natural Rust shape for spec §9 scenarios A–G.

pub mod mock;
mod parser;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

use parser::StreamParser;

/// Candidate installation paths probed before falling back to a login-shell
/// `which` (spec §4.2 Resolution). Cached process-wide after first success.
const CANDIDATE_PATHS: &[&str] = &[
    "/usr/local/bin/claude",
    "/opt/homebrew/bin/claude",
    "/usr/bin/claude",
];

static RESOLVED_BINARY: OnceLock<Option<PathBuf>> = OnceLock::new();

/// The default executor timeout (spec §4.2 Inputs): 30 minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Grace period between SIGTERM and SIGKILL on timeout (spec §4.2 Termination).
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub timeout: Option<Duration>,
    pub resume_session_id: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub fraction: Option<f64>,
    pub message: String,
    pub is_tool_use: bool,
}

#[derive(Debug, Clone)]
pub struct ConsoleEvent {
    pub entry_type: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub timed_out: bool,
    pub session_id: Option<String>,
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        prompt: &str,
        options: ExecutorOptions,
        progress_tx: mpsc::UnboundedSender<ProgressEvent>,
        console_tx: mpsc::UnboundedSender<ConsoleEvent>,
    ) -> ExecutorOutcome;
}

/// Resolve the AI CLI binary: a fixed list of conventional locations, then a
/// login-shell `which` fallback. Never errors — returns `None` if nothing
/// resolves, so the caller can synthesize a failed outcome (spec §4.2).
fn resolve_binary() -> Option<PathBuf> {
    RESOLVED_BINARY
        .get_or_init(|| {
            for candidate in CANDIDATE_PATHS {
                let path = PathBuf::from(candidate);
                if path.is_file() {
                    return Some(path);
                }
            }
            if let Some(home) = dirs::home_dir() {
                let local = home.join(".claude").join("local").join("claude");
                if local.is_file() {
                    return Some(local);
                }
            }

            let output = std::process::Command::new("sh")
                .arg("-lc")
                .arg("command -v claude")
                .output()
                .ok()?;
            if !output.status.success() {
                return None;
            }
            let resolved = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if resolved.is_empty() {
                None
            } else {
                Some(PathBuf::from(resolved))
            }
        })
        .clone()
}

pub struct ChildProcessExecutor;

impl ChildProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChildProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for ChildProcessExecutor {
    async fn execute(
        &self,
        prompt: &str,
        options: ExecutorOptions,
        progress_tx: mpsc::UnboundedSender<ProgressEvent>,
        console_tx: mpsc::UnboundedSender<ConsoleEvent>,
    ) -> ExecutorOutcome {
        let start = std::time::Instant::now();

        let Some(binary) = resolve_binary() else {
            return ExecutorOutcome {
                exit_code: 1,
                stdout: String::new(),
                stderr: "AI CLI binary not found in any conventional location".to_string(),
                duration_ms: start.elapsed().as_millis() as i64,
                timed_out: false,
                session_id: None,
            };
        };

        let mut cmd = Command::new(binary);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");
        if let Some(session) = &options.resume_session_id {
            cmd.arg("--resume").arg(session);
        }
        if let Some(system_prompt) = &options.system_prompt {
            cmd.arg("--system-prompt").arg(system_prompt);
        }
        if let Some(model) = &options.model {
            cmd.arg("--model").arg(model);
        }

        // Daymon itself may be invoked from inside a Claude Code session;
        // this variable would make the child CLI think it's nested and
        // change its behavior, so it's stripped before spawning.
        cmd.env_remove("CLAUDECODE");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return ExecutorOutcome {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("failed to spawn AI CLI: {err}"),
                    duration_ms: start.elapsed().as_millis() as i64,
                    timed_out: false,
                    session_id: None,
                };
            }
        };

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let mut parser = StreamParser::new();
        let mut raw_stdout = Vec::new();
        let mut raw_stderr = Vec::new();
        let mut read_buf = [0u8; 8192];

        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut timed_out = false;
        let mut exit_status = None;

        loop {
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    timed_out = true;
                    terminate(&mut child).await;
                    let _ = stderr.read_to_end(&mut raw_stderr).await;
                    break;
                }

                n = stdout.read(&mut read_buf) => {
                    match n {
                        Ok(0) | Err(_) => {
                            let _ = stderr.read_to_end(&mut raw_stderr).await;
                            exit_status = child.wait().await.ok();
                            break;
                        }
                        Ok(n) => {
                            raw_stdout.extend_from_slice(&read_buf[..n]);
                            let parsed = parser.feed(&read_buf[..n]);
                            for event in parsed.progress {
                                let _ = progress_tx.send(event);
                            }
                            for event in parsed.console {
                                let _ = console_tx.send(event);
                            }
                        }
                    }
                }
            }
        }

        let exit_code = exit_status
            .and_then(|s| s.code())
            .unwrap_or(if timed_out { 1 } else { -1 });

        let stdout_text = parser
            .canonical_result()
            .map(str::to_string)
            .unwrap_or_else(|| String::from_utf8_lossy(&raw_stdout).to_string());
        let stderr_text = String::from_utf8_lossy(&raw_stderr).to_string();

        ExecutorOutcome {
            exit_code,
            stdout: stdout_text,
            stderr: stderr_text,
            duration_ms: start.elapsed().as_millis() as i64,
            timed_out,
            session_id: parser.session_id().map(str::to_string),
        }
    }
}

/// Soft timeout: SIGTERM, then a 5s grace period, then SIGKILL (spec §4.2).
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
        }
    }

    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}
