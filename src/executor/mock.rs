//! Scripted `TaskExecutor` used by Task Runner / Scheduler / File Watcher
//! tests (spec §9 scenarios A–G): a queue of outcomes to hand back in
//! order, and a record of every call's prompt/options for assertions.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ConsoleEvent, ExecutorOptions, ExecutorOutcome, ProgressEvent, TaskExecutor};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub resume_session_id: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

pub struct MockExecutor {
    outcomes: Mutex<Vec<ExecutorOutcome>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockExecutor {
    /// Outcomes are returned in order, oldest first; the last one repeats
    /// once the queue is exhausted.
    pub fn new(outcomes: Vec<ExecutorOutcome>) -> Self {
        Self { outcomes: Mutex::new(outcomes), calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute(
        &self,
        prompt: &str,
        options: ExecutorOptions,
        progress_tx: mpsc::UnboundedSender<ProgressEvent>,
        console_tx: mpsc::UnboundedSender<ConsoleEvent>,
    ) -> ExecutorOutcome {
        self.calls.lock().unwrap().push(RecordedCall {
            prompt: prompt.to_string(),
            resume_session_id: options.resume_session_id.clone(),
            system_prompt: options.system_prompt.clone(),
            model: options.model.clone(),
        });

        let _ = progress_tx.send(ProgressEvent { fraction: Some(1.0), message: "Completed".into(), is_tool_use: false });
        let _ = console_tx.send(ConsoleEvent { entry_type: "result".into(), content: "mock run".into() });

        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.len() > 1 {
            outcomes.remove(0)
        } else {
            outcomes.first().cloned().unwrap_or(ExecutorOutcome {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
                timed_out: false,
                session_id: None,
            })
        }
    }
}
