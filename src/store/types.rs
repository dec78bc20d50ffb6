//! Typed DTOs for every row shape in the store (spec §3).
//!
//! Duck-typed row maps at the store boundary are replaced with explicit
//! structs and nullable fields as `Option<T>`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paused" => TaskStatus::Paused,
            "completed" => TaskStatus::Completed,
            "error" => TaskStatus::Error,
            _ => TaskStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Cron,
    Once,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cron => "cron",
            TriggerType::Once => "once",
            TriggerType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cron" => TriggerType::Cron,
            "once" => TriggerType::Once,
            _ => TriggerType::Manual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeMode {
    Always,
    FailureOnly,
    Never,
}

impl NudgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NudgeMode::Always => "always",
            NudgeMode::FailureOnly => "failure_only",
            NudgeMode::Never => "never",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "failure_only" => NudgeMode::FailureOnly,
            "never" => NudgeMode::Never,
            _ => NudgeMode::Always,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub prompt: String,
    pub executor: String,
    pub status: String,
    pub trigger_type: String,
    pub cron_expression: Option<String>,
    pub scheduled_at: Option<String>,
    pub trigger_config: Option<String>,
    pub last_run: Option<String>,
    pub last_result: Option<String>,
    pub error_count: i64,
    pub max_runs: Option<i64>,
    pub run_count: i64,
    pub memory_entity_id: Option<i64>,
    pub worker_id: Option<i64>,
    pub session_continuity: bool,
    pub session_id: Option<String>,
    pub timeout_minutes: Option<i64>,
    pub nudge_mode: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub prompt: Option<String>,
    pub executor: Option<String>,
    pub status: Option<String>,
    pub trigger_type: Option<String>,
    pub cron_expression: Option<String>,
    pub scheduled_at: Option<String>,
    pub trigger_config: Option<String>,
    pub max_runs: Option<i64>,
    pub worker_id: Option<i64>,
    pub session_continuity: Option<bool>,
    pub timeout_minutes: Option<i64>,
    pub nudge_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub task_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub result: Option<String>,
    pub result_file: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub session_id: Option<String>,
    pub progress: Option<f64>,
    pub progress_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLog {
    pub id: i64,
    pub run_id: i64,
    pub seq: i64,
    pub entry_type: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLogEntry {
    pub entry_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watch {
    pub id: i64,
    pub path: String,
    pub description: Option<String>,
    pub action_prompt: String,
    pub status: String,
    pub last_triggered: Option<String>,
    pub trigger_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub entity_type: String,
    pub category: Option<String>,
    pub embedded_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub entity_id: i64,
    pub content: String,
    pub source: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub from_entity_id: i64,
    pub to_entity_id: i64,
    pub relation_type: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub entity_id: i64,
    pub source_type: String,
    pub source_id: i64,
    pub text_hash: String,
    pub vector: Vec<u8>,
    pub model: String,
    pub dimensions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: i64,
    pub name: String,
    pub system_prompt: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    pub is_default: bool,
    pub task_count: i64,
}

/// A semantic search hit, produced by the out-of-scope embedding engine and
/// fed into `Store::hybrid_search` alongside the FTS results.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub entity_id: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySearchHit {
    pub entity: Entity,
    pub rank: f64,
}
