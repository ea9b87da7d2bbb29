//! The IPC wire protocol (spec.md §4.10, §6): newline-delimited JSON
//! envelopes carrying a tagged `Command` (client → daemon) or `Event`
//! (daemon → client).

use crate::health::AgentHealth;
use crate::snapshot::ConsumeSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every message on the wire is wrapped in an envelope carrying the fields
/// common to commands and events: `type` (the inner tag), `timestamp`,
/// `instance_id`, and an optional `request_id` used to correlate a
/// response event back to the command that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub timestamp: DateTime<Utc>,
    pub instance_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(instance_id: Uuid, request_id: Option<Uuid>, body: T) -> Self {
        Self { timestamp: Utc::now(), instance_id, request_id, body }
    }
}

/// Fields a `TaskCreate` command may specify; all optional fields fall
/// back to config/service defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreateFields {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    // Renamed off the literal `type` spelling from spec.md §4.10: that
    // key collides with `Command`'s own internally-tagged `type` field
    // once this struct is flattened into `TaskCreate`'s JSON object.
    #[serde(default, rename = "taskType")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default, rename = "epicId")]
    pub epic_id: Option<String>,
    #[serde(default, rename = "blockedBy")]
    pub blocked_by: Vec<String>,
}

/// Client -> daemon commands (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Stop { graceful: bool },
    Pause,
    Resume,
    ReloadConfig,
    SetInterval { seconds: u64 },
    RequestSnapshot,
    TaskStart { task_id: String, agent_override: Option<String> },
    TaskReopen { task_id: String },
    TaskDone { task_id: String, reason: Option<String>, commit_hash: Option<String> },
    TaskCreate(TaskCreateFields),
    DependencyAdd { task_id: String, blocker_id: String },
    HealthReset { agent: String },
}

/// Daemon -> client events (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Hello { version: String },
    Snapshot(ConsumeSnapshot),
    StatusLine { message: String },
    TaskSpawned { task_id: String, run_id: String, agent: String },
    TaskCompleted { task_id: String, run_id: String, status: String },
    HealthChange { agent: String, health: AgentHealth },
    OutputChunk { task_id: String, run_id: String, stream: String, chunk: String },
    ConfigReloaded,
    Error { code: String, message: String },
    ReviewCompleted { task_id: String, review_id: String, passed: bool, issues: Vec<String> },
    TaskCreateResponse { task_id: String, short_id: String },
    DoneTasks { task_ids: Vec<String> },
    BlockedTasks { task_ids: Vec<String> },
    CompletedTasks { task_ids: Vec<String> },
}
