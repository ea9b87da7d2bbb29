//! The `Task` entity and its state machine (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A task's kind. `Epic`, `Merge`, `Reality`, and `Review` are internal
/// bookkeeping types spawned by the daemon itself; the rest are user-created
/// work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Task,
    Bug,
    Feature,
    Chore,
    Epic,
    Merge,
    Reality,
    Review,
}

/// Task status machine:
/// `open -> in_progress -> {review, done, cancelled}`
/// `review -> {done, open}`
/// `in_progress -> open` (reopen on failure)
/// `open <-> someday`
/// `open -> paused -> open`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Review,
    Done,
    Cancelled,
    Someday,
    Paused,
}

impl TaskStatus {
    /// `done` and `cancelled` are the only terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

/// Complexity buckets drive complexity-to-agent routing (spec.md §4.3/§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

/// The `needs-human` label excludes a task from the ready resolver
/// permanently until a human removes it; `auto-closed` marks work tasks
/// that were closed without going through review.
pub const LABEL_NEEDS_HUMAN: &str = "needs-human";
pub const LABEL_AUTO_CLOSED: &str = "auto-closed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub short_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: u8,
    pub complexity: Complexity,
    pub labels: BTreeSet<String>,
    pub blocked_by: BTreeSet<String>,
    pub epic_id: Option<i64>,
    pub commit_hash: Option<String>,
    pub reason: Option<String>,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consume_pid: Option<u32>,
    pub last_review_issues: Vec<String>,
    pub selfguided_iteration: u32,
    pub selfguided_stuck_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Invariant (spec.md §8): `consumed == (exists a running Run for this task)`.
    /// The store is the authority on this; this helper only checks the flag
    /// the Spawner/Completion Handler maintain on the row.
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}
