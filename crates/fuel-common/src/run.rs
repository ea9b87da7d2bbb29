//! The `Run` entity — one supervised process execution (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// How a completed run is classified by the Process Supervisor's reaper
/// (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionType {
    Success,
    PermissionBlocked,
    NetworkError,
    Failed,
}

impl CompletionType {
    /// Maps a completion type onto the failure class the Health Tracker
    /// backs off on (spec.md §4.5). `Success` has no failure class.
    pub fn failure_class(self) -> Option<FailureClass> {
        match self {
            CompletionType::Success => None,
            CompletionType::PermissionBlocked => Some(FailureClass::Permission),
            CompletionType::NetworkError => Some(FailureClass::Network),
            CompletionType::Failed => Some(FailureClass::Crash),
        }
    }
}

/// Failure classes drive the backoff formula in `health.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Network,
    Timeout,
    Crash,
    Permission,
}

impl FailureClass {
    /// `Permission` failures are never retried automatically.
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureClass::Permission)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub short_id: String,
    pub task_id: i64,
    pub agent: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub session_id: Option<String>,
    pub error_type: Option<String>,
    pub model: Option<String>,
    pub output_path: String,
    pub cost_usd: Option<f64>,
    pub pid: Option<u32>,
}

/// The outcome the Process Supervisor hands the Completion Handler once a
/// child process has exited (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub task_id: i64,
    pub run_id: i64,
    pub agent_name: String,
    pub exit_code: i32,
    pub duration_seconds: f64,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub output_excerpt: String,
    pub completion_type: CompletionType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_failure_class() {
        assert_eq!(CompletionType::Success.failure_class(), None);
    }

    #[test]
    fn permission_maps_and_is_not_retryable() {
        let class = CompletionType::PermissionBlocked.failure_class().unwrap();
        assert_eq!(class, FailureClass::Permission);
        assert!(!class.is_retryable());
    }

    #[test]
    fn network_and_crash_are_retryable() {
        assert!(FailureClass::Network.is_retryable());
        assert!(FailureClass::Crash.is_retryable());
        assert!(FailureClass::Timeout.is_retryable());
    }
}
