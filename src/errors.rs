//! Typed error hierarchy for the Fuel consume daemon.
//!
//! One top-level enum, `FuelError`, covers the seven kinds named in the
//! design (§7): `UserError`, `TransientAgentFailure`,
//! `NonRetryableAgentFailure`, `CrashFailure`, `ConfigError`, `StoreError`,
//! `IpcError`. Each carries enough structured data to reconstruct the IPC
//! `Error` event without re-deriving it from a string.

use thiserror::Error;

/// Bad input, unknown id, cycle, ambiguous prefix. Returned synchronously
/// on the originating IPC command; never changes state.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("no entity matches '{query}'")]
    NotFound { query: String },

    #[error("'{query}' matches multiple entities: {candidates:?}")]
    Ambiguous { query: String, candidates: Vec<String> },

    #[error("adding dependency {from} -> {to} would create a cycle: {path:?}")]
    CycleDetected { from: String, to: String, path: Vec<String> },

    #[error("invalid request: {0}")]
    BadRequest(String),
}

/// A failure class assigned to a completed process by the reaper, used to
/// pick the right error/backoff family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentFailureKind {
    Network,
    Timeout,
    Crash,
    Permission,
}

/// `Network`/`Timeout`: retried with backoff, no user-visible fatal surface.
#[derive(Debug, Error)]
#[error("transient agent failure ({kind:?}) for task {task_id}: {message}")]
pub struct TransientAgentFailure {
    pub task_id: String,
    pub kind: AgentFailureKind,
    pub message: String,
}

/// `Permission`: the task is labeled `needs-human` and a blocking sibling
/// task is created; not retried.
#[derive(Debug, Error)]
#[error("agent refused permission for task {task_id}: {message}")]
pub struct NonRetryableAgentFailure {
    pub task_id: String,
    pub message: String,
}

/// Retried until `max_retries`, then a `needs-human` blocker is attached.
#[derive(Debug, Error)]
#[error("agent crashed on task {task_id} (attempt {attempt}/{max_retries}): {message}")]
pub struct CrashFailure {
    pub task_id: String,
    pub attempt: u32,
    pub max_retries: u32,
    pub message: String,
}

/// The daemon refuses to start, or a running daemon refuses to accept
/// `ReloadConfig` and keeps the previous config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path} is not valid YAML: {source}")]
    Parse { path: String, #[source] source: serde_yaml::Error },

    #[error("config references unknown agent '{agent}'")]
    UnknownAgent { agent: String },

    #[error("config references unknown driver '{driver}' for agent '{agent}'")]
    UnknownDriver { agent: String, driver: String },

    #[error("failed to read config file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
}

/// A failed write, already retried once. The daemon shuts down cleanly
/// (children SIGTERM'd), preserving state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to (de)serialize column '{column}': {source}")]
    Column { column: String, #[source] source: serde_json::Error },

    #[error("row not found: {0}")]
    NotFound(String),
}

/// Per-client; a misbehaving client is disconnected and cleaned up, the
/// daemon continues.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client send buffer exceeded {limit} bytes")]
    BackpressureExceeded { limit: usize },
}

/// The umbrella error type threaded through daemon components that can
/// fail in more than one of the above ways.
#[derive(Debug, Error)]
pub enum FuelError {
    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    TransientAgent(#[from] TransientAgentFailure),

    #[error(transparent)]
    NonRetryableAgent(#[from] NonRetryableAgentFailure),

    #[error(transparent)]
    Crash(#[from] CrashFailure),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FuelError {
    /// The stable string the IPC layer puts in `Error{code}` (spec.md §4.10).
    pub fn code(&self) -> &'static str {
        match self {
            FuelError::User(UserError::NotFound { .. }) => "NotFound",
            FuelError::User(UserError::Ambiguous { .. }) => "Ambiguous",
            FuelError::User(UserError::CycleDetected { .. }) => "CycleDetected",
            FuelError::User(UserError::BadRequest(_)) => "BadRequest",
            FuelError::TransientAgent(_) => "TransientAgentFailure",
            FuelError::NonRetryableAgent(_) => "PermissionDenied",
            FuelError::Crash(_) => "CrashFailure",
            FuelError::Config(_) => "ConfigError",
            FuelError::Store(_) => "StoreError",
            FuelError::Ipc(_) => "IpcError",
            FuelError::Other(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_detected_carries_path() {
        let err = UserError::CycleDetected {
            from: "f-aaaa".into(),
            to: "f-bbbb".into(),
            path: vec!["f-aaaa".into(), "f-bbbb".into(), "f-aaaa".into()],
        };
        assert_eq!(err.to_string().contains("f-aaaa"), true);
        let wrapped: FuelError = err.into();
        assert_eq!(wrapped.code(), "CycleDetected");
    }

    #[test]
    fn ambiguous_code_is_stable() {
        let err = UserError::Ambiguous {
            query: "f-a".into(),
            candidates: vec!["f-aaaa".into(), "f-aabb".into()],
        };
        let wrapped: FuelError = err.into();
        assert_eq!(wrapped.code(), "Ambiguous");
    }

    #[test]
    fn non_retryable_is_distinct_from_transient() {
        let transient: FuelError = TransientAgentFailure {
            task_id: "f-aaaa".into(),
            kind: AgentFailureKind::Network,
            message: "connection reset".into(),
        }
        .into();
        let permission: FuelError = NonRetryableAgentFailure {
            task_id: "f-aaaa".into(),
            message: "permission denied".into(),
        }
        .into();
        assert_eq!(transient.code(), "TransientAgentFailure");
        assert_eq!(permission.code(), "PermissionDenied");
    }

    #[test]
    fn all_error_types_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&UserError::BadRequest("x".into()));
        assert_std_error(&CrashFailure {
            task_id: "f-aaaa".into(),
            attempt: 1,
            max_retries: 3,
            message: "x".into(),
        });
    }
}
