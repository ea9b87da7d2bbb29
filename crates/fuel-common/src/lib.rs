//! Shared domain types and wire protocol for the Fuel consume daemon.
//!
//! This crate has no IO of its own: it exists so the daemon and any wire
//! client agree on entity shapes, status machines, and the IPC envelope
//! without either depending on the other.

pub mod epic;
pub mod health;
pub mod ids;
pub mod review;
pub mod run;
pub mod snapshot;
pub mod task;
pub mod wire;

pub use epic::{Epic, EpicStatus, MirrorStatus, TaskStatusCounts};
pub use health::{AgentHealth, HealthStatus};
pub use ids::{next_length, EntityPrefix};
pub use review::{IssueCode, Review, ReviewOutcome, ReviewStatus};
pub use run::{CompletionResult, CompletionType, FailureClass, Run, RunStatus};
pub use snapshot::{ConsumeSnapshot, ProcessDescriptor, TaskBuckets};
pub use task::{Complexity, Task, TaskStatus, TaskType, LABEL_AUTO_CLOSED, LABEL_NEEDS_HUMAN};
pub use wire::{Command, Envelope, Event, TaskCreateFields};
