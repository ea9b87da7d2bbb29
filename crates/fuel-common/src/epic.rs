//! The `Epic` entity, its mirror sub-state machine, and computed status
//! (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mirror lifecycle: `none -> pending -> creating -> ready -> merging ->
/// {merged, merge_failed} -> cleaned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorStatus {
    None,
    Pending,
    Creating,
    Ready,
    Merging,
    MergeFailed,
    Merged,
    Cleaned,
}

impl Default for MirrorStatus {
    fn default() -> Self {
        MirrorStatus::None
    }
}

/// Computed, never stored directly — derived from an epic's timestamp
/// fields and the status of its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    Paused,
    Approved,
    ChangesRequested,
    InProgress,
    Reviewed,
    Planning,
    ReviewPending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: i64,
    pub short_id: String,
    pub title: String,
    pub description: String,
    pub self_guided: bool,
    pub plan_filename: String,
    pub paused_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub changes_requested_at: Option<DateTime<Utc>>,
    pub mirror_path: Option<String>,
    pub mirror_status: MirrorStatus,
    pub mirror_branch: Option<String>,
    pub mirror_base_commit: Option<String>,
    pub mirror_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal view of a task's contribution to computed epic status, so this
/// crate doesn't need to depend on the full `Task` type to answer the
/// question "is any task of this epic open or in progress".
#[derive(Debug, Clone, Copy)]
pub struct TaskStatusCounts {
    pub total: usize,
    pub open_or_in_progress: usize,
    pub done: usize,
}

impl Epic {
    /// Precedence (top to bottom), per spec.md §3: paused wins over
    /// approved (DESIGN.md Open Question resolution).
    pub fn computed_status(&self, tasks: TaskStatusCounts) -> EpicStatus {
        if self.paused_at.is_some() {
            return EpicStatus::Paused;
        }
        if self.approved_at.is_some() {
            return EpicStatus::Approved;
        }
        if self.changes_requested_at.is_some() {
            return if tasks.open_or_in_progress == 0 {
                EpicStatus::ChangesRequested
            } else {
                EpicStatus::InProgress
            };
        }
        if self.reviewed_at.is_some() {
            return EpicStatus::Reviewed;
        }
        if tasks.total == 0 {
            return EpicStatus::Planning;
        }
        if tasks.open_or_in_progress > 0 {
            return EpicStatus::InProgress;
        }
        if tasks.total >= 1 && tasks.done == tasks.total {
            return EpicStatus::ReviewPending;
        }
        EpicStatus::InProgress
    }

    /// Whether the Ready Resolver should treat this epic's mirror as safe
    /// to schedule work against (spec.md §4.2).
    pub fn mirror_allows_scheduling(&self) -> bool {
        matches!(
            self.mirror_status,
            MirrorStatus::None
                | MirrorStatus::Ready
                | MirrorStatus::Merging
                | MirrorStatus::Merged
                | MirrorStatus::Cleaned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_epic() -> Epic {
        Epic {
            id: 1,
            short_id: "e-aaaa".into(),
            title: "t".into(),
            description: String::new(),
            self_guided: false,
            plan_filename: "plans/t-e-aaaa.md".into(),
            paused_at: None,
            reviewed_at: None,
            approved_at: None,
            approved_by: None,
            changes_requested_at: None,
            mirror_path: None,
            mirror_status: MirrorStatus::None,
            mirror_branch: None,
            mirror_base_commit: None,
            mirror_created_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn paused_beats_approved() {
        let mut e = base_epic();
        e.paused_at = Some(Utc::now());
        e.approved_at = Some(Utc::now());
        assert_eq!(
            e.computed_status(TaskStatusCounts { total: 1, open_or_in_progress: 0, done: 1 }),
            EpicStatus::Paused
        );
    }

    #[test]
    fn planning_when_no_tasks() {
        let e = base_epic();
        assert_eq!(
            e.computed_status(TaskStatusCounts { total: 0, open_or_in_progress: 0, done: 0 }),
            EpicStatus::Planning
        );
    }

    #[test]
    fn review_pending_when_all_done() {
        let e = base_epic();
        assert_eq!(
            e.computed_status(TaskStatusCounts { total: 3, open_or_in_progress: 0, done: 3 }),
            EpicStatus::ReviewPending
        );
    }

    #[test]
    fn in_progress_when_any_open() {
        let e = base_epic();
        assert_eq!(
            e.computed_status(TaskStatusCounts { total: 3, open_or_in_progress: 1, done: 2 }),
            EpicStatus::InProgress
        );
    }

    #[test]
    fn mirror_scheduling_gates() {
        let mut e = base_epic();
        assert!(e.mirror_allows_scheduling());
        e.mirror_status = MirrorStatus::Creating;
        assert!(!e.mirror_allows_scheduling());
        e.mirror_status = MirrorStatus::Pending;
        assert!(!e.mirror_allows_scheduling());
    }
}
