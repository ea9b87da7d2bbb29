//! `AgentTask` polymorphism (spec.md §4.6, §9 "Polymorphism of
//! AgentTask"): a tagged variant over the capabilities
//! `{getAgentName, buildPrompt, processType, onSuccess, onFailure,
//! onComplete}`.
//!
//! Grounded in `dag/executor.rs`'s wave-loop dispatch (one match per
//! node kind) rather than the class-hierarchy style the spec explicitly
//! steers away from (§9 "No deep inheritance is required"). Lifecycle
//! hooks (`on_success`/`on_failure`/`on_complete`) live in
//! [`crate::completion`], which is the one place with access to every
//! service the hooks might need to call.

use crate::config::Config;
use fuel_common::{Complexity, Epic, Task, TaskType};

pub mod prompt;

/// Which kind of work a supervised process is performing (spec.md §4.6).
/// `Review`'s `original_task_id` is the user-visible task being reviewed;
/// the review run itself is tracked via a `Review` row, not a `Task` row
/// — the spec's "task id is namespaced `review-{originalShortId}`" is
/// purely a logging/prompt convention, reproduced in `prompt::review`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Work,
    Review { original_task_id: i64 },
    MergeEpic { epic_id: i64 },
    UpdateReality,
    SelfGuided,
}

/// The variant assignment step of spec.md §4.7 Task Spawner: "Pick an
/// `AgentTask` variant: `merge` for type=merge tasks whose epic_id is
/// set; `selfGuided` if `epic.self_guided`; else `work`."
pub fn classify(task: &Task, epic: Option<&Epic>) -> Kind {
    if task.task_type == TaskType::Merge {
        if let Some(epic) = epic {
            return Kind::MergeEpic { epic_id: epic.id };
        }
    }
    if task.task_type == TaskType::Reality {
        return Kind::UpdateReality;
    }
    if let Some(epic) = epic {
        if epic.self_guided {
            return Kind::SelfGuided;
        }
    }
    Kind::Work
}

/// `getAgentName(cfg)` (spec.md §4.6): which logical agent name runs
/// this kind of work. `None` means the kind is disabled by config (e.g.
/// review/reality agent unset) and must not be spawned.
pub fn agent_name(kind: Kind, task: &Task, config: &Config) -> Option<String> {
    match kind {
        Kind::Work => Some(config.agent_for_complexity(task.complexity).to_string()),
        Kind::Review { .. } => config.review.clone(),
        Kind::MergeEpic { .. } => Some(config.primary.clone()),
        Kind::UpdateReality => config.reality.clone().or_else(|| Some(config.primary.clone())),
        Kind::SelfGuided => Some(config.primary.clone()),
    }
}

/// Whether review is configured at all and enabled for ordinary work
/// tasks (spec.md §4.6 Work variant: "if review-enabled and a review
/// agent is configured, trigger a review").
pub fn review_enabled(config: &Config) -> bool {
    config.task_review && config.review.is_some()
}

pub fn complexity_label(c: Complexity) -> &'static str {
    match c {
        Complexity::Trivial => "trivial",
        Complexity::Simple => "simple",
        Complexity::Moderate => "moderate",
        Complexity::Complex => "complex",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fuel_common::TaskStatus;
    use std::collections::BTreeSet;

    fn base_task(task_type: TaskType) -> Task {
        Task {
            id: 1,
            short_id: "f-aaaa".into(),
            title: "t".into(),
            description: String::new(),
            task_type,
            status: TaskStatus::Open,
            priority: 2,
            complexity: Complexity::Moderate,
            labels: BTreeSet::new(),
            blocked_by: BTreeSet::new(),
            epic_id: None,
            commit_hash: None,
            reason: None,
            consumed: false,
            consumed_at: None,
            consume_pid: None,
            last_review_issues: Vec::new(),
            selfguided_iteration: 0,
            selfguided_stuck_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn base_epic(self_guided: bool) -> Epic {
        Epic {
            id: 1,
            short_id: "e-aaaa".into(),
            title: "e".into(),
            description: String::new(),
            self_guided,
            plan_filename: "plans/e.md".into(),
            paused_at: None,
            reviewed_at: None,
            approved_at: None,
            approved_by: None,
            changes_requested_at: None,
            mirror_path: None,
            mirror_status: fuel_common::MirrorStatus::None,
            mirror_branch: None,
            mirror_base_commit: None,
            mirror_created_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merge_task_with_epic_classifies_as_merge_epic() {
        let task = base_task(TaskType::Merge);
        let epic = base_epic(false);
        assert_eq!(classify(&task, Some(&epic)), Kind::MergeEpic { epic_id: epic.id });
    }

    #[test]
    fn self_guided_epic_routes_to_self_guided() {
        let task = base_task(TaskType::Task);
        let epic = base_epic(true);
        assert_eq!(classify(&task, Some(&epic)), Kind::SelfGuided);
    }

    #[test]
    fn plain_task_with_no_epic_is_work() {
        let task = base_task(TaskType::Task);
        assert_eq!(classify(&task, None), Kind::Work);
    }

    #[test]
    fn reality_task_classifies_regardless_of_epic() {
        let task = base_task(TaskType::Reality);
        assert_eq!(classify(&task, None), Kind::UpdateReality);
    }
}
