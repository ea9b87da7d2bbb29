//! Ready Resolver (spec.md §4.2): computes the ordered set of tasks
//! eligible to be spawned this tick, given dependencies, labels, and
//! epic/mirror state.
//!
//! Grounded in `dag/scheduler.rs`'s `get_ready_phases` — same shape
//! (scan all nodes, check blockers against a status set) generalized
//! from a static phase DAG to a live task/epic snapshot. Results are
//! cached and invalidated on mutation per spec.md §4.2's "cached by the
//! Spawner and invalidated on any task mutation".

use fuel_common::{Epic, MirrorStatus, Task, TaskStatus, LABEL_NEEDS_HUMAN};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// One consistent read of the world the resolver needs (spec.md §4.2:
/// "Given the set of all tasks and epics in one consistent snapshot").
pub struct ResolverInput {
    pub tasks: Vec<Task>,
    pub epics: HashMap<i64, Epic>,
}

fn any_epic_merging(epics: &HashMap<i64, Epic>) -> bool {
    epics.values().any(|e| e.mirror_status == MirrorStatus::Merging)
}

/// Whether `task` satisfies every readiness condition in spec.md §4.2,
/// given the full task index (for blocker lookups) and epic map.
fn is_ready(task: &Task, by_short_id: &HashMap<&str, &Task>, epics: &HashMap<i64, Epic>, mirrors_enabled: bool) -> bool {
    if task.status != TaskStatus::Open {
        return false;
    }
    if task.has_label(LABEL_NEEDS_HUMAN) {
        return false;
    }
    if !task
        .blocked_by
        .iter()
        .all(|id| by_short_id.get(id.as_str()).map(|b| b.status.is_terminal()).unwrap_or(false))
    {
        return false;
    }
    match task.epic_id {
        Some(epic_id) => match epics.get(&epic_id) {
            Some(epic) => {
                if epic.paused_at.is_some() {
                    return false;
                }
                if mirrors_enabled && !epic.mirror_allows_scheduling() {
                    return false;
                }
                true
            }
            None => false,
        },
        None => !any_epic_merging(epics),
    }
}

/// Ordering: ascending priority, then ascending `created_at`, then
/// `short_id` (spec.md §4.2).
pub fn order_ready(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.short_id.cmp(&b.short_id))
    });
    tasks
}

pub fn compute_ready(input: &ResolverInput, mirrors_enabled: bool) -> Vec<Task> {
    let by_short_id: HashMap<&str, &Task> = input.tasks.iter().map(|t| (t.short_id.as_str(), t)).collect();
    let ready: Vec<Task> = input
        .tasks
        .iter()
        .filter(|t| is_ready(t, &by_short_id, &input.epics, mirrors_enabled))
        .cloned()
        .collect();
    order_ready(ready)
}

/// Caches the last computed ready set; any task mutation calls
/// `invalidate()`, forcing the next `compute` to recompute from a fresh
/// `ResolverInput` (spec.md §4.2: "cached by the Spawner and invalidated
/// on any task mutation").
#[derive(Default)]
pub struct ReadyResolver {
    dirty: AtomicBool,
    cached: Mutex<Vec<Task>>,
}

impl ReadyResolver {
    pub fn new() -> Self {
        Self { dirty: AtomicBool::new(true), cached: Mutex::new(Vec::new()) }
    }

    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Returns the cached ready set, recomputing from `input` if dirty.
    pub fn compute(&self, input: &ResolverInput, mirrors_enabled: bool) -> Vec<Task> {
        if self.dirty.swap(false, Ordering::SeqCst) {
            let fresh = compute_ready(input, mirrors_enabled);
            *self.cached.lock().expect("resolver cache poisoned") = fresh.clone();
            fresh
        } else {
            self.cached.lock().expect("resolver cache poisoned").clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fuel_common::{Complexity, TaskType};
    use std::collections::BTreeSet;

    fn base_task(short_id: &str, status: TaskStatus) -> Task {
        Task {
            id: 1,
            short_id: short_id.to_string(),
            title: short_id.to_string(),
            description: String::new(),
            task_type: TaskType::Task,
            status,
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

    #[test]
    fn blocked_task_excluded_until_blocker_terminal() {
        let parent = base_task("f-parent", TaskStatus::Open);
        let mut child = base_task("f-child", TaskStatus::Open);
        child.blocked_by.insert("f-parent".to_string());

        let input = ResolverInput { tasks: vec![parent.clone(), child.clone()], epics: HashMap::new() };
        let ready = compute_ready(&input, false);
        assert_eq!(ready.iter().map(|t| t.short_id.as_str()).collect::<Vec<_>>(), vec!["f-parent"]);

        let mut done_parent = parent;
        done_parent.status = TaskStatus::Done;
        let input = ResolverInput { tasks: vec![done_parent, child], epics: HashMap::new() };
        let ready = compute_ready(&input, false);
        assert_eq!(ready.iter().map(|t| t.short_id.as_str()).collect::<Vec<_>>(), vec!["f-child"]);
    }

    #[test]
    fn needs_human_label_excludes_even_with_no_blockers() {
        let mut task = base_task("f-a", TaskStatus::Open);
        task.labels.insert(LABEL_NEEDS_HUMAN.to_string());
        let input = ResolverInput { tasks: vec![task], epics: HashMap::new() };
        assert!(compute_ready(&input, false).is_empty());
    }

    #[test]
    fn standalone_task_skipped_while_any_epic_merging() {
        let mut epic = test_epic();
        epic.mirror_status = MirrorStatus::Merging;
        let mut epics = HashMap::new();
        epics.insert(epic.id, epic);
        let task = base_task("f-a", TaskStatus::Open);
        let input = ResolverInput { tasks: vec![task], epics };
        assert!(compute_ready(&input, true).is_empty());
    }

    #[test]
    fn epic_task_skipped_when_mirror_pending() {
        let mut epic = test_epic();
        epic.mirror_status = MirrorStatus::Pending;
        let epic_id = epic.id;
        let mut epics = HashMap::new();
        epics.insert(epic_id, epic);
        let mut task = base_task("f-a", TaskStatus::Open);
        task.epic_id = Some(epic_id);
        let input = ResolverInput { tasks: vec![task], epics };
        assert!(compute_ready(&input, true).is_empty());
    }

    #[test]
    fn ordering_is_priority_then_created_then_short_id() {
        let mut a = base_task("f-bbbb", TaskStatus::Open);
        a.priority = 1;
        let mut b = base_task("f-aaaa", TaskStatus::Open);
        b.priority = 0;
        let input = ResolverInput { tasks: vec![a, b], epics: HashMap::new() };
        let ready = compute_ready(&input, false);
        assert_eq!(ready[0].short_id, "f-aaaa");
        assert_eq!(ready[1].short_id, "f-bbbb");
    }

    #[test]
    fn resolver_cache_recomputes_only_after_invalidate() {
        let resolver = ReadyResolver::new();
        let task = base_task("f-a", TaskStatus::Open);
        let input = ResolverInput { tasks: vec![task], epics: HashMap::new() };
        assert_eq!(resolver.compute(&input, false).len(), 1);

        let empty_input = ResolverInput { tasks: vec![], epics: HashMap::new() };
        // Cache still holds the old result since nothing invalidated it.
        assert_eq!(resolver.compute(&empty_input, false).len(), 1);

        resolver.invalidate();
        assert_eq!(resolver.compute(&empty_input, false).len(), 0);
    }

    fn test_epic() -> Epic {
        Epic {
            id: 1,
            short_id: "e-aaaa".into(),
            title: "e".into(),
            description: String::new(),
            self_guided: false,
            plan_filename: "plans/e.md".into(),
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
}
