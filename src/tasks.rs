//! Task Service (spec.md §4.1): CRUD, dependency graph mutation with
//! cycle prevention, status transitions, and prefix-based `find`.
//!
//! Grounded in `dag/builder.rs`'s cycle-rejection style, generalized from
//! a build-time DAG over phases to a live, mutable `blocked_by` graph over
//! tasks, and in `factory/db.rs`'s CRUD conventions.

use crate::errors::UserError;
use crate::store::tasks::NewTask;
use crate::store::Store;
use fuel_common::{Task, TaskStatus, LABEL_AUTO_CLOSED};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

pub struct TaskService {
    store: Arc<Store>,
}

impl TaskService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn create(&self, new: NewTask) -> Result<Task, UserError> {
        self.store.create_task(new).map_err(|e| UserError::BadRequest(e.to_string()))
    }

    pub fn all(&self) -> Result<Vec<Task>, UserError> {
        self.store.all_tasks().map_err(|e| UserError::BadRequest(e.to_string()))
    }

    /// Resolves `query` against the task set: exact integer id, full
    /// `f-xxxxxx` id, or a unique short-id prefix (spec.md §4.1).
    pub fn find(&self, query: &str) -> Result<Task, UserError> {
        if let Ok(id) = query.parse::<i64>() {
            if let Some(task) = self.store.find_task_by_id(id).map_err(|e| UserError::BadRequest(e.to_string()))? {
                return Ok(task);
            }
        }
        if let Some(task) = self
            .store
            .find_task_by_short_id(query)
            .map_err(|e| UserError::BadRequest(e.to_string()))?
        {
            return Ok(task);
        }
        let prefix = query.strip_prefix("f-").unwrap_or(query);
        let candidates = self
            .store
            .find_tasks_by_short_id_prefix(&format!("f-{prefix}"))
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        match candidates.len() {
            0 => Err(UserError::NotFound { query: query.to_string() }),
            1 => Ok(candidates.into_iter().next().unwrap()),
            _ => Err(UserError::Ambiguous {
                query: query.to_string(),
                candidates: candidates.into_iter().map(|t| t.short_id).collect(),
            }),
        }
    }

    /// `AddDependency(from, to)`: `from` becomes blocked by `to`. Rejects
    /// the edge if the graph `blocked_by ∪ {from -> to}` would contain a
    /// cycle reachable from `to` back to `from` (spec.md §4.1, §8).
    pub fn add_dependency(&self, from: &str, to: &str) -> Result<(), UserError> {
        let from_task = self.find(from)?;
        let to_task = self.find(to)?;
        if from_task.id == to_task.id {
            return Err(UserError::CycleDetected {
                from: from_task.short_id.clone(),
                to: to_task.short_id.clone(),
                path: vec![from_task.short_id, to_task.short_id],
            });
        }
        if let Some(path) = self.find_path(&to_task, &from_task)? {
            return Err(UserError::CycleDetected {
                from: from_task.short_id.clone(),
                to: to_task.short_id.clone(),
                path,
            });
        }
        let mut blocked_by = from_task.blocked_by.clone();
        blocked_by.insert(to_task.short_id.clone());
        self.store
            .set_task_blocked_by(from_task.id, &blocked_by)
            .map_err(|e| UserError::BadRequest(e.to_string()))
    }

    pub fn remove_dependency(&self, from: &str, to: &str) -> Result<(), UserError> {
        let from_task = self.find(from)?;
        let to_task = self.find(to)?;
        let mut blocked_by = from_task.blocked_by.clone();
        blocked_by.remove(&to_task.short_id);
        self.store
            .set_task_blocked_by(from_task.id, &blocked_by)
            .map_err(|e| UserError::BadRequest(e.to_string()))
    }

    /// Breadth-first search from `start` looking for `target` along
    /// `blocked_by` edges; returns the path if found (spec.md §4.1: "the
    /// check is a breadth-first search from `to` looking for `from`").
    fn find_path(&self, start: &Task, target: &Task) -> Result<Option<Vec<String>>, UserError> {
        let all = self.all()?;
        let by_short_id: std::collections::HashMap<&str, &Task> =
            all.iter().map(|t| (t.short_id.as_str(), t)).collect();

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(vec![start.short_id.clone()]);
        visited.insert(start.short_id.clone());

        while let Some(path) = queue.pop_front() {
            let current = path.last().unwrap();
            if current == &target.short_id {
                return Ok(Some(path));
            }
            let Some(current_task) = by_short_id.get(current.as_str()) else { continue };
            for next in &current_task.blocked_by {
                if visited.insert(next.clone()) {
                    let mut next_path = path.clone();
                    next_path.push(next.clone());
                    queue.push_back(next_path);
                }
            }
        }
        Ok(None)
    }

    pub fn reopen(&self, query: &str) -> Result<(), UserError> {
        let task = self.find(query)?;
        if task.status == TaskStatus::Open {
            return Ok(());
        }
        self.store
            .set_task_status(task.id, TaskStatus::Open)
            .map_err(|e| UserError::BadRequest(e.to_string()))
    }

    pub fn start(&self, query: &str) -> Result<Task, UserError> {
        let task = self.find(query)?;
        self.store
            .set_task_status(task.id, TaskStatus::InProgress)
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        self.find(&task.short_id)
    }

    /// Marks a task done, closes any pending review, records optional
    /// reason/commit (spec.md §4.1 `done`).
    pub fn done(&self, query: &str, reason: Option<&str>, commit_hash: Option<&str>) -> Result<(), UserError> {
        let task = self.find(query)?;
        self.store
            .set_task_done(task.id, reason, commit_hash)
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        for review in self
            .store
            .reviews_for_task(task.id)
            .map_err(|e| UserError::BadRequest(e.to_string()))?
        {
            if review.status != fuel_common::ReviewStatus::Completed {
                self.store
                    .complete_review(review.id, &[])
                    .map_err(|e| UserError::BadRequest(e.to_string()))?;
            }
        }
        Ok(())
    }

    pub fn mark_auto_closed(&self, query: &str) -> Result<(), UserError> {
        let task = self.find(query)?;
        self.store
            .add_task_label(task.id, LABEL_AUTO_CLOSED)
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        self.done(query, Some("auto-closed: review disabled or unconfigured"), None)
    }

    pub fn delete(&self, query: &str) -> Result<(), UserError> {
        let task = self.find(query)?;
        self.store
            .set_task_status(task.id, TaskStatus::Cancelled)
            .map_err(|e| UserError::BadRequest(e.to_string()))
    }

    pub fn label_needs_human(&self, query: &str, prefix_title: &str) -> Result<Task, UserError> {
        let task = self.find(query)?;
        self.store
            .add_task_label(task.id, fuel_common::LABEL_NEEDS_HUMAN)
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        let human = self
            .create(NewTask {
                title: format!("NEEDS HUMAN: {prefix_title}"),
                labels: vec![fuel_common::LABEL_NEEDS_HUMAN.to_string()],
                ..Default::default()
            })
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        self.add_dependency(&task.short_id, &human.short_id)?;
        self.find(&task.short_id)
    }

    /// Checks every blocker of `task` is terminal (spec.md §4.2 readiness
    /// condition, reused by both the resolver and invariant tests).
    pub fn blockers_satisfied(&self, task: &Task, by_short_id: &std::collections::HashMap<String, Task>) -> bool {
        task.blocked_by.iter().all(|blocker_id| {
            by_short_id.get(blocker_id).map(|b| b.status.is_terminal()).unwrap_or(false)
        })
    }
}

pub fn index_by_short_id(tasks: &[Task]) -> std::collections::HashMap<String, Task> {
    tasks.iter().map(|t| (t.short_id.clone(), t.clone())).collect::<std::collections::HashMap<_, _>>()
}

pub fn sorted_by_short_id(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| a.short_id.cmp(&b.short_id));
    tasks
}
