//! Completion Handler (spec.md §4.8): the single place a `CompletionResult`
//! lands, turning a reaped process back into store state and the right
//! `AgentTask` lifecycle hook.
//!
//! Grounded in `dag/executor.rs`'s result-handling arm (finalize node,
//! update health/counters, dispatch the next wave) generalized from a
//! static DAG wave to the daemon's live completion stream.

use crate::agent_task::{self, Kind};
use crate::config::Config;
use crate::context::Context;
use crate::health::HealthTracker;
use crate::mirror::MirrorManager;
use crate::review::ReviewService;
use crate::spawner::TaskSpawner;
use crate::store::Store;
use crate::tasks::TaskService;
use fuel_common::{CompletionResult, CompletionType, RunStatus, Task, TaskStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const SELFGUIDED_STUCK_LIMIT: u32 = 3;

pub struct CompletionHandler {
    store: Arc<Store>,
    ctx: Arc<Context>,
    health: Arc<HealthTracker>,
    spawner: Arc<TaskSpawner>,
    review: Arc<ReviewService>,
    mirror: Arc<MirrorManager>,
    tasks: TaskService,
}

impl CompletionHandler {
    pub fn new(
        store: Arc<Store>,
        ctx: Arc<Context>,
        health: Arc<HealthTracker>,
        spawner: Arc<TaskSpawner>,
        review: Arc<ReviewService>,
        mirror: Arc<MirrorManager>,
    ) -> Self {
        let tasks = TaskService::new(Arc::clone(&store));
        Self { store, ctx, health, spawner, review, mirror, tasks }
    }

    fn resolve_cwd(&self, task: &Task) -> PathBuf {
        if let Some(epic_id) = task.epic_id {
            if let Ok(Some(epic)) = self.store.find_epic_by_id(epic_id) {
                if epic.mirror_status == fuel_common::MirrorStatus::Ready {
                    if let Some(path) = &epic.mirror_path {
                        return PathBuf::from(path);
                    }
                }
            }
        }
        self.ctx.project_root.clone()
    }

    /// spec.md §4.8 steps 1-6.
    pub async fn handle(&self, config: &Config, result: CompletionResult) -> anyhow::Result<()> {
        let success = result.completion_type == CompletionType::Success;

        self.store.finalize_run(
            result.run_id,
            if success { RunStatus::Completed } else { RunStatus::Failed },
            result.exit_code,
            result.duration_seconds,
            result.completion_type.failure_class().map(|c| format!("{c:?}")).as_deref(),
        )?;

        if success {
            self.health.record_success(&result.agent_name);
        } else if let Some(class) = result.completion_type.failure_class() {
            self.health.record_failure(&result.agent_name, class);
        }

        self.store.set_task_consumed(result.task_id, false, None)?;

        let Some(task) = self.store.find_task_by_id(result.task_id)? else {
            return Ok(());
        };

        if let Some(review) = self.store.find_review_by_run_id(result.run_id)? {
            if success {
                self.review.handle_success(&review, &result.output_excerpt)?;
            } else {
                self.review.handle_failure(&review)?;
            }
        } else {
            let epic = task.epic_id.and_then(|id| self.store.find_epic_by_id(id).ok().flatten());
            let kind = agent_task::classify(&task, epic.as_ref());
            self.dispatch(config, &task, kind, success, &result).await?;
        }

        self.spawner.invalidate();
        Ok(())
    }

    async fn dispatch(
        &self,
        config: &Config,
        task: &Task,
        kind: Kind,
        success: bool,
        result: &CompletionResult,
    ) -> anyhow::Result<()> {
        match kind {
            Kind::Work => self.on_work_complete(config, task, success).await,
            Kind::MergeEpic { epic_id } => self.on_merge_complete(task, epic_id, success).await,
            Kind::UpdateReality => self.on_update_reality_complete(task),
            Kind::SelfGuided => self.on_self_guided_complete(task, success),
            Kind::Review { .. } => {
                warn!(task = %task.short_id, "completion arrived for a Review-kind task with no Review row");
                let _ = result;
                Ok(())
            }
        }
    }

    /// Work on-success/on-failure (spec.md §4.6 Work).
    async fn on_work_complete(&self, config: &Config, task: &Task, success: bool) -> anyhow::Result<()> {
        if !success {
            return self.reopen_with_retry_accounting(task, config.max_retries);
        }

        if agent_task::review_enabled(config) {
            let cwd = self.resolve_cwd(task);
            match self.review.start(config, task, cwd).await {
                Ok(_) => return Ok(()),
                Err(reason) => {
                    warn!(task = %task.short_id, ?reason, "could not start review, auto-closing instead");
                }
            }
        }

        self.store.set_task_done(task.id, None, task.commit_hash.as_deref())?;
        self.store.add_task_label(task.id, fuel_common::LABEL_AUTO_CLOSED)?;
        Ok(())
    }

    /// MergeEpic on-success/on-failure (spec.md §4.6 MergeEpic, §4.9).
    async fn on_merge_complete(&self, task: &Task, epic_id: i64, success: bool) -> anyhow::Result<()> {
        let Some(epic) = self.store.find_epic_by_id(epic_id)? else {
            return Ok(());
        };

        if success {
            self.mirror.complete_merge_success(&epic).await?;
            self.store.delete_task(task.id)?;
            info!(epic = %epic.short_id, "epic merge completed");
        } else {
            self.mirror.complete_merge_failure(&epic)?;
            self.store.delete_task(task.id)?;
            warn!(epic = %epic.short_id, "epic merge failed, epic paused");
        }
        Ok(())
    }

    /// UpdateReality on-complete (spec.md §4.6 UpdateReality): "fire and
    /// forget"; its own record is cleaned up regardless of outcome.
    fn on_update_reality_complete(&self, task: &Task) -> anyhow::Result<()> {
        self.store.delete_task(task.id)?;
        Ok(())
    }

    /// SelfGuided on-success/on-failure (spec.md §4.6 SelfGuided, §8
    /// scenario 5).
    fn on_self_guided_complete(&self, task: &Task, success: bool) -> anyhow::Result<()> {
        if success {
            self.store.increment_selfguided_iteration(task.id)?;
            if task.status != TaskStatus::Done {
                self.store.set_task_status(task.id, TaskStatus::Open)?;
            }
            return Ok(());
        }

        let stuck_count = self.store.increment_selfguided_stuck_count(task.id)?;
        if stuck_count >= SELFGUIDED_STUCK_LIMIT {
            self.tasks.label_needs_human(&task.short_id, &task.title).map_err(anyhow::Error::from)?;
        } else {
            self.store.set_task_status(task.id, TaskStatus::Open)?;
        }
        Ok(())
    }

    /// Transient-failure retry accounting (spec.md §4.8 "Retry
    /// accounting"): reopen up to `max_retries`, then label `needs-human`.
    /// `runs_for_task` already includes the run `handle` just finalized as
    /// `Failed` above, so this counts strictly more than `max_retries`
    /// only once that many *reopens* have already happened.
    fn reopen_with_retry_accounting(&self, task: &Task, max_retries: u32) -> anyhow::Result<()> {
        let prior_failures = self.store.runs_for_task(task.id)?.iter().filter(|r| r.status == RunStatus::Failed).count() as u32;
        if prior_failures > max_retries {
            self.tasks.label_needs_human(&task.short_id, &task.title).map_err(anyhow::Error::from)?;
        } else {
            self.store.set_task_status(task.id, TaskStatus::Open)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tasks::NewTask as NewTaskInput;
    use crate::supervisor::ProcessSupervisor;
    use fuel_common::{Complexity, TaskType};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn base_config() -> Config {
        let mut agents = HashMap::new();
        agents.insert(
            "primary".to_string(),
            crate::config::AgentConfig {
                driver: "claude".into(),
                command: None,
                model: None,
                args: vec![],
                env: HashMap::new(),
                max_concurrent: 2,
            },
        );
        Config {
            primary: "primary".into(),
            complexity: Default::default(),
            review: None,
            reality: None,
            agents,
            epic_mirrors: false,
            task_review: false,
            max_retries: 2,
            shutdown_grace_seconds: 10,
            interval_seconds: 5,
            client_buffer_bytes: 1024,
            task_timeout_seconds: 3600,
            reviewable_after_manual_reopen: false,
        }
    }

    fn handler(store: Arc<Store>) -> CompletionHandler {
        let dir = tempdir().unwrap();
        let ctx = Arc::new(Context::resolve(Some(dir.path().to_path_buf())).unwrap());
        let health = Arc::new(HealthTracker::new());
        let (supervisor, _rx) = ProcessSupervisor::new();
        let supervisor = Arc::new(supervisor);
        let spawner = Arc::new(TaskSpawner::new(Arc::clone(&store), Arc::clone(&ctx), Arc::clone(&health), Arc::clone(&supervisor)));
        let review = Arc::new(ReviewService::new(Arc::clone(&store), Arc::clone(&ctx), Arc::clone(&supervisor)));
        let mirror = Arc::new(MirrorManager::new(Arc::clone(&store), Arc::clone(&ctx)));
        CompletionHandler::new(store, ctx, health, spawner, review, mirror)
    }

    fn completion(task_id: i64, run_id: i64, completion_type: CompletionType) -> CompletionResult {
        CompletionResult {
            task_id,
            run_id,
            agent_name: "primary".into(),
            exit_code: if completion_type == CompletionType::Success { 0 } else { 1 },
            duration_seconds: 1.0,
            session_id: None,
            cost_usd: None,
            output_excerpt: String::new(),
            completion_type,
        }
    }

    #[tokio::test]
    async fn work_success_without_review_marks_done_and_auto_closed() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let task = store
            .create_task(NewTaskInput { title: "t".into(), complexity: Complexity::Moderate, ..Default::default() })
            .unwrap();
        let run = store
            .create_run(crate::store::runs::NewRun { task_id: task.id, agent: "primary".into(), model: None, output_path: "p".into(), pid: Some(1) })
            .unwrap();
        store.set_task_status(task.id, TaskStatus::InProgress).unwrap();

        let handler = handler(Arc::clone(&store));
        let config = base_config();
        handler.handle(&config, completion(task.id, run.id, CompletionType::Success)).await.unwrap();

        let updated = store.find_task_by_id(task.id).unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Done);
        assert!(updated.has_label(fuel_common::LABEL_AUTO_CLOSED));
    }

    #[tokio::test]
    async fn work_failure_reopens_until_max_retries_then_needs_human() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let task = store.create_task(NewTaskInput { title: "t".into(), ..Default::default() }).unwrap();
        let handler = handler(Arc::clone(&store));
        let config = base_config();

        for _ in 0..config.max_retries {
            let run = store
                .create_run(crate::store::runs::NewRun { task_id: task.id, agent: "primary".into(), model: None, output_path: "p".into(), pid: Some(1) })
                .unwrap();
            handler.handle(&config, completion(task.id, run.id, CompletionType::Failed)).await.unwrap();
        }
        let mid = store.find_task_by_id(task.id).unwrap().unwrap();
        assert_eq!(mid.status, TaskStatus::Open);
        assert!(!mid.has_label(fuel_common::LABEL_NEEDS_HUMAN));

        let run = store
            .create_run(crate::store::runs::NewRun { task_id: task.id, agent: "primary".into(), model: None, output_path: "p".into(), pid: Some(1) })
            .unwrap();
        handler.handle(&config, completion(task.id, run.id, CompletionType::Failed)).await.unwrap();
        let updated = store.find_task_by_id(task.id).unwrap().unwrap();
        assert!(updated.has_label(fuel_common::LABEL_NEEDS_HUMAN));
        assert!(!updated.blocked_by.is_empty());
    }

    #[tokio::test]
    async fn self_guided_stuck_three_times_creates_needs_human_blocker() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let epic = store
            .create_epic(crate::store::epics::NewEpic { title: "e".into(), self_guided: true, plan_filename: "p.md".into(), ..Default::default() })
            .unwrap();
        let task = store
            .create_task(NewTaskInput { title: "t".into(), task_type: TaskType::Task, epic_id: Some(epic.id), ..Default::default() })
            .unwrap();
        store.set_task_status(task.id, TaskStatus::InProgress).unwrap();

        let handler = handler(Arc::clone(&store));
        let config = base_config();

        for _ in 0..3 {
            let run = store
                .create_run(crate::store::runs::NewRun { task_id: task.id, agent: "primary".into(), model: None, output_path: "p".into(), pid: Some(1) })
                .unwrap();
            handler.handle(&config, completion(task.id, run.id, CompletionType::Failed)).await.unwrap();
        }

        let updated = store.find_task_by_id(task.id).unwrap().unwrap();
        assert_eq!(updated.selfguided_stuck_count, 3);
        assert!(updated.has_label(fuel_common::LABEL_NEEDS_HUMAN));
    }
}
