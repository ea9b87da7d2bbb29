//! Task Spawner (spec.md §4.7): turns ready tasks into running
//! processes, one tick at a time.
//!
//! Grounded in `orchestrator/mod.rs`'s wave-dispatch loop (iterate ready
//! nodes, skip unavailable ones, launch what's left) generalized from a
//! static wave of phases to a live, resolver-driven task queue.

use crate::agent_task::{self, Kind};
use crate::config::Config;
use crate::context::Context;
use crate::health::HealthTracker;
use crate::ready::{ReadyResolver, ResolverInput};
use crate::store::Store;
use crate::supervisor::{ProcessSupervisor, SpawnRequest, SpawnResult};
use crate::tasks::TaskService;
use fuel_common::{Epic, MirrorStatus, Task};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Why a ready task was not spawned this tick (spec.md §4.7 step 2b/2e).
#[derive(Debug, PartialEq, Eq)]
pub enum SkipReason {
    AgentUnavailable,
    AtCapacity,
    AgentNotFound,
    ConfigError,
    SpawnFailed,
}

pub struct TaskSpawner {
    store: Arc<Store>,
    ctx: Arc<Context>,
    health: Arc<HealthTracker>,
    supervisor: Arc<ProcessSupervisor>,
    resolver: ReadyResolver,
    tasks: TaskService,
}

impl TaskSpawner {
    pub fn new(
        store: Arc<Store>,
        ctx: Arc<Context>,
        health: Arc<HealthTracker>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        let tasks = TaskService::new(Arc::clone(&store));
        Self { store, ctx, health, supervisor, resolver: ReadyResolver::new(), tasks }
    }

    pub fn invalidate(&self) {
        self.resolver.invalidate();
    }

    fn load_input(&self) -> anyhow::Result<ResolverInput> {
        let tasks = self.store.all_tasks()?;
        let epics = self.store.all_epics()?;
        Ok(ResolverInput { tasks, epics: epics.into_iter().map(|e| (e.id, e)).collect() })
    }

    /// Resolves the cwd per spec.md §4.9: an epic's `mirror_path` while
    /// `mirror_status==ready`, else the project root.
    fn resolve_cwd(&self, task: &Task, epics: &HashMap<i64, Epic>) -> std::path::PathBuf {
        if let Some(epic_id) = task.epic_id {
            if let Some(epic) = epics.get(&epic_id) {
                if epic.mirror_status == MirrorStatus::Ready {
                    if let Some(path) = &epic.mirror_path {
                        return std::path::PathBuf::from(path);
                    }
                }
            }
        }
        self.ctx.project_root.clone()
    }

    /// One scheduler tick (spec.md §4.7): invalidate, compute ready,
    /// spawn what can be spawned, stop when nothing more fits.
    pub async fn tick(&self, config: &Config) -> anyhow::Result<Vec<Result<i64, SkipReason>>> {
        let input = self.load_input()?;
        let ready = self.resolver.compute(&input, config.epic_mirrors);
        let mut outcomes = Vec::new();

        for task in ready {
            let epic = task.epic_id.and_then(|id| input.epics.get(&id));
            let kind = agent_task::classify(&task, epic);
            let outcome = self.spawn_one(config, &task, kind, &input.epics, None).await;
            if outcome.is_ok() {
                self.resolver.invalidate();
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Spawns a single task immediately, bypassing the ready resolver
    /// (IPC `TaskStart` command, spec.md §4.10). `agent_override`
    /// replaces the configured agent for this one run only.
    pub async fn spawn_now(
        &self,
        config: &Config,
        task_id: i64,
        agent_override: Option<&str>,
    ) -> Result<i64, SkipReason> {
        let input = self.load_input().map_err(|_| SkipReason::SpawnFailed)?;
        let task = input
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .ok_or(SkipReason::SpawnFailed)?;
        let epic = task.epic_id.and_then(|id| input.epics.get(&id));
        let kind = agent_task::classify(&task, epic);
        let outcome = self.spawn_one(config, &task, kind, &input.epics, agent_override).await;
        if outcome.is_ok() {
            self.resolver.invalidate();
        }
        outcome
    }

    async fn spawn_one(
        &self,
        config: &Config,
        task: &Task,
        kind: Kind,
        epics: &HashMap<i64, Epic>,
        agent_override: Option<&str>,
    ) -> Result<i64, SkipReason> {
        let agent_name = match agent_override.map(|s| s.to_string()).or_else(|| agent_task::agent_name(kind, task, config)) {
            Some(name) => name,
            None => {
                warn!(task = %task.short_id, "no agent configured for this variant, skipping");
                self.label_needs_human(task);
                return Err(SkipReason::ConfigError);
            }
        };

        if !self.health.is_available(&agent_name) {
            return Err(SkipReason::AgentUnavailable);
        }

        let agent_config = match config.agents.get(&agent_name) {
            Some(cfg) => cfg,
            None => {
                self.label_needs_human(task);
                return Err(SkipReason::ConfigError);
            }
        };

        let driver = match crate::drivers::DriverRegistry::default().get(&agent_config.driver) {
            Some(driver) => driver.clone(),
            None => {
                self.label_needs_human(task);
                return Err(SkipReason::ConfigError);
            }
        };

        // Checked up front so a full agent doesn't cause a `Run` row to
        // be allocated at all (spec.md §8: "Agent at `maxConcurrent` ...
        // does not start a Run row"). `supervisor.spawn` re-checks the
        // same condition right before launching as the race-safe guard.
        if !self.supervisor.has_capacity(&agent_name, agent_config.max_concurrent) {
            return Err(SkipReason::AtCapacity);
        }

        let cwd = self.resolve_cwd(task, epics);
        let prompt = match kind {
            Kind::Work => agent_task::prompt::work(&self.ctx, task),
            Kind::UpdateReality => {
                let reality = std::fs::read_to_string(&self.ctx.reality_path).unwrap_or_default();
                agent_task::prompt::update_reality(&self.ctx, &reality)
            }
            Kind::MergeEpic { epic_id } => {
                let epic = epics.get(&epic_id).cloned().unwrap_or_else(|| placeholder_epic(epic_id));
                agent_task::prompt::merge_epic(&self.ctx, &epic)
            }
            Kind::SelfGuided => {
                let epic = task.epic_id.and_then(|id| epics.get(&id)).cloned().unwrap_or_else(|| placeholder_epic(0));
                let reality = std::fs::read_to_string(&self.ctx.reality_path).unwrap_or_default();
                let plan = std::fs::read_to_string(self.ctx.fuel_dir.join(&epic.plan_filename)).unwrap_or_default();
                agent_task::prompt::self_guided(&self.ctx, &epic, task, &reality, &plan)
            }
            Kind::Review { .. } => unreachable!("review runs are spawned by the review service, not the main tick"),
        };

        let run = self
            .store
            .create_run(crate::store::runs::NewRun {
                task_id: task.id,
                agent: agent_name.clone(),
                model: agent_config.model.clone(),
                output_path: self.ctx.run_log_path(&Uuid::new_v4().to_string()).display().to_string(),
                pid: None,
            })
            .map_err(|_| SkipReason::SpawnFailed)?;

        self.store
            .set_task_status(task.id, fuel_common::TaskStatus::InProgress)
            .map_err(|_| SkipReason::SpawnFailed)?;
        self.store
            .set_task_consumed(task.id, true, None)
            .map_err(|_| SkipReason::SpawnFailed)?;

        let request = SpawnRequest {
            run_id: run.id,
            task_id: task.id,
            agent_name: agent_name.clone(),
            driver,
            model: agent_config.model.clone(),
            max_concurrent: agent_config.max_concurrent,
            env: agent_config.env.clone().into_iter().collect(),
            prompt,
            cwd,
            output_path: std::path::PathBuf::from(&run.output_path),
        };

        match self.supervisor.spawn(request).await {
            SpawnResult::Success { pid, .. } => {
                let _ = self.store.set_task_consumed(task.id, true, Some(pid));
                info!(task = %task.short_id, agent = %agent_name, "spawned");
                Ok(task.id)
            }
            SpawnResult::AtCapacity => {
                // Race against the up-front check: the slot filled between
                // `has_capacity` and `spawn`. Retryable, so just reopen —
                // but the run row this arm inherited never actually ran.
                let _ = self.store.delete_run(run.id);
                let _ = self.store.set_task_consumed(task.id, false, None);
                let _ = self.store.set_task_status(task.id, fuel_common::TaskStatus::Open);
                Err(SkipReason::AtCapacity)
            }
            SpawnResult::AgentNotFound => {
                let _ = self.store.delete_run(run.id);
                let _ = self.store.set_task_consumed(task.id, false, None);
                self.label_needs_human(task);
                Err(SkipReason::AgentNotFound)
            }
            SpawnResult::SpawnFailed(reason) => {
                warn!(task = %task.short_id, %reason, "spawn failed");
                let _ = self.store.delete_run(run.id);
                let _ = self.store.set_task_consumed(task.id, false, None);
                let _ = self.store.set_task_status(task.id, fuel_common::TaskStatus::Open);
                Err(SkipReason::SpawnFailed)
            }
        }
    }

    /// Moves a task to a `needs-human` blocker instead of silently
    /// retrying a failure that won't resolve itself on the next tick
    /// (spec.md §4.7 step 2e, §7 NonRetryableAgentFailure).
    fn label_needs_human(&self, task: &Task) {
        if let Err(err) = self.tasks.label_needs_human(&task.short_id, &task.title) {
            warn!(task = %task.short_id, %err, "failed to label task needs-human");
        }
    }
}

fn placeholder_epic(id: i64) -> Epic {
    Epic {
        id,
        short_id: String::new(),
        title: String::new(),
        description: String::new(),
        self_guided: false,
        plan_filename: String::new(),
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
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tasks::NewTask as NewTaskInput;
    use tempfile::tempdir;

    #[test]
    fn skip_reason_equality() {
        assert_eq!(SkipReason::AtCapacity, SkipReason::AtCapacity);
        assert_ne!(SkipReason::AtCapacity, SkipReason::AgentNotFound);
    }

    fn spawner(store: Arc<Store>) -> TaskSpawner {
        let dir = tempdir().unwrap();
        let ctx = Arc::new(Context::resolve(Some(dir.path().to_path_buf())).unwrap());
        let health = Arc::new(HealthTracker::new());
        let (supervisor, _rx) = ProcessSupervisor::new();
        TaskSpawner::new(store, ctx, health, Arc::new(supervisor))
    }

    fn config_with_agent(driver: &str) -> Config {
        let mut agents = HashMap::new();
        agents.insert(
            "primary".to_string(),
            crate::config::AgentConfig {
                driver: driver.to_string(),
                command: None,
                model: None,
                args: vec![],
                env: HashMap::new(),
                max_concurrent: 1,
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

    #[tokio::test]
    async fn unknown_driver_labels_needs_human_without_leaving_a_run_row() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let task = store.create_task(NewTaskInput { title: "t".into(), ..Default::default() }).unwrap();
        let config = config_with_agent("no-such-driver");
        let spawner = spawner(Arc::clone(&store));

        let result = spawner.spawn_now(&config, task.id, Some("primary")).await;

        assert_eq!(result, Err(SkipReason::ConfigError));
        assert!(store.runs_for_task(task.id).unwrap().is_empty());
        let updated = store.find_task_by_id(task.id).unwrap().unwrap();
        assert!(updated.has_label(fuel_common::LABEL_NEEDS_HUMAN));
        assert!(!updated.blocked_by.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_agent_name_labels_needs_human_without_leaving_a_run_row() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let task = store.create_task(NewTaskInput { title: "t".into(), ..Default::default() }).unwrap();
        let config = config_with_agent("claude");
        let spawner = spawner(Arc::clone(&store));

        let result = spawner.spawn_now(&config, task.id, Some("not-configured")).await;

        assert_eq!(result, Err(SkipReason::ConfigError));
        assert!(store.runs_for_task(task.id).unwrap().is_empty());
        let updated = store.find_task_by_id(task.id).unwrap().unwrap();
        assert!(updated.has_label(fuel_common::LABEL_NEEDS_HUMAN));
    }

    #[tokio::test]
    async fn at_capacity_is_checked_before_a_run_row_is_created() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let task = store.create_task(NewTaskInput { title: "t".into(), ..Default::default() }).unwrap();
        let config = config_with_agent("claude");
        let spawner = spawner(Arc::clone(&store));
        spawner.supervisor.active.insert("primary".to_string(), std::sync::atomic::AtomicU32::new(1));

        let result = spawner.spawn_now(&config, task.id, Some("primary")).await;

        assert_eq!(result, Err(SkipReason::AtCapacity));
        assert!(store.runs_for_task(task.id).unwrap().is_empty());
        let updated = store.find_task_by_id(task.id).unwrap().unwrap();
        assert_eq!(updated.status, fuel_common::TaskStatus::Open);
    }
}
