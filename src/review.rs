//! Review Service (spec.md §4.6 Review variant): builds a review prompt
//! from a working-tree diff, spawns the reviewer as an ordinary supervised
//! process, and turns its structured verdict back into task state.
//!
//! The diff/status helper is a fresh `git2` reader written in the idiom of
//! `tracker/git.rs`'s `get_full_diffs` (per-delta `Patch::from_diff` +
//! `print`), not a reuse of that file directly: `tracker/git.rs` diffs
//! against a recorded snapshot commit for the out-of-scope phase-audit
//! trail, where this needs a plain working-tree diff. Spawning itself is
//! grounded in `spawner.rs`'s `spawn_one`, since `TaskSpawner` explicitly
//! refuses `Kind::Review` (it has no ready-resolver entry of its own; the
//! Completion Handler starts it directly off a Work success).

use crate::agent_task::prompt;
use crate::config::Config;
use crate::context::Context;
use crate::drivers::DriverRegistry;
use crate::errors::StoreError;
use crate::store::reviews::NewReview;
use crate::store::runs::NewRun;
use crate::store::Store;
use crate::supervisor::{ProcessSupervisor, SpawnRequest, SpawnResult};
use crate::util;
use fuel_common::{Review, ReviewOutcome, Task, TaskStatus};
use git2::{DiffOptions, Patch, Repository};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Why a review could not be started this attempt (spec.md §4.7 step 2b,
/// generalized to the Review variant).
#[derive(Debug, PartialEq, Eq)]
pub enum ReviewSkipReason {
    NoReviewAgent,
    AgentNotFound,
    AtCapacity,
    SpawnFailed,
}

pub struct ReviewService {
    store: Arc<Store>,
    ctx: Arc<Context>,
    supervisor: Arc<ProcessSupervisor>,
}

impl ReviewService {
    pub fn new(store: Arc<Store>, ctx: Arc<Context>, supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { store, ctx, supervisor }
    }

    /// Unified diff plus a short status summary of `cwd`'s working tree
    /// (spec.md §4.6: "prompt is built from a template + git diff + git
    /// status of the working directory").
    fn working_tree_diff(cwd: &Path) -> String {
        let Ok(repo) = Repository::open(cwd) else {
            return String::new();
        };
        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let Ok(diff) = repo.diff_index_to_workdir(None, Some(&mut opts)) else {
            return String::new();
        };

        let mut status_lines = Vec::new();
        let mut patch_text = String::new();
        for idx in 0..diff.deltas().len() {
            let Some(delta) = diff.get_delta(idx) else { continue };
            if let Some(path) = delta.new_file().path() {
                status_lines.push(format!("{:?}\t{}", delta.status(), path.display()));
            }
            if let Ok(Some(mut patch)) = Patch::from_diff(&diff, idx) {
                let mut buf = Vec::new();
                let _ = patch.print(&mut |_delta, _hunk, line| {
                    buf.extend_from_slice(line.content());
                    true
                });
                patch_text.push_str(&String::from_utf8_lossy(&buf));
            }
        }

        format!("## git status\n{}\n\n## git diff\n{}", status_lines.join("\n"), patch_text)
    }

    /// Work's on-success hook when review is enabled (spec.md §4.6 Work:
    /// "trigger a review"; §4.8 step 4): moves the task into `review` and
    /// spawns a reviewer run against the same working directory the work
    /// run just used.
    pub async fn start(&self, config: &Config, task: &Task, cwd: PathBuf) -> Result<i64, ReviewSkipReason> {
        let agent_name = config.review.clone().ok_or(ReviewSkipReason::NoReviewAgent)?;
        let agent_config = config.agents.get(&agent_name).ok_or(ReviewSkipReason::NoReviewAgent)?;
        let driver = DriverRegistry::default()
            .get(&agent_config.driver)
            .cloned()
            .ok_or(ReviewSkipReason::NoReviewAgent)?;

        let diff = Self::working_tree_diff(&cwd);
        let prompt_text = prompt::review(&self.ctx, task, &diff);

        let run = self
            .store
            .create_run(NewRun {
                task_id: task.id,
                agent: agent_name.clone(),
                model: agent_config.model.clone(),
                output_path: self
                    .ctx
                    .run_log_path(&format!("review-{}", task.short_id))
                    .display()
                    .to_string(),
                pid: None,
            })
            .map_err(|_| ReviewSkipReason::SpawnFailed)?;

        self.store
            .create_review(NewReview { task_id: task.id, run_id: run.id, agent: agent_name.clone() })
            .map_err(|_| ReviewSkipReason::SpawnFailed)?;
        self.store.set_task_status(task.id, TaskStatus::Review).map_err(|_| ReviewSkipReason::SpawnFailed)?;
        self.store.set_task_consumed(task.id, true, None).map_err(|_| ReviewSkipReason::SpawnFailed)?;

        let request = SpawnRequest {
            run_id: run.id,
            task_id: task.id,
            agent_name: agent_name.clone(),
            driver,
            model: agent_config.model.clone(),
            max_concurrent: agent_config.max_concurrent,
            env: agent_config.env.clone().into_iter().collect(),
            prompt: prompt_text,
            cwd,
            output_path: PathBuf::from(&run.output_path),
        };

        match self.supervisor.spawn(request).await {
            SpawnResult::Success { pid, .. } => {
                let _ = self.store.set_task_consumed(task.id, true, Some(pid));
                info!(task = %task.short_id, "review spawned");
                Ok(run.id)
            }
            SpawnResult::AtCapacity => Err(ReviewSkipReason::AtCapacity),
            SpawnResult::AgentNotFound => Err(ReviewSkipReason::AgentNotFound),
            SpawnResult::SpawnFailed(reason) => {
                warn!(task = %task.short_id, %reason, "review spawn failed");
                Err(ReviewSkipReason::SpawnFailed)
            }
        }
    }

    /// The reviewer's own completion (spec.md §4.6 Review on-success):
    /// parse `ReviewOutcome` out of the run's output, complete the `Review`
    /// row, and transition the original task.
    pub fn handle_success(&self, review: &Review, output_excerpt: &str) -> Result<(), StoreError> {
        let outcome = util::extract_json_object(output_excerpt)
            .and_then(|json| serde_json::from_str::<ReviewOutcome>(&json).ok());

        let Some(outcome) = outcome else {
            return self.reopen_unparsed(review);
        };

        self.store.complete_review(review.id, &outcome.issues)?;

        let Some(task) = self.store.find_task_by_id(review.task_id)? else {
            return Ok(());
        };

        if outcome.passed && task.status == TaskStatus::Review {
            self.store.set_task_done(task.id, None, task.commit_hash.as_deref())?;
        } else if !outcome.passed {
            self.store.set_task_last_review_issues(task.id, &outcome.issues)?;
            self.store.set_task_status(task.id, TaskStatus::Open)?;
        }
        Ok(())
    }

    /// The reviewer agent crashed outright (spec.md §4.6 Review
    /// on-failure): reopen the original task without recording a verdict.
    pub fn handle_failure(&self, review: &Review) -> Result<(), StoreError> {
        self.store.complete_review(review.id, &["review_agent_crashed".to_string()])?;
        self.store.set_task_status(review.task_id, TaskStatus::Open)
    }

    fn reopen_unparsed(&self, review: &Review) -> Result<(), StoreError> {
        self.store.complete_review(review.id, &["review_output_unparseable".to_string()])?;
        self.store.set_task_status(review.task_id, TaskStatus::Open)
    }
}
