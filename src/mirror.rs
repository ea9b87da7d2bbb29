//! Mirror Manager (spec.md §4.9): one isolated git worktree per epic,
//! checked out onto its own branch, merged back on approval.
//!
//! Grounded in `factory/agent_executor.rs`'s `setup_worktree`/
//! `cleanup_worktree`: the same `git worktree add -b {branch} {path}
//! {base}` / `git worktree remove --force` pair, run via
//! `tokio::process::Command` against the project root. `mirror_*` fields
//! are exclusively owned here (spec.md §3 "Lifecycle/ownership").

use crate::context::Context;
use crate::errors::StoreError;
use crate::store::Store;
use anyhow::{bail, Context as _, Result};
use fuel_common::{Epic, MirrorStatus};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

pub struct MirrorManager {
    store: Arc<Store>,
    ctx: Arc<Context>,
}

impl MirrorManager {
    pub fn new(store: Arc<Store>, ctx: Arc<Context>) -> Self {
        Self { store, ctx }
    }

    fn mirror_path(&self, epic: &Epic) -> std::path::PathBuf {
        self.ctx.mirrors_dir.join(&epic.short_id)
    }

    fn branch_name(epic: &Epic) -> String {
        format!("epic/{}", epic.short_id)
    }

    async fn run_git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.ctx.project_root)
            .output()
            .await
            .with_context(|| format!("failed to run git {args:?}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {args:?} failed: {}", stderr.trim());
        }
        Ok(())
    }

    async fn git_stdout(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.ctx.project_root)
            .output()
            .await
            .with_context(|| format!("failed to run git {args:?}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {args:?} failed: {}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Creates an epic's isolated worktree (spec.md §4.9 `none→pending→
    /// creating→ready`). `base_commit` is captured via `git rev-parse HEAD`
    /// *before* the worktree add, so the recorded base matches exactly what
    /// the branch forked from.
    pub async fn ensure_mirror(&self, epic: &Epic) -> Result<()> {
        if epic.mirror_status != MirrorStatus::None {
            return Ok(());
        }
        self.set_status(epic.id, MirrorStatus::Pending)?;
        self.set_status(epic.id, MirrorStatus::Creating)?;

        let base_commit = match self.git_stdout(&["rev-parse", "HEAD"]).await {
            Ok(sha) => sha,
            Err(e) => {
                self.set_status(epic.id, MirrorStatus::None)?;
                return Err(e);
            }
        };

        let branch = Self::branch_name(epic);
        let path = self.mirror_path(epic);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let path_str = path.to_string_lossy().to_string();

        let add = self.run_git(&["worktree", "add", "-b", &branch, &path_str, &base_commit]).await;
        if let Err(e) = add {
            self.set_status(epic.id, MirrorStatus::None)?;
            return Err(e);
        }

        self.store
            .set_epic_mirror_created(epic.id, &path_str, &branch, &base_commit)
            .map_err(anyhow::Error::from)?;
        info!(epic = %epic.short_id, %branch, "mirror ready");
        Ok(())
    }

    /// `MergeEpic` success (spec.md §4.6 MergeEpic, §4.9): the merge agent
    /// already merged the branch in `project_root`; this just tears down
    /// the now-unneeded worktree.
    pub async fn complete_merge_success(&self, epic: &Epic) -> Result<()> {
        self.set_status(epic.id, MirrorStatus::Merged)?;
        if let Some(path) = &epic.mirror_path {
            if let Err(e) = self.run_git(&["worktree", "remove", "--force", path]).await {
                warn!(epic = %epic.short_id, error = %e, "worktree removal failed after merge");
            }
        }
        self.set_status(epic.id, MirrorStatus::Cleaned)?;
        self.store.clear_epic_mirror(epic.id).map_err(anyhow::Error::from)?;
        Ok(())
    }

    /// `MergeEpic` failure (spec.md §4.6 MergeEpic): pause the epic and
    /// leave the worktree in place for human inspection.
    pub fn complete_merge_failure(&self, epic: &Epic) -> Result<(), StoreError> {
        self.store.set_epic_mirror_status(epic.id, MirrorStatus::MergeFailed)?;
        self.store.set_epic_paused(epic.id, true)
    }

    fn set_status(&self, epic_id: i64, status: MirrorStatus) -> Result<(), StoreError> {
        self.store.set_epic_mirror_status(epic_id, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::epics::NewEpic;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;

    fn init_repo(dir: &std::path::Path) {
        StdCommand::new("git").arg("init").arg("-q").current_dir(dir).status().unwrap();
        StdCommand::new("git").args(["config", "user.email", "t@t.com"]).current_dir(dir).status().unwrap();
        StdCommand::new("git").args(["config", "user.name", "t"]).current_dir(dir).status().unwrap();
        std::fs::write(dir.join("a.txt"), "hello\n").unwrap();
        StdCommand::new("git").args(["add", "."]).current_dir(dir).status().unwrap();
        StdCommand::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir).status().unwrap();
    }

    #[tokio::test]
    async fn ensure_mirror_creates_worktree_and_marks_ready() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let ctx = Arc::new(Context::resolve(Some(dir.path().to_path_buf())).unwrap());
        ctx.ensure_directories().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let epic = store
            .create_epic(NewEpic { title: "e".into(), plan_filename: "p.md".into(), ..Default::default() })
            .unwrap();

        let manager = MirrorManager::new(Arc::clone(&store), ctx);
        manager.ensure_mirror(&epic).await.unwrap();

        let updated = store.find_epic_by_id(epic.id).unwrap().unwrap();
        assert_eq!(updated.mirror_status, MirrorStatus::Ready);
        assert!(updated.mirror_path.as_deref().unwrap().ends_with(&epic.short_id));
        assert!(std::path::Path::new(updated.mirror_path.as_deref().unwrap()).join("a.txt").exists());
    }

    #[tokio::test]
    async fn complete_merge_success_removes_worktree_and_clears_fields() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let ctx = Arc::new(Context::resolve(Some(dir.path().to_path_buf())).unwrap());
        ctx.ensure_directories().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let epic = store
            .create_epic(NewEpic { title: "e".into(), plan_filename: "p.md".into(), ..Default::default() })
            .unwrap();
        let manager = MirrorManager::new(Arc::clone(&store), ctx);
        manager.ensure_mirror(&epic).await.unwrap();
        let created = store.find_epic_by_id(epic.id).unwrap().unwrap();

        manager.complete_merge_success(&created).await.unwrap();
        let updated = store.find_epic_by_id(epic.id).unwrap().unwrap();
        assert_eq!(updated.mirror_status, MirrorStatus::Cleaned);
        assert!(updated.mirror_path.is_none());
    }

    #[tokio::test]
    async fn complete_merge_failure_pauses_epic() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let ctx = Arc::new(Context::resolve(Some(dir.path().to_path_buf())).unwrap());
        let store = Arc::new(Store::open_in_memory().unwrap());
        let epic = store
            .create_epic(NewEpic { title: "e".into(), plan_filename: "p.md".into(), ..Default::default() })
            .unwrap();
        let manager = MirrorManager::new(Arc::clone(&store), ctx);
        manager.complete_merge_failure(&epic).unwrap();
        let updated = store.find_epic_by_id(epic.id).unwrap().unwrap();
        assert_eq!(updated.mirror_status, MirrorStatus::MergeFailed);
        assert!(updated.paused_at.is_some());
    }
}
