//! Snapshot Builder (spec.md §4.10 "Snapshotting"): computes a
//! `ConsumeSnapshot` from one consistent Store read and decides whether
//! it differs enough from the last broadcast one to be worth sending.
//!
//! Grounded in `factory/ws.rs`'s board-state broadcaster: one function
//! that reads the current world and diffs against the last-sent hash
//! before pushing to connected clients, adapted from a single websocket
//! payload to the typed `ConsumeSnapshot` wire struct.

use crate::config::Config;
use crate::health::HealthTracker;
use crate::ready::{compute_ready, ResolverInput};
use crate::store::Store;
use fuel_common::{ConsumeSnapshot, ProcessDescriptor, TaskBuckets, TaskStatus, LABEL_NEEDS_HUMAN};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct SnapshotBuilder {
    last_hash: AtomicU64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { last_hash: AtomicU64::new(0) }
    }

    /// One consistent read of Tasks/Epics/Runs/Health (spec.md §4.10
    /// "recomputes ... from one consistent read").
    pub fn build(
        &self,
        store: &Store,
        health: &HealthTracker,
        config: &Config,
        instance_id: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        paused: bool,
    ) -> anyhow::Result<ConsumeSnapshot> {
        let tasks = store.all_tasks()?;
        let epics = store.all_epics()?;
        let active_runs = store.active_runs()?;
        let epic_map: HashMap<i64, fuel_common::Epic> = epics.iter().map(|e| (e.id, e.clone())).collect();

        let ready_ids: Vec<String> = compute_ready(&ResolverInput { tasks: tasks.clone(), epics: epic_map }, config.epic_mirrors)
            .into_iter()
            .map(|t| t.short_id)
            .collect();

        let mut buckets = TaskBuckets::default();
        for task in &tasks {
            if task.has_label(LABEL_NEEDS_HUMAN) {
                buckets.human.push(task.short_id.clone());
                continue;
            }
            match task.status {
                TaskStatus::InProgress => buckets.in_progress.push(task.short_id.clone()),
                TaskStatus::Review => buckets.review.push(task.short_id.clone()),
                TaskStatus::Done | TaskStatus::Cancelled => buckets.done.push(task.short_id.clone()),
                TaskStatus::Open if ready_ids.contains(&task.short_id) => buckets.ready.push(task.short_id.clone()),
                _ => buckets.blocked.push(task.short_id.clone()),
            }
        }

        let by_task_id: HashMap<i64, &fuel_common::Task> = tasks.iter().map(|t| (t.id, t)).collect();
        let active_processes = active_runs
            .iter()
            .filter_map(|run| {
                let task = by_task_id.get(&run.task_id)?;
                Some(ProcessDescriptor {
                    run_short_id: run.short_id.clone(),
                    task_short_id: task.short_id.clone(),
                    agent: run.agent.clone(),
                    pid: run.pid.unwrap_or(0),
                    started_at: run.started_at,
                })
            })
            .collect();

        Ok(ConsumeSnapshot {
            instance_id: instance_id.to_string(),
            started_at,
            paused,
            interval_seconds: config.interval_seconds,
            buckets,
            active_processes,
            agent_health: health.snapshot(),
            agent_concurrency_limits: config.agents.iter().map(|(name, cfg)| (name.clone(), cfg.max_concurrent)).collect(),
            epics: epics.into_iter().map(|e| e.short_id).collect(),
        })
    }

    /// Returns `Some(snapshot)` only when its board hash differs from the
    /// last one returned, so the daemon loop broadcasts on change, on
    /// `RequestSnapshot`, and at the tick interval — never on every tick
    /// regardless of whether anything moved (spec.md §4.10).
    pub fn build_if_changed(
        &self,
        store: &Store,
        health: &HealthTracker,
        config: &Config,
        instance_id: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        paused: bool,
    ) -> anyhow::Result<Option<ConsumeSnapshot>> {
        let snapshot = self.build(store, health, config, instance_id, started_at, paused)?;
        let hash = snapshot.board_hash();
        let previous = self.last_hash.swap(hash, Ordering::SeqCst);
        if previous == hash {
            Ok(None)
        } else {
            Ok(Some(snapshot))
        }
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}
