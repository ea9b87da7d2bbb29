//! `ConsumeSnapshot` — the picture broadcast to IPC clients (spec.md §3,
//! §4.10).

use crate::health::AgentHealth;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A running child process, as seen from the outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub run_short_id: String,
    pub task_short_id: String,
    pub agent: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// The six task buckets a snapshot is organized into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskBuckets {
    pub ready: Vec<String>,
    pub in_progress: Vec<String>,
    pub review: Vec<String>,
    pub blocked: Vec<String>,
    pub human: Vec<String>,
    pub done: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeSnapshot {
    pub instance_id: String,
    pub started_at: DateTime<Utc>,
    pub paused: bool,
    pub interval_seconds: u64,
    pub buckets: TaskBuckets,
    pub active_processes: Vec<ProcessDescriptor>,
    pub agent_health: Vec<AgentHealth>,
    pub agent_concurrency_limits: Vec<(String, u32)>,
    pub epics: Vec<String>,
}

impl ConsumeSnapshot {
    /// Hashes board composition: sorted task-id lists per bucket, the set
    /// of active process ids, and the paused flag. Two snapshots with an
    /// equal hash MUST NOT both be broadcast (spec.md §4.10, §8).
    pub fn board_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        let mut hash_sorted = |ids: &[String], hasher: &mut DefaultHasher| {
            let mut sorted: Vec<&String> = ids.iter().collect();
            sorted.sort();
            for id in sorted {
                id.hash(hasher);
            }
        };
        hash_sorted(&self.buckets.ready, &mut hasher);
        b"|".hash(&mut hasher);
        hash_sorted(&self.buckets.in_progress, &mut hasher);
        b"|".hash(&mut hasher);
        hash_sorted(&self.buckets.review, &mut hasher);
        b"|".hash(&mut hasher);
        hash_sorted(&self.buckets.blocked, &mut hasher);
        b"|".hash(&mut hasher);
        hash_sorted(&self.buckets.human, &mut hasher);
        b"|".hash(&mut hasher);
        hash_sorted(&self.buckets.done, &mut hasher);
        b"|".hash(&mut hasher);

        let mut process_ids: Vec<&String> =
            self.active_processes.iter().map(|p| &p.run_short_id).collect();
        process_ids.sort();
        for id in process_ids {
            id.hash(&mut hasher);
        }
        self.paused.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConsumeSnapshot {
        ConsumeSnapshot {
            instance_id: "i".into(),
            started_at: Utc::now(),
            paused: false,
            interval_seconds: 5,
            buckets: TaskBuckets {
                ready: vec!["f-aaaa".into(), "f-bbbb".into()],
                ..Default::default()
            },
            active_processes: Vec::new(),
            agent_health: Vec::new(),
            agent_concurrency_limits: Vec::new(),
            epics: Vec::new(),
        }
    }

    #[test]
    fn hash_stable_under_reordering() {
        let mut a = base();
        let mut b = base();
        b.buckets.ready.reverse();
        assert_eq!(a.board_hash(), b.board_hash());
        a.buckets.ready.push("f-cccc".into());
        assert_ne!(a.board_hash(), b.board_hash());
    }

    #[test]
    fn hash_sensitive_to_paused_flag() {
        let a = base();
        let mut b = base();
        b.paused = true;
        assert_ne!(a.board_hash(), b.board_hash());
    }
}
