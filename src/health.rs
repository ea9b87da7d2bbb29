//! Agent Health Tracker (spec.md §2, §4.5): per-agent success/failure
//! counters, consecutive-failure streak, and backoff-until timestamp,
//! shared across the daemon loop and the spawner without a lock around
//! the whole map.

use chrono::Utc;
use dashmap::DashMap;
use fuel_common::{AgentHealth, FailureClass, HealthStatus};

/// Concurrent per-agent health map. `dashmap` lets the Spawner read
/// availability while the Completion Handler records an outcome on a
/// different agent without contending on a single mutex.
#[derive(Debug, Default)]
pub struct HealthTracker {
    agents: DashMap<String, AgentHealth>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self, agent: &str) -> bool {
        match self.agents.get(agent) {
            Some(health) => health.is_available(Utc::now()),
            None => true,
        }
    }

    pub fn snapshot(&self) -> Vec<AgentHealth> {
        self.agents.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn get(&self, agent: &str) -> Option<AgentHealth> {
        self.agents.get(agent).map(|entry| entry.value().clone())
    }

    /// Records a success; returns `true` if this crossed a status
    /// threshold (any prior failure streak is reset), so the caller can
    /// broadcast `HealthChange` (spec.md §4.5).
    pub fn record_success(&self, agent: &str) -> bool {
        let mut entry = self
            .agents
            .entry(agent.to_string())
            .or_insert_with(|| AgentHealth::new(agent));
        let previous = entry.status();
        entry.record_success(Utc::now());
        previous != HealthStatus::Healthy
    }

    /// Records a failure of the given class; returns `true` if the
    /// resulting status differs from the prior one.
    pub fn record_failure(&self, agent: &str, class: FailureClass) -> bool {
        let mut entry = self
            .agents
            .entry(agent.to_string())
            .or_insert_with(|| AgentHealth::new(agent));
        let previous = entry.record_failure(Utc::now(), class);
        previous != entry.status()
    }

    /// `HealthReset` IPC command (spec.md §4.10): clears the failure
    /// streak and backoff without touching lifetime totals.
    pub fn reset(&self, agent: &str) {
        if let Some(mut entry) = self.agents.get_mut(agent) {
            entry.consecutive_failures = 0;
            entry.backoff_until = None;
        }
    }
}
