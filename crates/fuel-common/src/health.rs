//! Per-agent health accounting and backoff (spec.md §3, §4.5).

use crate::run::FailureClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub backoff_until: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub total_successes: u64,
}

impl AgentHealth {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            backoff_until: None,
            total_runs: 0,
            total_successes: 0,
        }
    }

    /// `healthy` at 0 failures, `warning` at 1, `degraded` at 2-4, else
    /// `unhealthy` (spec.md §3).
    pub fn status(&self) -> HealthStatus {
        match self.consecutive_failures {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Warning,
            2..=4 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.backoff_until {
            None => true,
            Some(until) => until <= now,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            return 1.0;
        }
        self.total_successes as f64 / self.total_runs as f64
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_success_at = Some(now);
        self.consecutive_failures = 0;
        self.backoff_until = None;
        self.total_runs += 1;
        self.total_successes += 1;
    }

    /// Returns the previous `status()` so callers can detect a threshold
    /// crossing and broadcast `HealthChange` (spec.md §4.5).
    pub fn record_failure(&mut self, now: DateTime<Utc>, class: FailureClass) -> HealthStatus {
        let previous = self.status();
        self.last_failure_at = Some(now);
        self.consecutive_failures += 1;
        self.total_runs += 1;
        self.backoff_until = backoff_until(now, self.consecutive_failures, class);
        previous
    }
}

/// `backoff = min(cap, base * 2^(consecutive_failures - 1))`, per class
/// (spec.md §4.5). Permission failures are not retryable and carry no
/// backoff at all — the caller is expected to surface `needs-human`
/// instead of relying on this timestamp.
fn backoff_until(
    now: DateTime<Utc>,
    consecutive_failures: u32,
    class: FailureClass,
) -> Option<DateTime<Utc>> {
    if !class.is_retryable() {
        return None;
    }
    let (base, cap) = match class {
        FailureClass::Network | FailureClass::Timeout => (5i64, 300i64),
        FailureClass::Crash => (15i64, 600i64),
        FailureClass::Permission => unreachable!("checked above"),
    };
    let exponent = consecutive_failures.saturating_sub(1).min(20);
    let scaled = base.saturating_mul(1i64 << exponent.min(30));
    let seconds = scaled.min(cap);
    Some(now + chrono::Duration::seconds(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_thresholds() {
        let mut h = AgentHealth::new("claude");
        assert_eq!(h.status(), HealthStatus::Healthy);
        h.consecutive_failures = 1;
        assert_eq!(h.status(), HealthStatus::Warning);
        h.consecutive_failures = 3;
        assert_eq!(h.status(), HealthStatus::Degraded);
        h.consecutive_failures = 7;
        assert_eq!(h.status(), HealthStatus::Unhealthy);
    }

    #[test]
    fn success_resets_failure_state() {
        let mut h = AgentHealth::new("claude");
        let now = Utc::now();
        h.record_failure(now, FailureClass::Network);
        assert_eq!(h.consecutive_failures, 1);
        assert!(h.backoff_until.is_some());
        h.record_success(now);
        assert_eq!(h.consecutive_failures, 0);
        assert!(h.backoff_until.is_none());
        assert_eq!(h.total_runs, 2);
        assert_eq!(h.total_successes, 1);
    }

    #[test]
    fn backoff_monotonic_until_cap() {
        let now = Utc::now();
        let mut previous = 0i64;
        for failures in 1..=10u32 {
            let until = backoff_until(now, failures, FailureClass::Network).unwrap();
            let secs = (until - now).num_seconds();
            assert!(secs >= previous);
            assert!(secs <= 300);
            previous = secs;
        }
    }

    #[test]
    fn permission_never_backs_off() {
        let now = Utc::now();
        assert!(backoff_until(now, 1, FailureClass::Permission).is_none());
        assert!(backoff_until(now, 9, FailureClass::Permission).is_none());
    }

    #[test]
    fn available_iff_backoff_elapsed() {
        let now = Utc::now();
        let mut h = AgentHealth::new("claude");
        assert!(h.is_available(now));
        h.record_failure(now, FailureClass::Crash);
        assert!(!h.is_available(now));
        assert!(h.is_available(now + chrono::Duration::seconds(601)));
    }
}
