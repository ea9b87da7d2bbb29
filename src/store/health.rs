//! Agent health repository: durable mirror of the in-memory
//! [`crate::health::HealthTracker`] (spec.md §3 "Lifecycle/ownership":
//! "Health rows are owned by the Health Tracker").
//!
//! The tracker is the hot path (lock-free reads via `dashmap`); this
//! repository exists so health survives a daemon restart, matching
//! `factory/db.rs`'s upsert-on-write pattern.

use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use fuel_common::AgentHealth;
use rusqlite::{params, Row};

use super::Store;

fn row_to_health(row: &Row) -> rusqlite::Result<AgentHealth> {
    Ok(AgentHealth {
        agent: row.get("agent")?,
        last_success_at: row.get("last_success_at")?,
        last_failure_at: row.get("last_failure_at")?,
        consecutive_failures: row.get::<_, i64>("consecutive_failures")? as u32,
        backoff_until: row.get("backoff_until")?,
        total_runs: row.get::<_, i64>("total_runs")? as u64,
        total_successes: row.get::<_, i64>("total_successes")? as u64,
    })
}

impl Store {
    pub fn all_agent_health(&self) -> Result<Vec<AgentHealth>, StoreError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM agent_health ORDER BY agent")?;
            let rows = stmt.query_map([], row_to_health)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(rows)
    }

    pub fn upsert_agent_health(&self, health: &AgentHealth) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agent_health (agent, last_success_at, last_failure_at, consecutive_failures, backoff_until, total_runs, total_successes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(agent) DO UPDATE SET
                    last_success_at = excluded.last_success_at,
                    last_failure_at = excluded.last_failure_at,
                    consecutive_failures = excluded.consecutive_failures,
                    backoff_until = excluded.backoff_until,
                    total_runs = excluded.total_runs,
                    total_successes = excluded.total_successes",
                params![
                    health.agent,
                    health.last_success_at,
                    health.last_failure_at,
                    health.consecutive_failures as i64,
                    health.backoff_until,
                    health.total_runs as i64,
                    health.total_successes as i64,
                ],
            )
        })?;
        Ok(())
    }

    pub fn reset_agent_health(&self, agent: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE agent_health SET consecutive_failures = 0, backoff_until = NULL WHERE agent = ?1",
                params![agent],
            )
        })?;
        Ok(())
    }

    #[allow(dead_code)]
    pub(crate) fn touch_health_row(&self, agent: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let _ = now;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO agent_health (agent) VALUES (?1)",
                params![agent],
            )
        })?;
        Ok(())
    }
}
