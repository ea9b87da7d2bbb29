//! Run repository: one supervised process execution per row (spec.md §3,
//! "Run Service").

use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use fuel_common::{EntityPrefix, Run, RunStatus};
use rusqlite::{params, OptionalExtension, Row};

use super::Store;

fn parse_run_status(raw: &str) -> RunStatus {
    match raw {
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        _ => RunStatus::Running,
    }
}

pub fn run_status_str(s: RunStatus) -> &'static str {
    match s {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
    }
}

fn row_to_run(row: &Row) -> rusqlite::Result<RunRaw> {
    Ok(RunRaw {
        id: row.get("id")?,
        short_id: row.get("short_id")?,
        task_id: row.get("task_id")?,
        agent: row.get("agent")?,
        status: row.get("status")?,
        exit_code: row.get("exit_code")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        duration_seconds: row.get("duration_seconds")?,
        session_id: row.get("session_id")?,
        error_type: row.get("error_type")?,
        model: row.get("model")?,
        output_path: row.get("output_path")?,
        cost_usd: row.get("cost_usd")?,
        pid: row.get("pid")?,
    })
}

struct RunRaw {
    id: i64,
    short_id: String,
    task_id: i64,
    agent: String,
    status: String,
    exit_code: Option<i64>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<f64>,
    session_id: Option<String>,
    error_type: Option<String>,
    model: Option<String>,
    output_path: String,
    cost_usd: Option<f64>,
    pid: Option<i64>,
}

impl RunRaw {
    fn into_run(self) -> Run {
        Run {
            id: self.id,
            short_id: self.short_id,
            task_id: self.task_id,
            agent: self.agent,
            status: parse_run_status(&self.status),
            exit_code: self.exit_code.map(|v| v as i32),
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_seconds: self.duration_seconds,
            session_id: self.session_id,
            error_type: self.error_type,
            model: self.model,
            output_path: self.output_path,
            cost_usd: self.cost_usd,
            pid: self.pid.map(|v| v as u32),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub task_id: i64,
    pub agent: String,
    pub model: Option<String>,
    pub output_path: String,
    pub pid: Option<u32>,
}

impl Store {
    pub fn create_run(&self, new: NewRun) -> Result<Run, StoreError> {
        let short_id = self.allocate_short_id("runs", EntityPrefix::Run)?;
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO runs (short_id, task_id, agent, model, output_path, pid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![short_id, new.task_id, new.agent, new.model, new.output_path, new.pid],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.find_run_by_id(id)?.ok_or_else(|| StoreError::NotFound(format!("run {id}")))
    }

    pub fn find_run_by_id(&self, id: i64) -> Result<Option<Run>, StoreError> {
        let raw = self.with_conn(|conn| {
            conn.query_row("SELECT * FROM runs WHERE id = ?1", params![id], row_to_run).optional()
        })?;
        Ok(raw.map(RunRaw::into_run))
    }

    pub fn find_run_by_short_id(&self, short_id: &str) -> Result<Option<Run>, StoreError> {
        let raw = self.with_conn(|conn| {
            conn.query_row("SELECT * FROM runs WHERE short_id = ?1", params![short_id], row_to_run)
                .optional()
        })?;
        Ok(raw.map(RunRaw::into_run))
    }

    pub fn runs_for_task(&self, task_id: i64) -> Result<Vec<Run>, StoreError> {
        let raws = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM runs WHERE task_id = ?1 ORDER BY started_at")?;
            let rows = stmt.query_map(params![task_id], row_to_run)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(raws.into_iter().map(RunRaw::into_run).collect())
    }

    pub fn active_runs(&self) -> Result<Vec<Run>, StoreError> {
        let raws = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM runs WHERE status = 'running' ORDER BY started_at")?;
            let rows = stmt.query_map([], row_to_run)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(raws.into_iter().map(RunRaw::into_run).collect())
    }

    /// Sets the pid once the process has actually been launched (spec.md
    /// §4.4 step 5 — the row is created first, then the pid is known).
    pub fn set_run_pid(&self, id: i64, pid: u32) -> Result<(), StoreError> {
        self.with_conn(|conn| conn.execute("UPDATE runs SET pid = ?1 WHERE id = ?2", params![pid, id]))?;
        Ok(())
    }

    pub fn set_run_session_id(&self, id: i64, session_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE runs SET session_id = ?1 WHERE id = ?2 AND session_id IS NULL",
                params![session_id, id],
            )
        })?;
        Ok(())
    }

    pub fn accumulate_run_cost(&self, id: i64, delta: f64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE runs SET cost_usd = COALESCE(cost_usd, 0.0) + ?1 WHERE id = ?2",
                params![delta, id],
            )
        })?;
        Ok(())
    }

    /// Deletes a run row that never actually started (spec.md §8: "Agent
    /// at `maxConcurrent` ... does not start a Run row") — used when the
    /// supervisor rejects a spawn after the row was already allocated.
    pub fn delete_run(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| conn.execute("DELETE FROM runs WHERE id = ?1", params![id]))?;
        Ok(())
    }

    /// Finalizes a run row on reap (spec.md §4.4, §4.8).
    pub fn finalize_run(
        &self,
        id: i64,
        status: RunStatus,
        exit_code: i32,
        duration_seconds: f64,
        error_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE runs SET status = ?1, exit_code = ?2, duration_seconds = ?3, error_type = ?4,
                 ended_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?5",
                params![run_status_str(status), exit_code, duration_seconds, error_type, id],
            )
        })?;
        Ok(())
    }
}
