//! Embedded relational store (spec.md §2 "Store", §3 storage notes):
//! ACID, single-writer, accessed via typed repositories.
//!
//! Grounded in `factory/db.rs`'s `FactoryDb` pattern — one `Connection`,
//! `execute_batch` migrations, typed row structs that parse JSON columns.
//! Mutating access goes through a single `Mutex<Connection>` (the "single
//! writer" of spec.md §5); reads take the same lock since `rusqlite`
//! connections aren't `Sync`, but writes never hold it across an `.await`.

pub mod epics;
pub mod health;
pub mod reviews;
pub mod runs;
pub mod tasks;

use crate::errors::StoreError;
use fuel_common::EntityPrefix;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::thread::sleep;
use std::time::Duration;
use uuid::Uuid;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(MIGRATIONS)?;
        Ok(())
    }

    /// Runs `f` with the single writer connection held. `StoreError`'s
    /// "retried once, then fatal" policy (spec.md §7) lives here: a
    /// `SQLITE_BUSY`/`SQLITE_LOCKED` failure is retried once after a short
    /// fixed delay before propagating.
    fn with_conn<T>(&self, f: impl Fn(&Connection) -> rusqlite::Result<T>) -> Result<T, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        match f(&conn) {
            Ok(value) => Ok(value),
            Err(first_err) if is_retryable(&first_err) => {
                drop(conn);
                sleep(Duration::from_millis(50));
                let conn = self.conn.lock().expect("store mutex poisoned");
                Ok(f(&conn)?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Allocates a unique short id for `prefix` within `table`, widening
    /// the adaptive length schedule on a collision at insert time
    /// (spec.md §9 "ID generation").
    pub(crate) fn allocate_short_id(
        &self,
        table: &'static str,
        prefix: EntityPrefix,
    ) -> Result<String, StoreError> {
        let mut len = 4usize;
        for _ in 0..8 {
            let body = fuel_common::ids::encode(random_bits(), len);
            let candidate = fuel_common::ids::format_public_id(prefix, &body);
            let exists: bool = self.with_conn(|conn| {
                conn.query_row(
                    &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE short_id = ?1)"),
                    rusqlite::params![candidate],
                    |row| row.get(0),
                )
            })?;
            if !exists {
                return Ok(candidate);
            }
            len = fuel_common::ids::next_length(len);
        }
        Err(StoreError::NotFound(format!(
            "could not allocate a unique short id for table {table} after 8 attempts"
        )))
    }
}

fn random_bits() -> u64 {
    let uuid = Uuid::new_v4();
    let bytes = uuid.as_bytes();
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

fn is_retryable(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Serializes a string set to a JSON array column, matching the
/// `labels TEXT NOT NULL DEFAULT '[]'` convention in `factory/db.rs`.
pub(crate) fn encode_json_set(values: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let values: Vec<String> = values.into_iter().map(|v| v.as_ref().to_string()).collect();
    serde_json::to_string(&values).expect("string vec always serializes")
}

pub(crate) fn decode_json_set(raw: &str) -> Result<std::collections::BTreeSet<String>, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Column {
        column: "json_set".to_string(),
        source,
    })
}

pub(crate) fn decode_json_vec(raw: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Column {
        column: "json_vec".to_string(),
        source,
    })
}

const MIGRATIONS: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    short_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    type TEXT NOT NULL DEFAULT 'task',
    status TEXT NOT NULL DEFAULT 'open',
    priority INTEGER NOT NULL DEFAULT 2,
    complexity TEXT NOT NULL DEFAULT 'moderate',
    labels TEXT NOT NULL DEFAULT '[]',
    blocked_by TEXT NOT NULL DEFAULT '[]',
    epic_id INTEGER REFERENCES epics(id) ON DELETE SET NULL,
    commit_hash TEXT,
    reason TEXT,
    consumed INTEGER NOT NULL DEFAULT 0,
    consumed_at TEXT,
    consume_pid INTEGER,
    last_review_issues TEXT NOT NULL DEFAULT '[]',
    selfguided_iteration INTEGER NOT NULL DEFAULT 0,
    selfguided_stuck_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);

CREATE TABLE IF NOT EXISTS epics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    short_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    self_guided INTEGER NOT NULL DEFAULT 0,
    plan_filename TEXT NOT NULL,
    paused_at TEXT,
    reviewed_at TEXT,
    approved_at TEXT,
    approved_by TEXT,
    changes_requested_at TEXT,
    mirror_path TEXT,
    mirror_status TEXT NOT NULL DEFAULT 'none',
    mirror_branch TEXT,
    mirror_base_commit TEXT,
    mirror_created_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);

CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    short_id TEXT NOT NULL UNIQUE,
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    agent TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    exit_code INTEGER,
    started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    ended_at TEXT,
    duration_seconds REAL,
    session_id TEXT,
    error_type TEXT,
    model TEXT,
    output_path TEXT NOT NULL,
    cost_usd REAL,
    pid INTEGER
);

CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    short_id TEXT NOT NULL UNIQUE,
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    agent TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    issues TEXT NOT NULL DEFAULT '[]',
    started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS agent_health (
    agent TEXT PRIMARY KEY,
    last_success_at TEXT,
    last_failure_at TEXT,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    backoff_until TEXT,
    total_runs INTEGER NOT NULL DEFAULT 0,
    total_successes INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_epic ON tasks(epic_id);
CREATE INDEX IF NOT EXISTS idx_runs_task ON runs(task_id);
CREATE INDEX IF NOT EXISTS idx_reviews_task ON reviews(task_id);
";
