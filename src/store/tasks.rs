//! Task repository: typed CRUD over the `tasks` table (spec.md §3, §4.1).
//!
//! Mirrors `factory/db.rs`'s issue-repository style: plain structs parsed
//! out of `rusqlite::Row`, JSON columns for set/list fields, and one
//! `with_conn` call per operation.

use super::{decode_json_set, decode_json_vec, encode_json_set};
use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use fuel_common::{Complexity, EntityPrefix, Task, TaskStatus, TaskType};
use rusqlite::{params, OptionalExtension, Row};

use super::Store;

fn parse_task_type(raw: &str) -> TaskType {
    match raw {
        "bug" => TaskType::Bug,
        "feature" => TaskType::Feature,
        "chore" => TaskType::Chore,
        "epic" => TaskType::Epic,
        "merge" => TaskType::Merge,
        "reality" => TaskType::Reality,
        "review" => TaskType::Review,
        _ => TaskType::Task,
    }
}

pub fn task_type_str(t: TaskType) -> &'static str {
    match t {
        TaskType::Task => "task",
        TaskType::Bug => "bug",
        TaskType::Feature => "feature",
        TaskType::Chore => "chore",
        TaskType::Epic => "epic",
        TaskType::Merge => "merge",
        TaskType::Reality => "reality",
        TaskType::Review => "review",
    }
}

fn parse_status(raw: &str) -> TaskStatus {
    match raw {
        "in_progress" => TaskStatus::InProgress,
        "review" => TaskStatus::Review,
        "done" => TaskStatus::Done,
        "cancelled" => TaskStatus::Cancelled,
        "someday" => TaskStatus::Someday,
        "paused" => TaskStatus::Paused,
        _ => TaskStatus::Open,
    }
}

pub fn status_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Open => "open",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Review => "review",
        TaskStatus::Done => "done",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::Someday => "someday",
        TaskStatus::Paused => "paused",
    }
}

fn parse_complexity(raw: &str) -> Complexity {
    match raw {
        "trivial" => Complexity::Trivial,
        "simple" => Complexity::Simple,
        "complex" => Complexity::Complex,
        _ => Complexity::Moderate,
    }
}

pub fn complexity_str(c: Complexity) -> &'static str {
    match c {
        Complexity::Trivial => "trivial",
        Complexity::Simple => "simple",
        Complexity::Moderate => "moderate",
        Complexity::Complex => "complex",
    }
}

fn row_to_task(row: &Row) -> rusqlite::Result<TaskRaw> {
    Ok(TaskRaw {
        id: row.get("id")?,
        short_id: row.get("short_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        task_type: row.get("type")?,
        status: row.get("status")?,
        priority: row.get("priority")?,
        complexity: row.get("complexity")?,
        labels: row.get("labels")?,
        blocked_by: row.get("blocked_by")?,
        epic_id: row.get("epic_id")?,
        commit_hash: row.get("commit_hash")?,
        reason: row.get("reason")?,
        consumed: row.get("consumed")?,
        consumed_at: row.get("consumed_at")?,
        consume_pid: row.get("consume_pid")?,
        last_review_issues: row.get("last_review_issues")?,
        selfguided_iteration: row.get("selfguided_iteration")?,
        selfguided_stuck_count: row.get("selfguided_stuck_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Intermediate shape: everything rusqlite can give us directly, before
/// the fallible JSON-column decode.
struct TaskRaw {
    id: i64,
    short_id: String,
    title: String,
    description: String,
    task_type: String,
    status: String,
    priority: i64,
    complexity: String,
    labels: String,
    blocked_by: String,
    epic_id: Option<i64>,
    commit_hash: Option<String>,
    reason: Option<String>,
    consumed: bool,
    consumed_at: Option<DateTime<Utc>>,
    consume_pid: Option<i64>,
    last_review_issues: String,
    selfguided_iteration: i64,
    selfguided_stuck_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRaw {
    fn into_task(self) -> Result<Task, StoreError> {
        Ok(Task {
            id: self.id,
            short_id: self.short_id,
            title: self.title,
            description: self.description,
            task_type: parse_task_type(&self.task_type),
            status: parse_status(&self.status),
            priority: self.priority as u8,
            complexity: parse_complexity(&self.complexity),
            labels: decode_json_set(&self.labels)?,
            blocked_by: decode_json_set(&self.blocked_by)?,
            epic_id: self.epic_id,
            commit_hash: self.commit_hash,
            reason: self.reason,
            consumed: self.consumed,
            consumed_at: self.consumed_at,
            consume_pid: self.consume_pid.map(|p| p as u32),
            last_review_issues: decode_json_vec(&self.last_review_issues)?,
            selfguided_iteration: self.selfguided_iteration as u32,
            selfguided_stuck_count: self.selfguided_stuck_count as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Fields accepted on creation; everything else takes a store-assigned
/// default (spec.md §4.1 `create`).
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: u8,
    pub complexity: Complexity,
    pub labels: Vec<String>,
    pub blocked_by: Vec<String>,
    pub epic_id: Option<i64>,
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Task
    }
}
impl Default for Complexity {
    fn default() -> Self {
        Complexity::Moderate
    }
}

impl Store {
    pub fn create_task(&self, new: NewTask) -> Result<Task, StoreError> {
        let short_id = self.allocate_short_id("tasks", EntityPrefix::Task)?;
        let labels = encode_json_set(&new.labels);
        let blocked_by = encode_json_set(&new.blocked_by);
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (short_id, title, description, type, priority, complexity, labels, blocked_by, epic_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    short_id,
                    new.title,
                    new.description,
                    task_type_str(new.task_type),
                    new.priority as i64,
                    complexity_str(new.complexity),
                    labels,
                    blocked_by,
                    new.epic_id,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.find_task_by_id(id)?.ok_or_else(|| StoreError::NotFound(format!("task {id}")))
    }

    pub fn find_task_by_id(&self, id: i64) -> Result<Option<Task>, StoreError> {
        let raw = self.with_conn(|conn| {
            conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
                .optional()
        })?;
        raw.map(TaskRaw::into_task).transpose()
    }

    pub fn find_task_by_short_id(&self, short_id: &str) -> Result<Option<Task>, StoreError> {
        let raw = self.with_conn(|conn| {
            conn.query_row("SELECT * FROM tasks WHERE short_id = ?1", params![short_id], row_to_task)
                .optional()
        })?;
        raw.map(TaskRaw::into_task).transpose()
    }

    /// Candidates whose short id starts with `prefix`, used by the
    /// service-layer `find` for unique-prefix matching (spec.md §4.1).
    pub fn find_tasks_by_short_id_prefix(&self, prefix: &str) -> Result<Vec<Task>, StoreError> {
        let like = format!("{prefix}%");
        let raws = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM tasks WHERE short_id LIKE ?1 ORDER BY short_id")?;
            let rows = stmt.query_map(params![like], row_to_task)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        raws.into_iter().map(TaskRaw::into_task).collect()
    }

    /// All tasks, sorted by short_id (spec.md §4.1 "sort persisted rows by
    /// short_id on write to minimize merge diffs" — reads follow suit so
    /// the resolver and snapshot builder see a stable order).
    pub fn all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let raws = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY short_id")?;
            let rows = stmt.query_map([], row_to_task)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        raws.into_iter().map(TaskRaw::into_task).collect()
    }

    pub fn tasks_for_epic(&self, epic_id: i64) -> Result<Vec<Task>, StoreError> {
        let raws = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM tasks WHERE epic_id = ?1 ORDER BY short_id")?;
            let rows = stmt.query_map(params![epic_id], row_to_task)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        raws.into_iter().map(TaskRaw::into_task).collect()
    }

    pub fn set_task_status(&self, id: i64, status: TaskStatus) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?2",
                params![status_str(status), id],
            )
        })?;
        Ok(())
    }

    pub fn set_task_consumed(&self, id: i64, consumed: bool, pid: Option<u32>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET consumed = ?1, consume_pid = ?2, consumed_at = CASE WHEN ?1 = 1 THEN strftime('%Y-%m-%dT%H:%M:%fZ','now') ELSE NULL END
                 WHERE id = ?3",
                params![consumed, pid.map(|p| p as i64), id],
            )
        })?;
        Ok(())
    }

    pub fn set_task_blocked_by(&self, id: i64, blocked_by: &std::collections::BTreeSet<String>) -> Result<(), StoreError> {
        let encoded = encode_json_set(blocked_by);
        self.with_conn(|conn| {
            conn.execute("UPDATE tasks SET blocked_by = ?1 WHERE id = ?2", params![encoded, id])
        })?;
        Ok(())
    }

    pub fn add_task_label(&self, id: i64, label: &str) -> Result<(), StoreError> {
        let mut task = self
            .find_task_by_id(id)?
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        task.labels.insert(label.to_string());
        let encoded = encode_json_set(&task.labels);
        self.with_conn(|conn| conn.execute("UPDATE tasks SET labels = ?1 WHERE id = ?2", params![encoded, id]))?;
        Ok(())
    }

    pub fn set_task_last_review_issues(&self, id: i64, issues: &[String]) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(issues).expect("vec<string> always serializes");
        self.with_conn(|conn| {
            conn.execute("UPDATE tasks SET last_review_issues = ?1 WHERE id = ?2", params![encoded, id])
        })?;
        Ok(())
    }

    pub fn set_task_done(&self, id: i64, reason: Option<&str>, commit_hash: Option<&str>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET status = 'done', reason = ?1, commit_hash = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?3",
                params![reason, commit_hash, id],
            )
        })?;
        Ok(())
    }

    pub fn increment_selfguided_iteration(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET selfguided_iteration = selfguided_iteration + 1, selfguided_stuck_count = 0 WHERE id = ?1",
                params![id],
            )
        })?;
        Ok(())
    }

    pub fn increment_selfguided_stuck_count(&self, id: i64) -> Result<u32, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET selfguided_stuck_count = selfguided_stuck_count + 1 WHERE id = ?1",
                params![id],
            )?;
            conn.query_row(
                "SELECT selfguided_stuck_count FROM tasks WHERE id = ?1",
                params![id],
                |row| row.get::<_, i64>(0),
            )
        })
        .map(|v| v as u32)
    }

    pub fn delete_task(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| conn.execute("DELETE FROM tasks WHERE id = ?1", params![id]))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_find_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let task = store
            .create_task(NewTask {
                title: "do the thing".into(),
                labels: vec!["needs-human".into()],
                ..Default::default()
            })
            .unwrap();
        assert!(task.short_id.starts_with("f-"));
        let found = store.find_task_by_short_id(&task.short_id).unwrap().unwrap();
        assert_eq!(found.title, "do the thing");
        assert!(found.has_label("needs-human"));
        assert_eq!(found.status, TaskStatus::Open);
    }

    #[test]
    fn prefix_lookup_finds_unique_and_ambiguous() {
        let store = Store::open_in_memory().unwrap();
        let t1 = store.create_task(NewTask { title: "a".into(), ..Default::default() }).unwrap();
        let prefix = &t1.short_id[..3];
        let matches = store.find_tasks_by_short_id_prefix(prefix).unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn set_status_and_consumed_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let task = store.create_task(NewTask { title: "a".into(), ..Default::default() }).unwrap();
        store.set_task_status(task.id, TaskStatus::InProgress).unwrap();
        store.set_task_consumed(task.id, true, Some(123)).unwrap();
        let updated = store.find_task_by_id(task.id).unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert!(updated.consumed);
        assert_eq!(updated.consume_pid, Some(123));
    }

    #[test]
    fn done_clears_to_terminal_state() {
        let store = Store::open_in_memory().unwrap();
        let task = store.create_task(NewTask { title: "a".into(), ..Default::default() }).unwrap();
        store.set_task_done(task.id, Some("looked fine"), Some("abc123")).unwrap();
        let updated = store.find_task_by_id(task.id).unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Done);
        assert_eq!(updated.reason.as_deref(), Some("looked fine"));
        assert_eq!(updated.commit_hash.as_deref(), Some("abc123"));
    }

    #[test]
    fn selfguided_stuck_count_increments_and_resets() {
        let store = Store::open_in_memory().unwrap();
        let task = store.create_task(NewTask { title: "a".into(), ..Default::default() }).unwrap();
        assert_eq!(store.increment_selfguided_stuck_count(task.id).unwrap(), 1);
        assert_eq!(store.increment_selfguided_stuck_count(task.id).unwrap(), 2);
        store.increment_selfguided_iteration(task.id).unwrap();
        let updated = store.find_task_by_id(task.id).unwrap().unwrap();
        assert_eq!(updated.selfguided_stuck_count, 0);
        assert_eq!(updated.selfguided_iteration, 1);
    }
}
