//! Epic repository: typed CRUD over the `epics` table (spec.md §3, §4.1).

use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use fuel_common::{Epic, EntityPrefix, MirrorStatus, TaskStatusCounts};
use rusqlite::{params, OptionalExtension, Row};

use super::Store;

fn parse_mirror_status(raw: &str) -> MirrorStatus {
    match raw {
        "pending" => MirrorStatus::Pending,
        "creating" => MirrorStatus::Creating,
        "ready" => MirrorStatus::Ready,
        "merging" => MirrorStatus::Merging,
        "merge_failed" => MirrorStatus::MergeFailed,
        "merged" => MirrorStatus::Merged,
        "cleaned" => MirrorStatus::Cleaned,
        _ => MirrorStatus::None,
    }
}

pub fn mirror_status_str(s: MirrorStatus) -> &'static str {
    match s {
        MirrorStatus::None => "none",
        MirrorStatus::Pending => "pending",
        MirrorStatus::Creating => "creating",
        MirrorStatus::Ready => "ready",
        MirrorStatus::Merging => "merging",
        MirrorStatus::MergeFailed => "merge_failed",
        MirrorStatus::Merged => "merged",
        MirrorStatus::Cleaned => "cleaned",
    }
}

struct EpicRaw {
    id: i64,
    short_id: String,
    title: String,
    description: String,
    self_guided: bool,
    plan_filename: String,
    paused_at: Option<DateTime<Utc>>,
    reviewed_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<String>,
    changes_requested_at: Option<DateTime<Utc>>,
    mirror_path: Option<String>,
    mirror_status: String,
    mirror_branch: Option<String>,
    mirror_base_commit: Option<String>,
    mirror_created_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EpicRaw {
    fn into_epic(self) -> Epic {
        Epic {
            id: self.id,
            short_id: self.short_id,
            title: self.title,
            description: self.description,
            self_guided: self.self_guided,
            plan_filename: self.plan_filename,
            paused_at: self.paused_at,
            reviewed_at: self.reviewed_at,
            approved_at: self.approved_at,
            approved_by: self.approved_by,
            changes_requested_at: self.changes_requested_at,
            mirror_path: self.mirror_path,
            mirror_status: parse_mirror_status(&self.mirror_status),
            mirror_branch: self.mirror_branch,
            mirror_base_commit: self.mirror_base_commit,
            mirror_created_at: self.mirror_created_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn row_to_epic(row: &Row) -> rusqlite::Result<EpicRaw> {
    Ok(EpicRaw {
        id: row.get("id")?,
        short_id: row.get("short_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        self_guided: row.get("self_guided")?,
        plan_filename: row.get("plan_filename")?,
        paused_at: row.get("paused_at")?,
        reviewed_at: row.get("reviewed_at")?,
        approved_at: row.get("approved_at")?,
        approved_by: row.get("approved_by")?,
        changes_requested_at: row.get("changes_requested_at")?,
        mirror_path: row.get("mirror_path")?,
        mirror_status: row.get("mirror_status")?,
        mirror_branch: row.get("mirror_branch")?,
        mirror_base_commit: row.get("mirror_base_commit")?,
        mirror_created_at: row.get("mirror_created_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct NewEpic {
    pub title: String,
    pub description: String,
    pub self_guided: bool,
    pub plan_filename: String,
}

impl Store {
    pub fn create_epic(&self, new: NewEpic) -> Result<Epic, StoreError> {
        let short_id = self.allocate_short_id("epics", EntityPrefix::Epic)?;
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO epics (short_id, title, description, self_guided, plan_filename)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![short_id, new.title, new.description, new.self_guided, new.plan_filename],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.find_epic_by_id(id)?.ok_or_else(|| StoreError::NotFound(format!("epic {id}")))
    }

    pub fn find_epic_by_id(&self, id: i64) -> Result<Option<Epic>, StoreError> {
        let raw = self.with_conn(|conn| {
            conn.query_row("SELECT * FROM epics WHERE id = ?1", params![id], row_to_epic)
                .optional()
        })?;
        Ok(raw.map(EpicRaw::into_epic))
    }

    pub fn find_epic_by_short_id(&self, short_id: &str) -> Result<Option<Epic>, StoreError> {
        let raw = self.with_conn(|conn| {
            conn.query_row("SELECT * FROM epics WHERE short_id = ?1", params![short_id], row_to_epic)
                .optional()
        })?;
        Ok(raw.map(EpicRaw::into_epic))
    }

    pub fn find_epics_by_short_id_prefix(&self, prefix: &str) -> Result<Vec<Epic>, StoreError> {
        let like = format!("{prefix}%");
        let raws = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM epics WHERE short_id LIKE ?1 ORDER BY short_id")?;
            let rows = stmt.query_map(params![like], row_to_epic)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(raws.into_iter().map(EpicRaw::into_epic).collect())
    }

    pub fn all_epics(&self) -> Result<Vec<Epic>, StoreError> {
        let raws = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM epics ORDER BY short_id")?;
            let rows = stmt.query_map([], row_to_epic)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(raws.into_iter().map(EpicRaw::into_epic).collect())
    }

    /// Joined read for computed-status purposes, avoiding N+1 (spec.md §9
    /// "Eloquent/relational accessors").
    pub fn task_status_counts(&self, epic_id: i64) -> Result<TaskStatusCounts, StoreError> {
        let tasks = self.tasks_for_epic(epic_id)?;
        let total = tasks.len();
        let done = tasks.iter().filter(|t| t.status == fuel_common::TaskStatus::Done).count();
        let open_or_in_progress = tasks
            .iter()
            .filter(|t| matches!(t.status, fuel_common::TaskStatus::Open | fuel_common::TaskStatus::InProgress))
            .count();
        Ok(TaskStatusCounts { total, open_or_in_progress, done })
    }

    pub fn set_epic_plan_filename(&self, id: i64, plan_filename: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("UPDATE epics SET plan_filename = ?1 WHERE id = ?2", params![plan_filename, id])
        })?;
        Ok(())
    }

    pub fn set_epic_paused(&self, id: i64, paused: bool) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE epics SET paused_at = CASE WHEN ?1 = 1 THEN strftime('%Y-%m-%dT%H:%M:%fZ','now') ELSE NULL END WHERE id = ?2",
                params![paused, id],
            )
        })?;
        Ok(())
    }

    pub fn set_epic_approved(&self, id: i64, approved_by: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE epics SET approved_at = strftime('%Y-%m-%dT%H:%M:%fZ','now'), approved_by = ?1 WHERE id = ?2",
                params![approved_by, id],
            )
        })?;
        Ok(())
    }

    pub fn set_epic_reviewed(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE epics SET reviewed_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
                params![id],
            )
        })?;
        Ok(())
    }

    pub fn set_epic_changes_requested(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE epics SET changes_requested_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
                params![id],
            )
        })?;
        Ok(())
    }

    pub fn set_epic_mirror_status(&self, id: i64, status: MirrorStatus) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE epics SET mirror_status = ?1 WHERE id = ?2",
                params![mirror_status_str(status), id],
            )
        })?;
        Ok(())
    }

    /// Only the Mirror Manager calls this (spec.md §3 ownership, §4.9).
    pub fn set_epic_mirror_created(
        &self,
        id: i64,
        path: &str,
        branch: &str,
        base_commit: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE epics SET mirror_path = ?1, mirror_branch = ?2, mirror_base_commit = ?3,
                 mirror_status = 'ready', mirror_created_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?4",
                params![path, branch, base_commit, id],
            )
        })?;
        Ok(())
    }

    pub fn clear_epic_mirror(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE epics SET mirror_path = NULL, mirror_branch = NULL WHERE id = ?1",
                params![id],
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tasks::NewTask;
    use fuel_common::TaskStatus as TS;

    #[test]
    fn create_and_find_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let epic = store
            .create_epic(NewEpic { title: "big thing".into(), plan_filename: "plans/x.md".into(), ..Default::default() })
            .unwrap();
        assert!(epic.short_id.starts_with("e-"));
        let found = store.find_epic_by_short_id(&epic.short_id).unwrap().unwrap();
        assert_eq!(found.title, "big thing");
        assert_eq!(found.mirror_status, MirrorStatus::None);
    }

    #[test]
    fn task_status_counts_reflects_linked_tasks() {
        let store = Store::open_in_memory().unwrap();
        let epic = store.create_epic(NewEpic { title: "e".into(), plan_filename: "p.md".into(), ..Default::default() }).unwrap();
        let t1 = store.create_task(NewTask { title: "a".into(), epic_id: Some(epic.id), ..Default::default() }).unwrap();
        store.create_task(NewTask { title: "b".into(), epic_id: Some(epic.id), ..Default::default() }).unwrap();
        store.set_task_status(t1.id, TS::Done).unwrap();
        let counts = store.task_status_counts(epic.id).unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.done, 1);
        assert_eq!(counts.open_or_in_progress, 1);
    }

    #[test]
    fn mirror_lifecycle_transitions() {
        let store = Store::open_in_memory().unwrap();
        let epic = store.create_epic(NewEpic { title: "e".into(), plan_filename: "p.md".into(), ..Default::default() }).unwrap();
        store.set_epic_mirror_status(epic.id, MirrorStatus::Pending).unwrap();
        store.set_epic_mirror_created(epic.id, "/tmp/x", "epic/e-aaaa", "deadbeef").unwrap();
        let updated = store.find_epic_by_id(epic.id).unwrap().unwrap();
        assert_eq!(updated.mirror_status, MirrorStatus::Ready);
        assert_eq!(updated.mirror_path.as_deref(), Some("/tmp/x"));
    }

    #[test]
    fn paused_wins_over_approved() {
        let store = Store::open_in_memory().unwrap();
        let epic = store.create_epic(NewEpic { title: "e".into(), plan_filename: "p.md".into(), ..Default::default() }).unwrap();
        store.set_epic_approved(epic.id, "alice").unwrap();
        store.set_epic_paused(epic.id, true).unwrap();
        let updated = store.find_epic_by_id(epic.id).unwrap().unwrap();
        let status = updated.computed_status(TaskStatusCounts { total: 0, open_or_in_progress: 0, done: 0 });
        assert_eq!(status, fuel_common::EpicStatus::Paused);
    }
}
