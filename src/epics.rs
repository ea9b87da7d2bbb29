//! Epic Service (spec.md §4.1 "Epic status is computed on read", §3 Epic):
//! CRUD plus auto-created plan files and computed status.

use crate::context::Context;
use crate::errors::UserError;
use crate::store::epics::NewEpic;
use crate::store::tasks::NewTask;
use crate::store::Store;
use crate::util::{atomic_write, slugify};
use fuel_common::{Epic, EpicStatus, TaskType};
use std::sync::Arc;

pub struct EpicService {
    store: Arc<Store>,
    ctx: Arc<Context>,
}

impl EpicService {
    pub fn new(store: Arc<Store>, ctx: Arc<Context>) -> Self {
        Self { store, ctx }
    }

    /// Creates an epic and auto-creates its plan file at
    /// `plans/{slug(title)}-{short_id}.md` (spec.md §4.1).
    pub fn create(&self, title: &str, description: &str, self_guided: bool) -> Result<Epic, UserError> {
        let placeholder = self
            .store
            .create_epic(NewEpic {
                title: title.to_string(),
                description: description.to_string(),
                self_guided,
                plan_filename: String::new(),
            })
            .map_err(|e| UserError::BadRequest(e.to_string()))?;

        let slug = slugify(title, 40);
        let plan_filename = format!("plans/{slug}-{}.md", placeholder.short_id);
        self.store
            .set_epic_plan_filename(placeholder.id, &plan_filename)
            .map_err(|e| UserError::BadRequest(e.to_string()))?;

        let plan_path = self.ctx.fuel_dir.join(&plan_filename);
        let initial = format!(
            "# {title}\n\n{description}\n\n## Progress Log\n",
        );
        atomic_write(&plan_path, &initial).map_err(|e| UserError::BadRequest(e.to_string()))?;

        self.find(&placeholder.short_id)
    }

    pub fn all(&self) -> Result<Vec<Epic>, UserError> {
        self.store.all_epics().map_err(|e| UserError::BadRequest(e.to_string()))
    }

    pub fn find(&self, query: &str) -> Result<Epic, UserError> {
        if let Ok(id) = query.parse::<i64>() {
            if let Some(epic) = self.store.find_epic_by_id(id).map_err(|e| UserError::BadRequest(e.to_string()))? {
                return Ok(epic);
            }
        }
        if let Some(epic) = self
            .store
            .find_epic_by_short_id(query)
            .map_err(|e| UserError::BadRequest(e.to_string()))?
        {
            return Ok(epic);
        }
        let prefix = query.strip_prefix("e-").unwrap_or(query);
        let candidates = self
            .store
            .find_epics_by_short_id_prefix(&format!("e-{prefix}"))
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        match candidates.len() {
            0 => Err(UserError::NotFound { query: query.to_string() }),
            1 => Ok(candidates.into_iter().next().unwrap()),
            _ => Err(UserError::Ambiguous {
                query: query.to_string(),
                candidates: candidates.into_iter().map(|e| e.short_id).collect(),
            }),
        }
    }

    /// Computed status (spec.md §3): read-time derivation from the
    /// epic's own timestamp fields plus a joined count of its tasks.
    pub fn status(&self, epic: &Epic) -> Result<EpicStatus, UserError> {
        let counts = self
            .store
            .task_status_counts(epic.id)
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        Ok(epic.computed_status(counts))
    }

    pub fn pause(&self, query: &str) -> Result<(), UserError> {
        let epic = self.find(query)?;
        self.store.set_epic_paused(epic.id, true).map_err(|e| UserError::BadRequest(e.to_string()))
    }

    pub fn resume(&self, query: &str) -> Result<(), UserError> {
        let epic = self.find(query)?;
        self.store.set_epic_paused(epic.id, false).map_err(|e| UserError::BadRequest(e.to_string()))
    }

    /// Approval enqueues the `MergeEpic` task that merges the epic's
    /// mirror back (spec.md §4.9 "On epic approval, a MergeEpic task is
    /// enqueued"). Epics never given a mirror still get a merge task; the
    /// Mirror Manager/Spawner simply run it against the project root.
    pub fn approve(&self, query: &str, approved_by: &str) -> Result<(), UserError> {
        let epic = self.find(query)?;
        self.store
            .set_epic_approved(epic.id, approved_by)
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        self.store
            .create_task(NewTask {
                title: format!("Merge epic {}", epic.title),
                task_type: TaskType::Merge,
                epic_id: Some(epic.id),
                ..Default::default()
            })
            .map_err(|e| UserError::BadRequest(e.to_string()))?;
        Ok(())
    }

    pub fn request_changes(&self, query: &str) -> Result<(), UserError> {
        let epic = self.find(query)?;
        self.store
            .set_epic_changes_requested(epic.id)
            .map_err(|e| UserError::BadRequest(e.to_string()))
    }

    /// Appends a line to the plan's `## Progress Log` section
    /// (spec.md §6 "machine-writable append-target").
    pub fn append_progress_log(&self, epic: &Epic, line: &str) -> Result<(), UserError> {
        let plan_path = self.ctx.fuel_dir.join(&epic.plan_filename);
        let existing = std::fs::read_to_string(&plan_path).unwrap_or_default();
        let updated = if existing.contains("## Progress Log") {
            format!("{existing}\n- {line}")
        } else {
            format!("{existing}\n## Progress Log\n- {line}")
        };
        atomic_write(&plan_path, &updated).map_err(|e| UserError::BadRequest(e.to_string()))
    }
}
