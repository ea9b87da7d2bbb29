//! Review repository: one review attempt per task per row (spec.md §3,
//! "Review Service").

use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use fuel_common::{EntityPrefix, Review, ReviewStatus};
use rusqlite::{params, OptionalExtension, Row};

use super::{decode_json_vec, Store};

fn parse_review_status(raw: &str) -> ReviewStatus {
    match raw {
        "completed" => ReviewStatus::Completed,
        _ => ReviewStatus::Pending,
    }
}

pub fn review_status_str(s: ReviewStatus) -> &'static str {
    match s {
        ReviewStatus::Pending => "pending",
        ReviewStatus::Completed => "completed",
    }
}

struct ReviewRaw {
    id: i64,
    short_id: String,
    task_id: i64,
    run_id: i64,
    agent: String,
    status: String,
    issues: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

fn row_to_review(row: &Row) -> rusqlite::Result<ReviewRaw> {
    Ok(ReviewRaw {
        id: row.get("id")?,
        short_id: row.get("short_id")?,
        task_id: row.get("task_id")?,
        run_id: row.get("run_id")?,
        agent: row.get("agent")?,
        status: row.get("status")?,
        issues: row.get("issues")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

impl ReviewRaw {
    fn into_review(self) -> Result<Review, StoreError> {
        Ok(Review {
            id: self.id,
            short_id: self.short_id,
            task_id: self.task_id,
            run_id: self.run_id,
            agent: self.agent,
            status: parse_review_status(&self.status),
            issues: decode_json_vec(&self.issues)?,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub task_id: i64,
    pub run_id: i64,
    pub agent: String,
}

impl Store {
    pub fn create_review(&self, new: NewReview) -> Result<Review, StoreError> {
        let short_id = self.allocate_short_id("reviews", EntityPrefix::Review)?;
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reviews (short_id, task_id, run_id, agent) VALUES (?1, ?2, ?3, ?4)",
                params![short_id, new.task_id, new.run_id, new.agent],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.find_review_by_id(id)?.ok_or_else(|| StoreError::NotFound(format!("review {id}")))
    }

    pub fn find_review_by_id(&self, id: i64) -> Result<Option<Review>, StoreError> {
        let raw = self.with_conn(|conn| {
            conn.query_row("SELECT * FROM reviews WHERE id = ?1", params![id], row_to_review)
                .optional()
        })?;
        raw.map(ReviewRaw::into_review).transpose()
    }

    pub fn reviews_for_task(&self, task_id: i64) -> Result<Vec<Review>, StoreError> {
        let raws = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM reviews WHERE task_id = ?1 ORDER BY started_at")?;
            let rows = stmt.query_map(params![task_id], row_to_review)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        raws.into_iter().map(ReviewRaw::into_review).collect()
    }

    /// Looks up the review a given reviewer run belongs to, letting the
    /// Completion Handler tell a review run apart from an ordinary work run
    /// sharing the same task id.
    pub fn find_review_by_run_id(&self, run_id: i64) -> Result<Option<Review>, StoreError> {
        let raw = self.with_conn(|conn| {
            conn.query_row("SELECT * FROM reviews WHERE run_id = ?1", params![run_id], row_to_review)
                .optional()
        })?;
        raw.map(ReviewRaw::into_review).transpose()
    }

    pub fn complete_review(&self, id: i64, issues: &[String]) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(issues).expect("vec<string> always serializes");
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE reviews SET status = 'completed', issues = ?1, completed_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?2",
                params![encoded, id],
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::runs::NewRun;
    use crate::store::tasks::NewTask;

    #[test]
    fn create_and_complete_review() {
        let store = Store::open_in_memory().unwrap();
        let task = store.create_task(NewTask { title: "t".into(), ..Default::default() }).unwrap();
        let run = store
            .create_run(NewRun { task_id: task.id, agent: "reviewer".into(), model: None, output_path: "p".into(), pid: Some(1) })
            .unwrap();
        let review = store
            .create_review(NewReview { task_id: task.id, run_id: run.id, agent: "reviewer".into() })
            .unwrap();
        assert!(!review.passed());
        store.complete_review(review.id, &["tests_failing".to_string()]).unwrap();
        let updated = store.find_review_by_id(review.id).unwrap().unwrap();
        assert!(!updated.passed());
        assert_eq!(updated.issues, vec!["tests_failing".to_string()]);
    }

    #[test]
    fn empty_issues_on_completion_means_pass() {
        let store = Store::open_in_memory().unwrap();
        let task = store.create_task(NewTask { title: "t".into(), ..Default::default() }).unwrap();
        let run = store
            .create_run(NewRun { task_id: task.id, agent: "reviewer".into(), model: None, output_path: "p".into(), pid: Some(1) })
            .unwrap();
        let review = store
            .create_review(NewReview { task_id: task.id, run_id: run.id, agent: "reviewer".into() })
            .unwrap();
        store.complete_review(review.id, &[]).unwrap();
        let updated = store.find_review_by_id(review.id).unwrap().unwrap();
        assert!(updated.passed());
    }
}
