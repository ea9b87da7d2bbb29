//! The `Review` entity — one review attempt of a task (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Completed,
}

/// An issue code, as emitted by a reviewer agent's structured JSON
/// (`{"passed":bool,"issues":[code],"followUpTaskIds":[id]}`).
pub type IssueCode = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub short_id: String,
    pub task_id: i64,
    pub run_id: i64,
    pub agent: String,
    pub status: ReviewStatus,
    pub issues: Vec<IssueCode>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Review {
    /// Empty issue list means the review passed.
    pub fn passed(&self) -> bool {
        self.status == ReviewStatus::Completed && self.issues.is_empty()
    }
}

/// The structured payload a reviewer agent is expected to produce.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReviewOutcome {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<IssueCode>,
    #[serde(default, rename = "followUpTaskIds")]
    pub follow_up_task_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passed_requires_completed_and_empty_issues() {
        let mut review = Review {
            id: 1,
            short_id: "v-aaaa".into(),
            task_id: 1,
            run_id: 1,
            agent: "reviewer".into(),
            status: ReviewStatus::Pending,
            issues: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        };
        assert!(!review.passed());
        review.status = ReviewStatus::Completed;
        assert!(review.passed());
        review.issues.push("tests_failing".into());
        assert!(!review.passed());
    }

    #[test]
    fn outcome_parses_from_agent_json() {
        let raw = r#"{"passed":false,"issues":["tests_failing"],"followUpTaskIds":["f-ab12"]}"#;
        let outcome: ReviewOutcome = serde_json::from_str(raw).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.issues, vec!["tests_failing".to_string()]);
        assert_eq!(outcome.follow_up_task_ids, vec!["f-ab12".to_string()]);
    }

    #[test]
    fn outcome_defaults_missing_arrays() {
        let raw = r#"{"passed":true}"#;
        let outcome: ReviewOutcome = serde_json::from_str(raw).unwrap();
        assert!(outcome.issues.is_empty());
        assert!(outcome.follow_up_task_ids.is_empty());
    }
}
