//! Job states and progress.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::job_repo::JobRow;
use crate::error::JobError;

/// Status of a matching job.
///
/// `pending → processing → completed | failed`. The terminal states never
/// transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Completed)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Errors unless moving to `next` is a legal transition.
    pub fn ensure_transition(&self, next: JobStatus) -> Result<(), JobError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(JobError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::UnknownStatus(other.to_string())),
        }
    }
}

/// Percentage of processed items, rounded to the nearest integer.
///
/// A job with no items reports 0.
pub fn progress(processed_count: i64, item_count: i64) -> u8 {
    if item_count <= 0 {
        return 0;
    }
    let ratio = processed_count.clamp(0, item_count) as f64 / item_count as f64;
    (ratio * 100.0).round() as u8
}

/// Polling view of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub status: String,
    pub progress: u8,
    pub processed_count: i64,
    pub item_count: i64,
    pub matched_count: i64,
    pub matching_method: String,
    pub file_name: String,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
}

impl From<&JobRow> for JobStatusView {
    fn from(job: &JobRow) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status.clone(),
            progress: progress(job.processed_count, job.item_count),
            processed_count: job.processed_count,
            item_count: job.item_count,
            matched_count: job.matched_count,
            matching_method: job.matching_method.clone(),
            file_name: job.file_name.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::tests::pending_job;

    #[test]
    fn test_progress_rounding() {
        assert_eq!(progress(0, 3), 0);
        assert_eq!(progress(1, 3), 33);
        assert_eq!(progress(2, 3), 67);
        assert_eq!(progress(3, 3), 100);
        assert_eq!(progress(1, 200), 1);
        assert_eq!(progress(1, 201), 0);
    }

    #[test]
    fn test_progress_zero_items() {
        assert_eq!(progress(0, 0), 0);
        assert_eq!(progress(5, 0), 0);
    }

    #[test]
    fn test_progress_clamped() {
        assert_eq!(progress(12, 10), 100);
        assert_eq!(progress(-1, 10), 0);
    }

    #[test]
    fn test_terminal_states_never_transition() {
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Completed,
                JobStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));

        let err = JobStatus::Completed
            .ensure_transition(JobStatus::Processing)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid job transition from 'completed' to 'processing'"
        );
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!(matches!(
            "cancelled".parse::<JobStatus>(),
            Err(JobError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_status_view() {
        let mut job = pending_job("u1", 4);
        job.processed_count = 1;
        let view = JobStatusView::from(&job);
        assert_eq!(view.progress, 25);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["jobId"], job.id.as_str());
        assert_eq!(json["matchingMethod"], "LOCAL");
        assert_eq!(json["itemCount"], 4);
    }
}
