//! Aggregate statistics for the dashboard and the admin system view.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    activity_repo, client_repo, job_repo, price_item_repo, project_repo, result_repo, user_repo,
    Database, DatabaseError,
};

/// Per-user dashboard counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    /// All matching jobs the user has submitted.
    pub total_projects: u64,
    /// Jobs still pending or processing.
    pub active_projects: u64,
    pub price_items: u64,
    pub clients: u64,
    pub matches_today: u64,
    pub completed_today: u64,
    pub activities_today: u64,
}

/// System-wide counters for administrators.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub total_users: u64,
    pub pending_approvals: u64,
    pub total_price_items: u64,
    pub active_price_items: u64,
    pub jobs: job_repo::JobStatusCounts,
    pub total_jobs: u64,
    pub total_projects: u64,
    pub active_clients: u64,
    pub total_match_results: u64,
    pub average_confidence: f64,
}

/// Milliseconds timestamp of the most recent UTC midnight.
pub fn start_of_day_millis(now: DateTime<Utc>) -> i64 {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc().timestamp_millis())
        .unwrap_or_else(|| now.timestamp_millis())
}

pub fn dashboard_stats(
    db: &Database,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<DashboardStats, DatabaseError> {
    let today = start_of_day_millis(now);
    let jobs = job_repo::status_counts(db, Some(user_id))?;
    let (completed_today, matches_today) = job_repo::completed_since(db, Some(user_id), today)?;
    let (price_items, _) = price_item_repo::counts(db)?;

    Ok(DashboardStats {
        total_projects: jobs.total(),
        active_projects: jobs.pending + jobs.processing,
        price_items,
        clients: client_repo::count_active(db)?,
        matches_today,
        completed_today,
        activities_today: activity_repo::count_since(db, Some(user_id), today)?,
    })
}

pub fn system_stats(db: &Database) -> Result<SystemStats, DatabaseError> {
    let (total_users, pending_approvals) = user_repo::counts(db)?;
    let (total_price_items, active_price_items) = price_item_repo::counts(db)?;
    let jobs = job_repo::status_counts(db, None)?;
    let (total_match_results, average_confidence) = result_repo::totals(db)?;

    Ok(SystemStats {
        total_users,
        pending_approvals,
        total_price_items,
        active_price_items,
        total_jobs: jobs.total(),
        jobs,
        total_projects: project_repo::count(db)?,
        active_clients: client_repo::count_active(db)?,
        total_match_results,
        average_confidence,
    })
}
