use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub state: String,
    pub visibility: String,
    pub organization: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub project: String,
    pub url: String,
    pub default_branch: String,
    pub size: i64,
    pub is_fork: bool,
}

/// File-change totals reported per commit by the source system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub added: i64,
    pub edited: i64,
    pub deleted: i64,
}

impl ChangeCounts {
    pub fn total(&self) -> i64 {
        self.added + self.edited + self.deleted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub commit_id: String,
    pub author_name: String,
    pub author_email: String,
    pub author_date: DateTime<Utc>,
    pub committer_name: String,
    pub committer_email: String,
    pub committer_date: DateTime<Utc>,
    pub message: String,
    pub change_counts: ChangeCounts,
    pub parents: Vec<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub object_id: String,
    pub creator: Option<String>,
    pub url: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reviewer {
    pub name: String,
    pub vote: i32,
    pub is_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub pull_request_id: i64,
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    pub author: String,
    pub created_date: DateTime<Utc>,
    pub closed_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub status: String,
    pub merge_status: String,
    pub reviewers: Vec<Reviewer>,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Requested,
    Running,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Requested => "Requested",
            RequestStatus::Running => "Running",
            RequestStatus::Completed => "Completed",
            RequestStatus::Failed => "Failed",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Requested" => Ok(RequestStatus::Requested),
            "Running" => Ok(RequestStatus::Running),
            "Completed" => Ok(RequestStatus::Completed),
            "Failed" => Ok(RequestStatus::Failed),
            _ => Err(format!("unknown request status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    pub total_repos: usize,
    pub completed_repos: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_repo: Option<String>,
}

/// Durable record of one requested analytics job. Repository ids are frozen
/// at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRequest {
    pub id: String,
    pub project_name: String,
    pub repository_ids: Vec<String>,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub progress: Option<ProgressInfo>,
    pub result_files: Vec<String>,
}

/// Outcome of processing a single repository within a job. Per-repository
/// failures are data, not control flow: the job keeps going.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoReport {
    pub repository_id: String,
    pub repository_name: Option<String>,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitAnalytics {
    pub total_commits: usize,
    pub total_added: i64,
    pub total_edited: i64,
    pub total_deleted: i64,
    pub merge_commits: usize,
    pub regular_commits: usize,
    pub merge_ratio: f64,
    pub average_message_length: f64,
    pub commits_by_day_of_week: BTreeMap<String, u64>,
    pub commits_by_hour: BTreeMap<String, u64>,
    pub commits_by_month: BTreeMap<String, u64>,
    pub first_commit_date: Option<DateTime<Utc>>,
    pub last_commit_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorStats {
    pub commits: u64,
    pub added: i64,
    pub edited: i64,
    pub deleted: i64,
    pub total_changes: i64,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
    pub email_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRank {
    pub name: String,
    pub commits: u64,
    pub total_changes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorAnalytics {
    pub total_authors: usize,
    pub author_statistics: BTreeMap<String, AuthorStats>,
    pub top_contributors_by_commits: Vec<AuthorRank>,
    pub top_contributors_by_changes: Vec<AuthorRank>,
    pub bus_factor_50_percent: usize,
    pub bus_factor_80_percent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchAnalytics {
    pub total_branches: usize,
    pub branch_name_patterns: BTreeMap<String, u64>,
    pub feature_branches: usize,
    pub hotfix_branches: usize,
    pub release_branches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeAnalytics {
    pub commits_by_week: BTreeMap<String, u64>,
    pub weekend_commits: usize,
    pub weekday_commits: usize,
    pub weekend_ratio: f64,
    pub after_hours_commits: usize,
    pub after_hours_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_pr_cycle_time_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_pr_cycle_time_hours: Option<f64>,
    pub completed_prs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestAnalytics {
    pub total_pull_requests: usize,
    pub status_distribution: BTreeMap<String, u64>,
    pub average_reviewers_per_pr: f64,
    pub total_reviewers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryHealth {
    pub recent_activity_30_days: usize,
    pub documentation_commits: usize,
    pub documentation_ratio: f64,
    pub total_branches: usize,
    pub total_pull_requests: usize,
}

/// One append-only analytics snapshot for a repository. Categories are typed
/// records; `extra` is the forward-compat escape hatch at the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub repository_id: String,
    pub analysis_date: DateTime<Utc>,
    pub commit_analytics: CommitAnalytics,
    pub author_analytics: AuthorAnalytics,
    pub branch_analytics: BranchAnalytics,
    pub time_analytics: TimeAnalytics,
    pub pull_request_analytics: PullRequestAnalytics,
    pub repository_health: RepositoryHealth,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestPayload {
    pub project_name: String,
    pub repository_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub id: String,
    pub project_name: String,
    pub repository_ids: Vec<String>,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressInfo>,
    pub result_files: Vec<String>,
}

impl AnalyticsRequest {
    pub fn to_response(&self) -> RequestResponse {
        RequestResponse {
            id: self.id.clone(),
            project_name: self.project_name.clone(),
            repository_ids: self.repository_ids.clone(),
            status: self.status,
            requested_at: self.requested_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_message: self.error_message.clone(),
            progress: self.progress.clone(),
            result_files: self.result_files.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub running: bool,
    pub processing_count: usize,
    pub processing_requests: Vec<String>,
    pub poll_interval_secs: u64,
}
