use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;
use uuid::Uuid;

use crate::models::{
    AnalyticsRequest, AnalyticsSnapshot, Branch, Commit, Organization, ProgressInfo, Project,
    PullRequest, Repository, RequestStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// All persistent state lives behind this handle: the containment hierarchy
/// (organizations, projects, repositories), the ingested Git data, analytics
/// snapshots and the durable job table.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Containment hierarchy
    // =========================================================================

    pub async fn upsert_organization(&self, org: &Organization) -> Result<()> {
        let now = fmt_ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO organizations (name, url, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                url = excluded.url,
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&org.name)
        .bind(&org.url)
        .bind(&org.description)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT name, url, description FROM organizations ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, url, description)| Organization {
                name,
                url,
                description,
            })
            .collect())
    }

    pub async fn upsert_project(&self, project: &Project) -> Result<()> {
        let now = fmt_ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, state, visibility, organization, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                state = excluded.state,
                visibility = excluded.visibility,
                organization = excluded.organization,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.state)
        .bind(&project.visibility)
        .bind(&project.organization)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_projects(&self, organization: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String)>(
            "SELECT id, name, state, visibility, organization FROM projects WHERE organization = ? ORDER BY name",
        )
        .bind(organization)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, state, visibility, organization)| Project {
                id,
                name,
                state,
                visibility,
                organization,
            })
            .collect())
    }

    #[tracing::instrument(skip(self, repo), fields(repo_id = %repo.id, name = %repo.name))]
    pub async fn upsert_repository(&self, repo: &Repository) -> Result<()> {
        let now = fmt_ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO repositories (id, name, project, url, default_branch, size, is_fork, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                project = excluded.project,
                url = excluded.url,
                default_branch = excluded.default_branch,
                size = excluded.size,
                is_fork = excluded.is_fork,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&repo.id)
        .bind(&repo.name)
        .bind(&repo.project)
        .bind(&repo.url)
        .bind(&repo.default_branch)
        .bind(repo.size)
        .bind(repo.is_fork)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let row = sqlx::query_as::<_, (String, String, String, String, String, i64, bool)>(
            "SELECT id, name, project, url, default_branch, size, is_fork FROM repositories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_repository))
    }

    pub async fn list_repositories(&self, project: Option<&str>) -> Result<Vec<Repository>> {
        let rows = match project {
            Some(project) => {
                sqlx::query_as::<_, (String, String, String, String, String, i64, bool)>(
                    "SELECT id, name, project, url, default_branch, size, is_fork FROM repositories WHERE project = ? ORDER BY name",
                )
                .bind(project)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, (String, String, String, String, String, i64, bool)>(
                    "SELECT id, name, project, url, default_branch, size, is_fork FROM repositories ORDER BY name",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(row_to_repository).collect())
    }

    /// Deleting a repository cascades to its commits, branches, pull requests
    /// and analytics snapshots.
    pub async fn delete_repository(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Ingested Git data
    // =========================================================================

    /// Insert only commits whose id is not already stored for the repository.
    /// Existing rows are never touched; returns the number of new rows.
    #[tracing::instrument(skip(self, commits), fields(repo_id = %repository_id, incoming = commits.len()))]
    pub async fn store_commits(&self, commits: &[Commit], repository_id: &str) -> Result<usize> {
        if commits.is_empty() {
            return Ok(0);
        }

        let existing = sqlx::query_as::<_, (String,)>(
            "SELECT commit_id FROM commits WHERE repository_id = ?",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        let mut seen: HashSet<String> = existing.into_iter().map(|(id,)| id).collect();

        let now = fmt_ts(Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for commit in commits {
            if !seen.insert(commit.commit_id.clone()) {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO commits (
                    commit_id, repository_id,
                    author_name, author_email, author_date,
                    committer_name, committer_email, committer_date,
                    message, added, edited, deleted, parents, url, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&commit.commit_id)
            .bind(repository_id)
            .bind(&commit.author_name)
            .bind(&commit.author_email)
            .bind(fmt_ts(commit.author_date))
            .bind(&commit.committer_name)
            .bind(&commit.committer_email)
            .bind(fmt_ts(commit.committer_date))
            .bind(&commit.message)
            .bind(commit.change_counts.added)
            .bind(commit.change_counts.edited)
            .bind(commit.change_counts.deleted)
            .bind(serde_json::to_string(&commit.parents)?)
            .bind(&commit.url)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        tx.commit().await?;
        if inserted > 0 {
            info!(inserted, repo_id = %repository_id, "Stored new commits");
        }
        Ok(inserted)
    }

    pub async fn commit_count(&self, repository_id: &str) -> Result<i64> {
        let (count,) =
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM commits WHERE repository_id = ?")
                .bind(repository_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn get_commits(
        &self,
        repository_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Commit>> {
        let sql = match limit {
            Some(_) => {
                "SELECT commit_id, author_name, author_email, author_date, committer_name, \
                 committer_email, committer_date, message, added, edited, deleted, parents, url \
                 FROM commits WHERE repository_id = ? ORDER BY author_date DESC LIMIT ?"
            }
            None => {
                "SELECT commit_id, author_name, author_email, author_date, committer_name, \
                 committer_email, committer_date, message, added, edited, deleted, parents, url \
                 FROM commits WHERE repository_id = ? ORDER BY author_date DESC"
            }
        };
        let mut query = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                String,
                String,
                String,
                String,
                String,
                i64,
                i64,
                i64,
                String,
                String,
            ),
        >(sql)
        .bind(repository_id);
        if let Some(limit) = limit {
            query = query.bind(limit);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter().map(row_to_commit).collect()
    }

    /// Replace the repository's branch set with the freshly fetched one.
    /// An empty fetch is a no-op: the stored set is left untouched.
    #[tracing::instrument(skip(self, branches), fields(repo_id = %repository_id, incoming = branches.len()))]
    pub async fn store_branches(&self, branches: &[Branch], repository_id: &str) -> Result<usize> {
        if branches.is_empty() {
            return Ok(0);
        }

        let now = fmt_ts(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM branches WHERE repository_id = ?")
            .bind(repository_id)
            .execute(&mut *tx)
            .await?;

        for branch in branches {
            sqlx::query(
                r#"
                INSERT INTO branches (repository_id, name, object_id, creator, url, is_default, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(repository_id)
            .bind(&branch.name)
            .bind(&branch.object_id)
            .bind(&branch.creator)
            .bind(&branch.url)
            .bind(branch.is_default)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(count = branches.len(), repo_id = %repository_id, "Replaced branch set");
        Ok(branches.len())
    }

    pub async fn list_branches(&self, repository_id: &str) -> Result<Vec<Branch>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, String, bool)>(
            "SELECT name, object_id, creator, url, is_default FROM branches WHERE repository_id = ? ORDER BY name",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, object_id, creator, url, is_default)| Branch {
                name,
                object_id,
                creator,
                url,
                is_default,
            })
            .collect())
    }

    /// Insert pull requests not yet stored for the repository. A conflicting
    /// row has its lifecycle fields refreshed but does not count as inserted.
    #[tracing::instrument(skip(self, pull_requests), fields(repo_id = %repository_id, incoming = pull_requests.len()))]
    pub async fn store_pull_requests(
        &self,
        pull_requests: &[PullRequest],
        repository_id: &str,
    ) -> Result<usize> {
        if pull_requests.is_empty() {
            return Ok(0);
        }

        let existing = sqlx::query_as::<_, (i64,)>(
            "SELECT pull_request_id FROM pull_requests WHERE repository_id = ?",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        let mut seen: HashSet<i64> = existing.into_iter().map(|(id,)| id).collect();

        let now = fmt_ts(Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for pr in pull_requests {
            let is_new = seen.insert(pr.pull_request_id);
            sqlx::query(
                r#"
                INSERT INTO pull_requests (
                    repository_id, pull_request_id, title, description,
                    source_branch, target_branch, author,
                    created_date, closed_date, completed_date,
                    status, merge_status, reviewers, url, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(repository_id, pull_request_id) DO UPDATE SET
                    status = excluded.status,
                    merge_status = excluded.merge_status,
                    closed_date = excluded.closed_date,
                    completed_date = excluded.completed_date
                "#,
            )
            .bind(repository_id)
            .bind(pr.pull_request_id)
            .bind(&pr.title)
            .bind(&pr.description)
            .bind(&pr.source_branch)
            .bind(&pr.target_branch)
            .bind(&pr.author)
            .bind(fmt_ts(pr.created_date))
            .bind(pr.closed_date.map(fmt_ts))
            .bind(pr.completed_date.map(fmt_ts))
            .bind(&pr.status)
            .bind(&pr.merge_status)
            .bind(serde_json::to_string(&pr.reviewers)?)
            .bind(&pr.url)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            if is_new {
                inserted += 1;
            }
        }

        tx.commit().await?;
        if inserted > 0 {
            info!(inserted, repo_id = %repository_id, "Stored new pull requests");
        }
        Ok(inserted)
    }

    pub async fn list_pull_requests(&self, repository_id: &str) -> Result<Vec<PullRequest>> {
        let rows = sqlx::query_as::<
            _,
            (
                i64,
                String,
                String,
                String,
                String,
                String,
                String,
                Option<String>,
                Option<String>,
                String,
                String,
                String,
                String,
            ),
        >(
            "SELECT pull_request_id, title, description, source_branch, target_branch, author, \
             created_date, closed_date, completed_date, status, merge_status, reviewers, url \
             FROM pull_requests WHERE repository_id = ? ORDER BY pull_request_id",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_pull_request).collect()
    }

    // =========================================================================
    // Analytics snapshots
    // =========================================================================

    pub async fn insert_snapshot(&self, snapshot: &AnalyticsSnapshot) -> Result<()> {
        let now = fmt_ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO analytics_results (
                repository_id, analysis_date,
                commit_analytics, author_analytics, branch_analytics,
                time_analytics, pull_request_analytics, repository_health,
                extra, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.repository_id)
        .bind(fmt_ts(snapshot.analysis_date))
        .bind(serde_json::to_string(&snapshot.commit_analytics)?)
        .bind(serde_json::to_string(&snapshot.author_analytics)?)
        .bind(serde_json::to_string(&snapshot.branch_analytics)?)
        .bind(serde_json::to_string(&snapshot.time_analytics)?)
        .bind(serde_json::to_string(&snapshot.pull_request_analytics)?)
        .bind(serde_json::to_string(&snapshot.repository_health)?)
        .bind(serde_json::to_string(&snapshot.extra)?)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        info!(repo_id = %snapshot.repository_id, "Stored analytics snapshot");
        Ok(())
    }

    pub async fn latest_snapshot(&self, repository_id: &str) -> Result<Option<AnalyticsSnapshot>> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                String,
                String,
                String,
                String,
                String,
                Option<String>,
            ),
        >(
            "SELECT repository_id, analysis_date, commit_analytics, author_analytics, \
             branch_analytics, time_analytics, pull_request_analytics, repository_health, extra \
             FROM analytics_results WHERE repository_id = ? \
             ORDER BY analysis_date DESC LIMIT 1",
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_snapshot).transpose()
    }

    /// Delete snapshots older than the retention window; returns rows removed.
    pub async fn cleanup_snapshots(&self, days_to_keep: i64) -> Result<u64> {
        let cutoff = fmt_ts(Utc::now() - chrono::Duration::days(days_to_keep));
        let result = sqlx::query("DELETE FROM analytics_results WHERE analysis_date < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, "Cleaned up old analytics snapshots");
        }
        Ok(deleted)
    }

    // =========================================================================
    // Analytics requests (the durable job table)
    // =========================================================================

    pub async fn create_request(
        &self,
        project_name: &str,
        repository_ids: &[String],
    ) -> Result<AnalyticsRequest> {
        let request = AnalyticsRequest {
            id: Uuid::new_v4().to_string(),
            project_name: project_name.to_string(),
            repository_ids: repository_ids.to_vec(),
            status: RequestStatus::Requested,
            requested_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            progress: None,
            result_files: Vec::new(),
        };

        sqlx::query(
            r#"
            INSERT INTO analytics_requests (
                id, project_name, repository_ids, status, requested_at, result_files
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(&request.project_name)
        .bind(serde_json::to_string(&request.repository_ids)?)
        .bind(request.status.as_str())
        .bind(fmt_ts(request.requested_at))
        .bind(serde_json::to_string(&request.result_files)?)
        .execute(&self.pool)
        .await?;

        Ok(request)
    }

    pub async fn get_request(&self, id: &str) -> Result<Option<AnalyticsRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(
            "SELECT id, project_name, repository_ids, status, requested_at, started_at, \
             completed_at, error_message, progress, result_files \
             FROM analytics_requests WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_request).transpose()
    }

    pub async fn list_requests(
        &self,
        status: Option<RequestStatus>,
    ) -> Result<Vec<AnalyticsRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, RequestRow>(
                    "SELECT id, project_name, repository_ids, status, requested_at, started_at, \
                     completed_at, error_message, progress, result_files \
                     FROM analytics_requests WHERE status = ? ORDER BY requested_at",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RequestRow>(
                    "SELECT id, project_name, repository_ids, status, requested_at, started_at, \
                     completed_at, error_message, progress, result_files \
                     FROM analytics_requests ORDER BY requested_at",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_request).collect()
    }

    /// Claim a request: Requested -> Running, stamping started_at. Fails with
    /// Conflict if the request is not currently in Requested.
    #[tracing::instrument(skip(self))]
    pub async fn mark_running(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE analytics_requests SET status = ?, started_at = ?, error_message = NULL \
             WHERE id = ? AND status = ?",
        )
        .bind(RequestStatus::Running.as_str())
        .bind(fmt_ts(Utc::now()))
        .bind(id)
        .bind(RequestStatus::Requested.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "request {id} is not in Requested state"
            )));
        }
        Ok(())
    }

    /// Incremental progress while the request stays Running.
    pub async fn update_progress(&self, id: &str, progress: &ProgressInfo) -> Result<()> {
        sqlx::query("UPDATE analytics_requests SET progress = ? WHERE id = ? AND status = ?")
            .bind(serde_json::to_string(progress)?)
            .bind(id)
            .bind(RequestStatus::Running.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, progress, result_files))]
    pub async fn complete_request(
        &self,
        id: &str,
        progress: &ProgressInfo,
        result_files: &[String],
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE analytics_requests SET status = ?, completed_at = ?, progress = ?, result_files = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(RequestStatus::Completed.as_str())
        .bind(fmt_ts(Utc::now()))
        .bind(serde_json::to_string(progress)?)
        .bind(serde_json::to_string(result_files)?)
        .bind(id)
        .bind(RequestStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "request {id} is not in Running state"
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, error_message))]
    pub async fn fail_request(&self, id: &str, error_message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE analytics_requests SET status = ?, completed_at = ?, error_message = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(RequestStatus::Failed.as_str())
        .bind(fmt_ts(Utc::now()))
        .bind(error_message)
        .bind(id)
        .bind(RequestStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "request {id} is not in Running state"
            )));
        }
        Ok(())
    }

    /// Crash recovery: requeue Running requests whose started_at is older
    /// than the staleness threshold. The stale timestamp and any previous
    /// error are cleared so the next claim starts clean. Returns the number
    /// of requeued requests.
    pub async fn reset_stale_running(&self, older_than: Duration) -> Result<u64> {
        let cutoff = fmt_ts(
            Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero()),
        );
        let result = sqlx::query(
            "UPDATE analytics_requests SET status = ?, started_at = NULL, error_message = NULL \
             WHERE status = ? AND started_at IS NOT NULL AND started_at < ?",
        )
        .bind(RequestStatus::Requested.as_str())
        .bind(RequestStatus::Running.as_str())
        .bind(&cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

type RequestRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn row_to_request(row: RequestRow) -> Result<AnalyticsRequest> {
    let (
        id,
        project_name,
        repository_ids,
        status,
        requested_at,
        started_at,
        completed_at,
        error_message,
        progress,
        result_files,
    ) = row;

    Ok(AnalyticsRequest {
        id,
        project_name,
        repository_ids: serde_json::from_str(&repository_ids)?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        requested_at: parse_ts(&requested_at)?,
        started_at: started_at.as_deref().map(parse_ts).transpose()?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
        error_message,
        progress: progress
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        result_files: result_files
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default(),
    })
}

fn row_to_repository(row: (String, String, String, String, String, i64, bool)) -> Repository {
    let (id, name, project, url, default_branch, size, is_fork) = row;
    Repository {
        id,
        name,
        project,
        url,
        default_branch,
        size,
        is_fork,
    }
}

#[allow(clippy::type_complexity)]
fn row_to_commit(
    row: (
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        i64,
        i64,
        i64,
        String,
        String,
    ),
) -> Result<Commit> {
    let (
        commit_id,
        author_name,
        author_email,
        author_date,
        committer_name,
        committer_email,
        committer_date,
        message,
        added,
        edited,
        deleted,
        parents,
        url,
    ) = row;

    Ok(Commit {
        commit_id,
        author_name,
        author_email,
        author_date: parse_ts(&author_date)?,
        committer_name,
        committer_email,
        committer_date: parse_ts(&committer_date)?,
        message,
        change_counts: crate::models::ChangeCounts {
            added,
            edited,
            deleted,
        },
        parents: serde_json::from_str(&parents)?,
        url,
    })
}

#[allow(clippy::type_complexity)]
fn row_to_pull_request(
    row: (
        i64,
        String,
        String,
        String,
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        String,
        String,
        String,
        String,
    ),
) -> Result<PullRequest> {
    let (
        pull_request_id,
        title,
        description,
        source_branch,
        target_branch,
        author,
        created_date,
        closed_date,
        completed_date,
        status,
        merge_status,
        reviewers,
        url,
    ) = row;

    Ok(PullRequest {
        pull_request_id,
        title,
        description,
        source_branch,
        target_branch,
        author,
        created_date: parse_ts(&created_date)?,
        closed_date: closed_date.as_deref().map(parse_ts).transpose()?,
        completed_date: completed_date.as_deref().map(parse_ts).transpose()?,
        status,
        merge_status,
        reviewers: serde_json::from_str(&reviewers)?,
        url,
    })
}

#[allow(clippy::type_complexity)]
fn row_to_snapshot(
    row: (
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        Option<String>,
    ),
) -> Result<AnalyticsSnapshot> {
    let (
        repository_id,
        analysis_date,
        commit_analytics,
        author_analytics,
        branch_analytics,
        time_analytics,
        pull_request_analytics,
        repository_health,
        extra,
    ) = row;

    Ok(AnalyticsSnapshot {
        repository_id,
        analysis_date: parse_ts(&analysis_date)?,
        commit_analytics: serde_json::from_str(&commit_analytics)?,
        author_analytics: serde_json::from_str(&author_analytics)?,
        branch_analytics: serde_json::from_str(&branch_analytics)?,
        time_analytics: serde_json::from_str(&time_analytics)?,
        pull_request_analytics: serde_json::from_str(&pull_request_analytics)?,
        repository_health: serde_json::from_str(&repository_health)?,
        extra: extra
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or(serde_json::Value::Null),
    })
}

/// RFC3339 with fixed-width nanosecond precision so stored timestamps compare
/// lexicographically in SQL.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("bad timestamp {raw:?}: {err}")))
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        name TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        state TEXT NOT NULL,
        visibility TEXT NOT NULL,
        organization TEXT NOT NULL REFERENCES organizations(name),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS repositories (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        project TEXT NOT NULL,
        url TEXT NOT NULL,
        default_branch TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        is_fork INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS commits (
        commit_id TEXT NOT NULL,
        repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        author_name TEXT NOT NULL,
        author_email TEXT NOT NULL,
        author_date TEXT NOT NULL,
        committer_name TEXT NOT NULL,
        committer_email TEXT NOT NULL,
        committer_date TEXT NOT NULL,
        message TEXT NOT NULL,
        added INTEGER NOT NULL DEFAULT 0,
        edited INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0,
        parents TEXT NOT NULL,
        url TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (repository_id, commit_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS branches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        object_id TEXT NOT NULL,
        creator TEXT,
        url TEXT NOT NULL,
        is_default INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pull_requests (
        repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        pull_request_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        source_branch TEXT NOT NULL,
        target_branch TEXT NOT NULL,
        author TEXT NOT NULL,
        created_date TEXT NOT NULL,
        closed_date TEXT,
        completed_date TEXT,
        status TEXT NOT NULL,
        merge_status TEXT NOT NULL DEFAULT '',
        reviewers TEXT NOT NULL,
        url TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (repository_id, pull_request_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analytics_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        analysis_date TEXT NOT NULL,
        commit_analytics TEXT NOT NULL,
        author_analytics TEXT NOT NULL,
        branch_analytics TEXT NOT NULL,
        time_analytics TEXT NOT NULL,
        pull_request_analytics TEXT NOT NULL,
        repository_health TEXT NOT NULL,
        extra TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_analytics_results_repo_date
        ON analytics_results (repository_id, analysis_date)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analytics_requests (
        id TEXT PRIMARY KEY,
        project_name TEXT NOT NULL,
        repository_ids TEXT NOT NULL,
        status TEXT NOT NULL,
        requested_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        error_message TEXT,
        progress TEXT,
        result_files TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_analytics_requests_status
        ON analytics_requests (status, requested_at)
    "#,
];

#[cfg(test)]
pub(crate) async fn memory_store() -> Store {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    let store = Store::new(pool);
    store.migrate().await.unwrap();
    store
}
