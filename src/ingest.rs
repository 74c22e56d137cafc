use anyhow::{Context, Result};
use futures::TryStreamExt;
use tracing::info;

use crate::client::{fetch_all_commits, fetch_all_pull_requests, SourceControlClient};
use crate::models::{Commit, PullRequest, Repository};
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub commits_fetched: usize,
    pub commits_inserted: usize,
    pub branches: usize,
    pub pull_requests_fetched: usize,
    pub pull_requests_inserted: usize,
}

/// Pull everything the remote API knows about one repository and merge it
/// into the store: refresh the repository record, insert unseen commits,
/// replace the branch set and upsert pull requests. Returns the refreshed
/// repository record alongside the ingest counters.
pub async fn sync_repository(
    client: &dyn SourceControlClient,
    store: &Store,
    project: &str,
    repo: &Repository,
    page_size: usize,
) -> Result<(Repository, IngestSummary)> {
    let remote_repos = client.get_repositories(project).await?;
    let fresh = remote_repos
        .into_iter()
        .find(|candidate| candidate.id == repo.id || candidate.name == repo.name)
        .with_context(|| format!("Repository {} not found in project {}", repo.name, project))?;
    store.upsert_repository(&fresh).await?;

    let commits: Vec<Commit> =
        fetch_all_commits(client, project, &fresh.name, None, page_size)
            .try_collect()
            .await?;
    let commits_inserted = store.store_commits(&commits, &fresh.id).await?;

    let branches = client.get_branches(project, &fresh.name).await?;
    let branch_count = store.store_branches(&branches, &fresh.id).await?;

    let pull_requests: Vec<PullRequest> =
        fetch_all_pull_requests(client, project, &fresh.name, "all", page_size)
            .try_collect()
            .await?;
    let pull_requests_inserted = store.store_pull_requests(&pull_requests, &fresh.id).await?;

    let summary = IngestSummary {
        commits_fetched: commits.len(),
        commits_inserted,
        branches: branch_count,
        pull_requests_fetched: pull_requests.len(),
        pull_requests_inserted,
    };

    info!(
        project,
        repository = %fresh.name,
        commits = summary.commits_fetched,
        new_commits = summary.commits_inserted,
        branches = summary.branches,
        pull_requests = summary.pull_requests_fetched,
        "Ingested repository data"
    );

    Ok((fresh, summary))
}
