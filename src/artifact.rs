use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::models::{AnalyticsSnapshot, Repository};

pub async fn ensure_output_root(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create output root at {}", path.display()))
}

pub fn snapshot_file_name(project: &str, repository: &str, date_stamp: &str) -> String {
    format!("analytics-{project}-{repository}-{date_stamp}.json")
}

pub fn summary_file_name(project: &str, repository: &str, date_stamp: &str) -> String {
    format!("summary-{project}-{repository}-{date_stamp}.csv")
}

pub fn request_output_path(output_root: &Path, request_id: &str, file_name: &str) -> PathBuf {
    output_root.join(request_id).join(file_name)
}

pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

pub async fn delete_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

/// Write the per-repository result files for one request: the full snapshot
/// as JSON and a headline-metric CSV. Returns the written paths.
pub async fn write_repo_artifacts(
    output_root: &Path,
    request_id: &str,
    project: &str,
    repo: &Repository,
    snapshot: &AnalyticsSnapshot,
    date_stamp: &str,
) -> Result<Vec<String>> {
    let json_path = request_output_path(
        output_root,
        request_id,
        &snapshot_file_name(project, &repo.name, date_stamp),
    );
    ensure_parent_dir(&json_path).await?;
    let json = serde_json::to_vec_pretty(snapshot).context("Failed to encode snapshot JSON")?;
    fs::write(&json_path, json)
        .await
        .with_context(|| format!("Failed to write {}", json_path.display()))?;

    let csv_path = request_output_path(
        output_root,
        request_id,
        &summary_file_name(project, &repo.name, date_stamp),
    );
    fs::write(&csv_path, summary_csv(repo, snapshot))
        .await
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;

    Ok(vec![
        json_path.to_string_lossy().into_owned(),
        csv_path.to_string_lossy().into_owned(),
    ])
}

fn summary_csv(repo: &Repository, snapshot: &AnalyticsSnapshot) -> String {
    let commit = &snapshot.commit_analytics;
    let authors = &snapshot.author_analytics;
    let prs = &snapshot.pull_request_analytics;
    let health = &snapshot.repository_health;

    let mut out = String::from("metric,value\n");
    out.push_str(&format!("repository,{}\n", repo.name));
    out.push_str(&format!("total_commits,{}\n", commit.total_commits));
    out.push_str(&format!("total_added,{}\n", commit.total_added));
    out.push_str(&format!("total_edited,{}\n", commit.total_edited));
    out.push_str(&format!("total_deleted,{}\n", commit.total_deleted));
    out.push_str(&format!("merge_commits,{}\n", commit.merge_commits));
    out.push_str(&format!("total_authors,{}\n", authors.total_authors));
    out.push_str(&format!(
        "bus_factor_50_percent,{}\n",
        authors.bus_factor_50_percent
    ));
    out.push_str(&format!(
        "bus_factor_80_percent,{}\n",
        authors.bus_factor_80_percent
    ));
    out.push_str(&format!(
        "total_branches,{}\n",
        snapshot.branch_analytics.total_branches
    ));
    out.push_str(&format!("total_pull_requests,{}\n", prs.total_pull_requests));
    out.push_str(&format!(
        "recent_activity_30_days,{}\n",
        health.recent_activity_30_days
    ));
    out
}
