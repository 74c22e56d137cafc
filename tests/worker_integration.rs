//! End-to-end scenarios for the polling worker: claim, partial failure,
//! crash recovery and the start-once guard, all against an in-memory store
//! and a fake remote client.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use repo_analytics_api::client::{ClientError, SourceControlClient};
use repo_analytics_api::models::{
    Branch, ChangeCounts, Commit, PullRequest, Repository, RequestStatus,
};
use repo_analytics_api::store::Store;
use repo_analytics_api::worker::{PollingWorker, WorkerConfig};

async fn memory_store() -> (Store, SqlitePool) {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    let store = Store::new(pool.clone());
    store.migrate().await.unwrap();
    (store, pool)
}

struct FakeClient {
    repos: Vec<Repository>,
    commits_per_repo: usize,
    failing_repos: HashSet<String>,
}

#[async_trait]
impl SourceControlClient for FakeClient {
    async fn get_repositories(&self, _project: &str) -> Result<Vec<Repository>, ClientError> {
        Ok(self.repos.clone())
    }

    async fn get_commits(
        &self,
        _project: &str,
        repository: &str,
        _branch: Option<&str>,
        top: usize,
        skip: usize,
    ) -> Result<Vec<Commit>, ClientError> {
        if self.failing_repos.contains(repository) {
            return Err(ClientError::Transient("connection reset".to_string()));
        }
        let when = Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap();
        Ok((skip..self.commits_per_repo.min(skip + top))
            .map(|i| Commit {
                commit_id: format!("{repository}-c{i}"),
                author_name: "Alice".to_string(),
                author_email: "alice@example.com".to_string(),
                author_date: when,
                committer_name: "Alice".to_string(),
                committer_email: "alice@example.com".to_string(),
                committer_date: when,
                message: format!("change {i}"),
                change_counts: ChangeCounts {
                    added: 1,
                    edited: 0,
                    deleted: 0,
                },
                parents: Vec::new(),
                url: String::new(),
            })
            .collect())
    }

    async fn get_branches(
        &self,
        _project: &str,
        repository: &str,
    ) -> Result<Vec<Branch>, ClientError> {
        if self.failing_repos.contains(repository) {
            return Err(ClientError::Transient("connection reset".to_string()));
        }
        Ok(vec![Branch {
            name: "main".to_string(),
            object_id: "o1".to_string(),
            creator: None,
            url: String::new(),
            is_default: true,
        }])
    }

    async fn get_pull_requests(
        &self,
        _project: &str,
        _repository: &str,
        _status: &str,
        _top: usize,
        _skip: usize,
    ) -> Result<Vec<PullRequest>, ClientError> {
        Ok(Vec::new())
    }
}

fn repo(id: &str, name: &str) -> Repository {
    Repository {
        id: id.to_string(),
        name: name.to_string(),
        project: "P".to_string(),
        url: String::new(),
        default_branch: "refs/heads/main".to_string(),
        size: 0,
        is_fork: false,
    }
}

fn worker_config(output_root: std::path::PathBuf) -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(50),
        stale_after: Duration::from_secs(300),
        retention_days: 90,
        output_root,
        page_size: 100,
    }
}

async fn wait_for_status(store: &Store, id: &str, status: RequestStatus) {
    for _ in 0..200 {
        let request = store.get_request(id).await.unwrap().unwrap();
        if request.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("request {id} never reached {status:?}");
}

#[tokio::test]
async fn partial_failure_still_completes_with_surviving_artifacts() {
    let (store, _pool) = memory_store().await;
    let dir = tempfile::tempdir().unwrap();

    store.upsert_repository(&repo("r1", "alpha")).await.unwrap();
    store.upsert_repository(&repo("r2", "beta")).await.unwrap();

    let client = Arc::new(FakeClient {
        repos: vec![repo("r1", "alpha"), repo("r2", "beta")],
        commits_per_repo: 5,
        failing_repos: HashSet::from(["alpha".to_string()]),
    });
    let worker = PollingWorker::new(
        store.clone(),
        client,
        worker_config(dir.path().to_path_buf()),
    );

    let request = store
        .create_request("P", &["r1".to_string(), "r2".to_string()])
        .await
        .unwrap();

    assert!(worker.start());
    wait_for_status(&store, &request.id, RequestStatus::Completed).await;
    worker.stop(Duration::from_secs(5)).await;

    let done = store.get_request(&request.id).await.unwrap().unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert!(done.error_message.is_none());

    let progress = done.progress.unwrap();
    assert_eq!(progress.total_repos, 2);
    assert_eq!(progress.completed_repos, 2);

    // Only beta produced artifacts: its snapshot JSON and summary CSV.
    assert_eq!(done.result_files.len(), 2);
    assert!(done.result_files.iter().all(|f| f.contains("beta")));
    assert!(done.result_files.iter().all(|f| std::path::Path::new(f).exists()));

    // The failing repository stored nothing.
    assert_eq!(store.commit_count("r1").await.unwrap(), 0);
    assert_eq!(store.commit_count("r2").await.unwrap(), 5);
}

#[tokio::test]
async fn every_repo_failing_completes_with_no_artifacts() {
    let (store, _pool) = memory_store().await;
    let dir = tempfile::tempdir().unwrap();

    store.upsert_repository(&repo("r1", "alpha")).await.unwrap();

    let client = Arc::new(FakeClient {
        repos: vec![repo("r1", "alpha")],
        commits_per_repo: 5,
        failing_repos: HashSet::from(["alpha".to_string()]),
    });
    let worker = PollingWorker::new(
        store.clone(),
        client,
        worker_config(dir.path().to_path_buf()),
    );

    let request = store.create_request("P", &["r1".to_string()]).await.unwrap();

    assert!(worker.start());
    wait_for_status(&store, &request.id, RequestStatus::Completed).await;
    worker.stop(Duration::from_secs(5)).await;

    let done = store.get_request(&request.id).await.unwrap().unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert!(done.result_files.is_empty());
}

#[tokio::test]
async fn stale_running_request_is_recovered_and_reprocessed() {
    let (store, pool) = memory_store().await;
    let dir = tempfile::tempdir().unwrap();

    store.upsert_repository(&repo("r1", "alpha")).await.unwrap();

    // A request left Running by a crashed process, well past the threshold.
    let stale = store.create_request("P", &["r1".to_string()]).await.unwrap();
    store.mark_running(&stale.id).await.unwrap();
    let old = (Utc::now() - chrono::Duration::minutes(30))
        .to_rfc3339_opts(SecondsFormat::Nanos, true);
    sqlx::query("UPDATE analytics_requests SET started_at = ?, error_message = 'crashed' WHERE id = ?")
        .bind(&old)
        .bind(&stale.id)
        .execute(&pool)
        .await
        .unwrap();

    let client = Arc::new(FakeClient {
        repos: vec![repo("r1", "alpha")],
        commits_per_repo: 3,
        failing_repos: HashSet::new(),
    });
    let worker = PollingWorker::new(
        store.clone(),
        client,
        worker_config(dir.path().to_path_buf()),
    );

    assert!(worker.start());
    wait_for_status(&store, &stale.id, RequestStatus::Completed).await;
    worker.stop(Duration::from_secs(5)).await;

    let done = store.get_request(&stale.id).await.unwrap().unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert!(done.error_message.is_none());
    assert_eq!(done.result_files.len(), 2);
}

#[tokio::test]
async fn recently_started_running_request_is_left_alone() {
    let (store, _pool) = memory_store().await;
    let dir = tempfile::tempdir().unwrap();

    // Claimed moments ago, plausibly still being worked on elsewhere.
    let fresh = store.create_request("P", &["r1".to_string()]).await.unwrap();
    store.mark_running(&fresh.id).await.unwrap();

    let client = Arc::new(FakeClient {
        repos: Vec::new(),
        commits_per_repo: 0,
        failing_repos: HashSet::new(),
    });
    let worker = PollingWorker::new(
        store.clone(),
        client,
        worker_config(dir.path().to_path_buf()),
    );

    assert!(worker.start());
    tokio::time::sleep(Duration::from_millis(300)).await;
    worker.stop(Duration::from_secs(5)).await;

    let untouched = store.get_request(&fresh.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, RequestStatus::Running);
    assert!(untouched.started_at.is_some());
}

#[tokio::test]
async fn starting_twice_never_spawns_a_second_loop() {
    let (store, _pool) = memory_store().await;
    let dir = tempfile::tempdir().unwrap();

    let client = Arc::new(FakeClient {
        repos: Vec::new(),
        commits_per_repo: 0,
        failing_repos: HashSet::new(),
    });
    let worker = PollingWorker::new(
        store.clone(),
        client,
        worker_config(dir.path().to_path_buf()),
    );

    assert!(worker.start());
    assert!(!worker.start());

    // Handle clones share the same inner state, so a clone cannot start a
    // second loop either and observes the same running flag.
    let alias = worker.clone();
    assert!(!alias.start());
    assert!(alias.is_running());

    let status = alias.status().await;
    assert!(status.running);
    assert_eq!(status.processing_count, 0);

    worker.stop(Duration::from_secs(5)).await;
    assert!(!alias.is_running());

    // A stopped worker can be started again.
    assert!(worker.start());
    worker.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn reingestion_after_completion_inserts_nothing_new() {
    let (store, _pool) = memory_store().await;
    let dir = tempfile::tempdir().unwrap();

    store.upsert_repository(&repo("r1", "alpha")).await.unwrap();

    let client = Arc::new(FakeClient {
        repos: vec![repo("r1", "alpha")],
        commits_per_repo: 7,
        failing_repos: HashSet::new(),
    });
    let worker = PollingWorker::new(
        store.clone(),
        client,
        worker_config(dir.path().to_path_buf()),
    );

    let first = store.create_request("P", &["r1".to_string()]).await.unwrap();
    assert!(worker.start());
    wait_for_status(&store, &first.id, RequestStatus::Completed).await;

    // Same repository again: ingestion is idempotent, the job still completes.
    let second = store.create_request("P", &["r1".to_string()]).await.unwrap();
    wait_for_status(&store, &second.id, RequestStatus::Completed).await;
    worker.stop(Duration::from_secs(5)).await;

    assert_eq!(store.commit_count("r1").await.unwrap(), 7);
    let done = store.get_request(&second.id).await.unwrap().unwrap();
    assert_eq!(done.result_files.len(), 2);
}
