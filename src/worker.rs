use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::analytics;
use crate::artifact;
use crate::client::SourceControlClient;
use crate::config::Config;
use crate::ingest;
use crate::models::{AnalyticsRequest, ProgressInfo, RepoReport, RequestStatus, WorkerStatus};
use crate::store::Store;

const LOOP_ERROR_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub stale_after: Duration,
    pub retention_days: i64,
    pub output_root: PathBuf,
    pub page_size: usize,
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            stale_after: config.stale_after,
            retention_days: config.retention_days,
            output_root: config.output_root.clone(),
            page_size: config.remote.page_size,
        }
    }
}

/// Background service that drains the analytics-request table. Constructed
/// once by the composition root; the handle clones share one inner state, so
/// every clone observes the same loop and processing set.
#[derive(Clone)]
pub struct PollingWorker {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    client: Arc<dyn SourceControlClient>,
    config: WorkerConfig,
    running: AtomicBool,
    processing: RwLock<HashSet<String>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollingWorker {
    pub fn new(store: Store, client: Arc<dyn SourceControlClient>, config: WorkerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                config,
                running: AtomicBool::new(false),
                processing: RwLock::new(HashSet::new()),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Spawn the background loop. Returns false (with a warning) if the loop
    /// is already running; a second loop is never spawned.
    pub fn start(&self) -> bool {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Polling worker is already running");
            return false;
        }

        let worker = self.clone();
        let handle = tokio::spawn(async move {
            worker.run_loop().await;
        });
        *self.inner.handle.lock().expect("worker handle lock poisoned") = Some(handle);
        info!("Polling worker started");
        true
    }

    /// Signal shutdown and wait for the loop to finish, up to `timeout`.
    pub async fn stop(&self, timeout: Duration) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping polling worker");

        let handle = self
            .inner
            .handle
            .lock()
            .expect("worker handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("Polling worker did not stop within {timeout:?}");
            }
        }
        info!("Polling worker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> WorkerStatus {
        let processing = self.inner.processing.read().await;
        let mut ids: Vec<String> = processing.iter().cloned().collect();
        ids.sort();
        WorkerStatus {
            running: self.is_running(),
            processing_count: ids.len(),
            processing_requests: ids,
            poll_interval_secs: self.inner.config.poll_interval.as_secs(),
        }
    }

    async fn run_loop(&self) {
        match self
            .inner
            .store
            .reset_stale_running(self.inner.config.stale_after)
            .await
        {
            Ok(0) => info!("Completed check for interrupted requests"),
            Ok(reset) => warn!(reset, "Requeued interrupted requests from a previous run"),
            Err(err) => error!("Error checking for interrupted requests: {err}"),
        }

        while self.is_running() {
            match self.poll_once().await {
                Ok(()) => self.idle_sleep(self.inner.config.poll_interval).await,
                Err(err) => {
                    error!("Error in polling loop: {err:#}");
                    tokio::time::sleep(LOOP_ERROR_PAUSE).await;
                }
            }
        }
    }

    /// One full pass: claim and execute every pending request, then prune
    /// expired analytics snapshots.
    async fn poll_once(&self) -> Result<()> {
        let pending = self
            .inner
            .store
            .list_requests(Some(RequestStatus::Requested))
            .await?;

        for request in pending {
            if !self.is_running() {
                break;
            }

            {
                let mut processing = self.inner.processing.write().await;
                if !processing.insert(request.id.clone()) {
                    continue;
                }
            }

            info!(
                request_id = %request.id,
                project = %request.project_name,
                repos = request.repository_ids.len(),
                "Starting analytics request"
            );

            if let Err(err) = self.process_request(&request).await {
                error!(request_id = %request.id, "Failed to process analytics request: {err:#}");
                if let Err(store_err) = self
                    .inner
                    .store
                    .fail_request(&request.id, &format!("{err:#}"))
                    .await
                {
                    error!(request_id = %request.id, "Could not record failure: {store_err}");
                }
            } else {
                info!(request_id = %request.id, "Completed analytics request");
            }

            self.inner.processing.write().await.remove(&request.id);
        }

        if let Err(err) = self
            .inner
            .store
            .cleanup_snapshots(self.inner.config.retention_days)
            .await
        {
            warn!("Snapshot cleanup failed: {err}");
        }

        Ok(())
    }

    /// Execute one request to a terminal state. Per-repository failures are
    /// collected into the report and the request still completes; an error
    /// returned from here flips the whole request to Failed.
    async fn process_request(&self, request: &AnalyticsRequest) -> Result<()> {
        let store = &self.inner.store;
        let current = store
            .get_request(&request.id)
            .await?
            .with_context(|| format!("request {} no longer exists", request.id))?;

        store.mark_running(&current.id).await?;

        let mut progress = ProgressInfo {
            total_repos: current.repository_ids.len(),
            completed_repos: 0,
            current_repo: None,
        };
        let mut result_files = Vec::new();
        let mut reports: Vec<RepoReport> = Vec::new();
        let date_stamp = Utc::now().format("%Y-%m-%d").to_string();

        for (index, repo_id) in current.repository_ids.iter().enumerate() {
            progress.completed_repos = index;

            let Some(repo) = store.get_repository(repo_id).await? else {
                warn!(request_id = %current.id, repo_id = %repo_id, "Repository not found; skipping");
                reports.push(RepoReport {
                    repository_id: repo_id.clone(),
                    repository_name: None,
                    succeeded: false,
                    error: Some("repository not found".to_string()),
                    artifacts: Vec::new(),
                });
                continue;
            };

            progress.current_repo = Some(repo.name.clone());
            store.update_progress(&current.id, &progress).await?;

            info!(
                request_id = %current.id,
                project = %current.project_name,
                repository = %repo.name,
                "Processing analytics for repository"
            );

            match self.process_repository(&current, &repo, &date_stamp).await {
                Ok(artifacts) => {
                    result_files.extend(artifacts.iter().cloned());
                    reports.push(RepoReport {
                        repository_id: repo.id.clone(),
                        repository_name: Some(repo.name.clone()),
                        succeeded: true,
                        error: None,
                        artifacts,
                    });
                }
                Err(err) => {
                    error!(
                        request_id = %current.id,
                        repository = %repo.name,
                        "Error processing repository: {err:#}"
                    );
                    reports.push(RepoReport {
                        repository_id: repo.id.clone(),
                        repository_name: Some(repo.name.clone()),
                        succeeded: false,
                        error: Some(format!("{err:#}")),
                        artifacts: Vec::new(),
                    });
                }
            }
        }

        progress.completed_repos = current.repository_ids.len();
        progress.current_repo = None;
        store
            .complete_request(&current.id, &progress, &result_files)
            .await?;

        let failed = reports.iter().filter(|r| !r.succeeded).count();
        info!(
            request_id = %current.id,
            succeeded = reports.len() - failed,
            failed,
            artifacts = result_files.len(),
            "Analytics request finished"
        );

        Ok(())
    }

    async fn process_repository(
        &self,
        request: &AnalyticsRequest,
        repo: &crate::models::Repository,
        date_stamp: &str,
    ) -> Result<Vec<String>> {
        let store = &self.inner.store;
        let (fresh, _summary) = ingest::sync_repository(
            self.inner.client.as_ref(),
            store,
            &request.project_name,
            repo,
            self.inner.config.page_size,
        )
        .await?;

        let commits = store.get_commits(&fresh.id, None).await?;
        let branches = store.list_branches(&fresh.id).await?;
        let pull_requests = store.list_pull_requests(&fresh.id).await?;

        let snapshot = analytics::analyze(&fresh, &commits, &branches, &pull_requests);
        store.insert_snapshot(&snapshot).await?;

        let artifacts = artifact::write_repo_artifacts(
            &self.inner.config.output_root,
            &request.id,
            &request.project_name,
            &fresh,
            &snapshot,
            date_stamp,
        )
        .await?;

        Ok(artifacts)
    }

    /// Sleep in one-second steps so a stop signal is honored promptly.
    async fn idle_sleep(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && self.is_running() {
            let step = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }
}
