use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::models::{Branch, ChangeCounts, Commit, PullRequest, Repository, Reviewer};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("rate limited by remote API")]
    RateLimited,

    #[error("transient error: {0}")]
    Transient(String),

    #[error("request failed with status {0}")]
    Status(StatusCode),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Boundary to the remote source-control REST API. The worker and ingestion
/// layer only ever see this trait, so tests substitute fakes.
#[async_trait]
pub trait SourceControlClient: Send + Sync {
    async fn get_repositories(&self, project: &str) -> Result<Vec<Repository>>;

    async fn get_commits(
        &self,
        project: &str,
        repository: &str,
        branch: Option<&str>,
        top: usize,
        skip: usize,
    ) -> Result<Vec<Commit>>;

    async fn get_branches(&self, project: &str, repository: &str) -> Result<Vec<Branch>>;

    async fn get_pull_requests(
        &self,
        project: &str,
        repository: &str,
        status: &str,
        top: usize,
        skip: usize,
    ) -> Result<Vec<PullRequest>>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub rate_limit_delay: Duration,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            rate_limit_delay: config.rate_limit_delay,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Run `op` under the retry policy. A 429 consumes an attempt and pauses for
/// the fixed pacing delay scaled by the attempt number; a transient failure
/// backs off exponentially before the next attempt; anything else fails
/// immediately. The error of the final attempt is surfaced on exhaustion.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last = ClientError::Transient("no attempts made".to_string());

    for attempt in 0..policy.attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(ClientError::RateLimited) => {
                warn!(attempt = attempt + 1, "Rate limited; pausing before retry");
                last = ClientError::RateLimited;
                tokio::time::sleep(policy.rate_limit_delay * (attempt + 1)).await;
            }
            Err(err @ ClientError::Transient(_)) => {
                warn!(attempt = attempt + 1, "Request attempt failed: {err}");
                last = err;
                if attempt + 1 < policy.attempts {
                    tokio::time::sleep(policy.backoff_base * (1u32 << attempt)).await;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last)
}

/// Lazy page-by-page fetch: requests `page_size` items at increasing offsets
/// and terminates on the first short or empty page. Restartable from scratch,
/// not resumable mid-stream.
pub fn paginate<T, F, Fut>(page_size: usize, fetch_page: F) -> impl Stream<Item = Result<T>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    stream::try_unfold(
        (fetch_page, 0usize, false),
        move |(mut fetch, skip, done)| async move {
            if done {
                return Ok(None);
            }
            let page = fetch(page_size, skip).await?;
            if page.is_empty() {
                return Ok(None);
            }
            let done = page.len() < page_size;
            let items = stream::iter(page.into_iter().map(Ok::<T, ClientError>));
            Ok(Some((items, (fetch, skip + page_size, done))))
        },
    )
    .try_flatten()
}

pub fn fetch_all_commits<'a, C>(
    client: &'a C,
    project: &'a str,
    repository: &'a str,
    branch: Option<&'a str>,
    page_size: usize,
) -> impl Stream<Item = Result<Commit>> + 'a
where
    C: SourceControlClient + ?Sized,
{
    paginate(page_size, move |top, skip| {
        client.get_commits(project, repository, branch, top, skip)
    })
}

pub fn fetch_all_pull_requests<'a, C>(
    client: &'a C,
    project: &'a str,
    repository: &'a str,
    status: &'a str,
    page_size: usize,
) -> impl Stream<Item = Result<PullRequest>> + 'a
where
    C: SourceControlClient + ?Sized,
{
    paginate(page_size, move |top, skip| {
        client.get_pull_requests(project, repository, status, top, skip)
    })
}

/// HTTP implementation against an Azure-DevOps-style REST surface.
#[derive(Debug, Clone)]
pub struct HttpSourceClient {
    http: reqwest::Client,
    config: RemoteConfig,
    policy: RetryPolicy,
}

const API_VERSION: &str = "6.0";

impl HttpSourceClient {
    pub fn new(config: RemoteConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let policy = RetryPolicy::from_config(&config);
        Ok(Self {
            http,
            config,
            policy,
        })
    }

    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        with_retries(&self.policy, |_attempt| self.send_once(url, params)).await
    }

    async fn send_once(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        debug!(url, "Making request to remote API");
        let response = self
            .http
            .get(url)
            .basic_auth("", Some(&self.config.access_token))
            .query(params)
            .send()
            .await
            .map_err(|err| ClientError::Transient(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ClientError::Transient(format!("server error {status}")));
        }
        if !status.is_success() {
            return Err(ClientError::Status(status));
        }

        let value = response
            .json::<Value>()
            .await
            .map_err(|err| ClientError::Decode(err.to_string()))?;

        // Pace every successful call so bursts stay under the remote limit.
        tokio::time::sleep(self.config.rate_limit_delay).await;
        Ok(value)
    }

    fn repo_url(&self, project: &str, repository: &str, tail: &str) -> String {
        format!(
            "{}/{}/_apis/git/repositories/{}/{}",
            self.config.base_url, project, repository, tail
        )
    }
}

#[async_trait]
impl SourceControlClient for HttpSourceClient {
    async fn get_repositories(&self, project: &str) -> Result<Vec<Repository>> {
        let url = format!("{}/{}/_apis/git/repositories", self.config.base_url, project);
        let params = [("api-version", API_VERSION.to_string())];
        let value = self.get_json(&url, &params).await?;
        let page: PagedResponse<WireRepository> = decode(value)?;
        Ok(page
            .value
            .into_iter()
            .map(|repo| repo.into_domain(project))
            .collect())
    }

    async fn get_commits(
        &self,
        project: &str,
        repository: &str,
        branch: Option<&str>,
        top: usize,
        skip: usize,
    ) -> Result<Vec<Commit>> {
        let url = self.repo_url(project, repository, "commits");
        let mut params = vec![
            ("api-version", API_VERSION.to_string()),
            ("$top", top.to_string()),
            ("$skip", skip.to_string()),
        ];
        if let Some(branch) = branch {
            params.push(("searchCriteria.itemVersion.version", branch.to_string()));
        }
        let value = self.get_json(&url, &params).await?;
        let page: PagedResponse<WireCommit> = decode(value)?;
        Ok(page.value.into_iter().map(WireCommit::into_domain).collect())
    }

    async fn get_branches(&self, project: &str, repository: &str) -> Result<Vec<Branch>> {
        let url = self.repo_url(project, repository, "refs");
        let params = [
            ("api-version", API_VERSION.to_string()),
            ("filter", "heads/".to_string()),
        ];
        let value = self.get_json(&url, &params).await?;
        let page: PagedResponse<WireRef> = decode(value)?;
        Ok(page.value.into_iter().map(WireRef::into_domain).collect())
    }

    async fn get_pull_requests(
        &self,
        project: &str,
        repository: &str,
        status: &str,
        top: usize,
        skip: usize,
    ) -> Result<Vec<PullRequest>> {
        let url = self.repo_url(project, repository, "pullrequests");
        let params = [
            ("api-version", API_VERSION.to_string()),
            ("searchCriteria.status", status.to_string()),
            ("$top", top.to_string()),
            ("$skip", skip.to_string()),
        ];
        let value = self.get_json(&url, &params).await?;
        let page: PagedResponse<WirePullRequest> = decode(value)?;
        Ok(page
            .value
            .into_iter()
            .map(WirePullRequest::into_domain)
            .collect())
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| ClientError::Decode(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct PagedResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRepository {
    id: String,
    name: String,
    web_url: String,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    is_fork: bool,
}

impl WireRepository {
    fn into_domain(self, project: &str) -> Repository {
        Repository {
            id: self.id,
            name: self.name,
            project: project.to_string(),
            url: self.web_url,
            default_branch: self
                .default_branch
                .unwrap_or_else(|| "refs/heads/main".to_string()),
            size: self.size,
            is_fork: self.is_fork,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireIdentity {
    name: String,
    email: String,
    date: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct WireChangeCounts {
    #[serde(rename = "Add", default)]
    add: i64,
    #[serde(rename = "Edit", default)]
    edit: i64,
    #[serde(rename = "Delete", default)]
    delete: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParent {
    commit_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCommit {
    commit_id: String,
    author: WireIdentity,
    committer: WireIdentity,
    comment: String,
    #[serde(default)]
    change_counts: Option<WireChangeCounts>,
    #[serde(default = "Vec::new")]
    parents: Vec<WireParent>,
    url: String,
}

impl WireCommit {
    fn into_domain(self) -> Commit {
        let counts = self.change_counts.unwrap_or_default();
        Commit {
            commit_id: self.commit_id,
            author_name: self.author.name,
            author_email: self.author.email,
            author_date: self.author.date,
            committer_name: self.committer.name,
            committer_email: self.committer.email,
            committer_date: self.committer.date,
            message: self.comment,
            change_counts: ChangeCounts {
                added: counts.add,
                edited: counts.edit,
                deleted: counts.delete,
            },
            parents: self.parents.into_iter().map(|p| p.commit_id).collect(),
            url: self.url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCreator {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRef {
    name: String,
    object_id: String,
    #[serde(default)]
    creator: Option<WireCreator>,
    url: String,
}

impl WireRef {
    fn into_domain(self) -> Branch {
        let name = self
            .name
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.name)
            .to_string();
        Branch {
            name,
            object_id: self.object_id,
            creator: self.creator.and_then(|c| c.display_name),
            url: self.url,
            is_default: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReviewer {
    display_name: String,
    #[serde(default)]
    vote: i32,
    #[serde(default)]
    is_required: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePullRequest {
    pull_request_id: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    source_ref_name: String,
    target_ref_name: String,
    created_by: WireCreator,
    creation_date: DateTime<Utc>,
    #[serde(default)]
    closed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    completion_queue_time: Option<DateTime<Utc>>,
    status: String,
    #[serde(default)]
    merge_status: Option<String>,
    #[serde(default = "Vec::new")]
    reviewers: Vec<WireReviewer>,
    url: String,
}

impl WirePullRequest {
    fn into_domain(self) -> PullRequest {
        PullRequest {
            pull_request_id: self.pull_request_id,
            title: self.title,
            description: self.description.unwrap_or_default(),
            source_branch: self.source_ref_name,
            target_branch: self.target_ref_name,
            author: self.created_by.display_name.unwrap_or_default(),
            created_date: self.creation_date,
            closed_date: self.closed_date,
            completed_date: self.completion_queue_time,
            status: self.status,
            merge_status: self.merge_status.unwrap_or_default(),
            reviewers: self
                .reviewers
                .into_iter()
                .map(|r| Reviewer {
                    name: r.display_name,
                    vote: r.vote,
                    is_required: r.is_required,
                })
                .collect(),
            url: self.url,
        }
    }
}
