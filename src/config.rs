use std::{env, fs, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub api_key: String,
    pub api_key_is_fallback: bool,
    pub database_url: String,
    pub output_root: PathBuf,
    pub poll_interval: Duration,
    pub stale_after: Duration,
    pub retention_days: i64,
    pub seed_file: Option<PathBuf>,
    pub remote: RemoteConfig,
}

/// Knobs governing the source-control REST client.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub organization: String,
    pub access_token: String,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub rate_limit_delay: Duration,
    pub page_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_raw =
            env::var("REPO_ANALYTICS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_addr = bind_raw
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let (api_key, api_key_is_fallback) = resolve_api_key();

        let database_url = env::var("REPO_ANALYTICS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://analytics.db?mode=rwc".to_string());

        let output_root = PathBuf::from(
            env::var("REPO_ANALYTICS_OUTPUT_ROOT").unwrap_or_else(|_| "output".to_string()),
        );

        let poll_interval = Duration::from_secs(parse_env("REPO_ANALYTICS_POLL_INTERVAL_SECS", 10));
        let stale_after = Duration::from_secs(parse_env("REPO_ANALYTICS_STALE_AFTER_SECS", 300));
        let retention_days = parse_env("REPO_ANALYTICS_RETENTION_DAYS", 90i64);

        let seed_file = env::var("REPO_ANALYTICS_SEED_FILE").ok().map(PathBuf::from);

        let remote = RemoteConfig {
            base_url: env::var("REPO_ANALYTICS_REMOTE_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            organization: env::var("REPO_ANALYTICS_ORGANIZATION").unwrap_or_default(),
            access_token: env::var("REPO_ANALYTICS_ACCESS_TOKEN").unwrap_or_default(),
            request_timeout: Duration::from_secs(parse_env(
                "REPO_ANALYTICS_REQUEST_TIMEOUT_SECS",
                30,
            )),
            retry_attempts: parse_env("REPO_ANALYTICS_RETRY_ATTEMPTS", 3u32),
            rate_limit_delay: Duration::from_secs(parse_env(
                "REPO_ANALYTICS_RATE_LIMIT_DELAY_SECS",
                1,
            )),
            page_size: parse_env("REPO_ANALYTICS_PAGE_SIZE", 100usize),
        };

        Ok(Self {
            bind_addr,
            api_key,
            api_key_is_fallback,
            database_url,
            output_root,
            poll_interval,
            stale_after,
            retention_days,
            seed_file,
            remote,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn resolve_api_key() -> (String, bool) {
    if let Ok(value) = env::var("REPO_ANALYTICS_API_KEY") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return (trimmed.to_string(), false);
        }
    }

    if let Ok(key_file) = env::var("REPO_ANALYTICS_API_KEY_FILE") {
        match fs::read_to_string(&key_file) {
            Ok(raw) => {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return (trimmed.to_string(), false);
                }
                eprintln!(
                    "[repo-analytics-api] REPO_ANALYTICS_API_KEY_FILE is empty: {}. Falling back to generated key.",
                    key_file
                );
            }
            Err(err) => {
                eprintln!(
                    "[repo-analytics-api] Failed reading REPO_ANALYTICS_API_KEY_FILE at {}: {}. Falling back to generated key.",
                    key_file, err
                );
            }
        }
    } else {
        eprintln!(
            "[repo-analytics-api] REPO_ANALYTICS_API_KEY not set. Falling back to generated key."
        );
    }

    let generated = format!("fallback-{}", Uuid::new_v4());
    (generated, true)
}

/// Static containment hierarchy seeded into the store at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedFile {
    pub organization: SeedOrganization,
    #[serde(default)]
    pub projects: Vec<SeedProject>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedOrganization {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedProject {
    pub id: String,
    pub name: String,
    #[serde(default = "default_project_state")]
    pub state: String,
    #[serde(default = "default_project_visibility")]
    pub visibility: String,
}

fn default_project_state() -> String {
    "wellFormed".to_string()
}

fn default_project_visibility() -> String {
    "private".to_string()
}

pub fn load_seed_file(path: &std::path::Path) -> Result<SeedFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse seed file at {}", path.display()))
}
