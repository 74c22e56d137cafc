use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use repo_analytics_api::{
    api::{self, AppState},
    artifact,
    client::HttpSourceClient,
    config::{load_seed_file, Config},
    models::{Organization, Project},
    store::Store,
    worker::{PollingWorker, WorkerConfig},
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repo_analytics_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.api_key_is_fallback {
        warn!("No API key configured; requests must use the generated fallback key");
    }

    artifact::ensure_output_root(&config.output_root).await?;

    let store = Store::connect(&config.database_url).await?;
    seed_store(&store, &config).await?;

    let client = Arc::new(HttpSourceClient::new(config.remote.clone())?);
    let worker = PollingWorker::new(store.clone(), client, WorkerConfig::from_config(&config));
    worker.start();

    let state = AppState {
        config: config.clone(),
        store,
        worker: worker.clone(),
    };

    let app = Router::new()
        .route("/healthz", get(api::healthz))
        .route(
            "/v1/requests",
            post(api::create_request).get(api::list_requests),
        )
        .route("/v1/requests/{request_id}", get(api::get_request))
        .route("/v1/worker", get(api::worker_status))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("repo-analytics-api listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.stop(SHUTDOWN_TIMEOUT).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {err}");
    }
}

async fn seed_store(store: &Store, config: &Config) -> Result<()> {
    let Some(path) = &config.seed_file else {
        return Ok(());
    };

    let seed = load_seed_file(path)?;
    store
        .upsert_organization(&Organization {
            name: seed.organization.name.clone(),
            url: seed.organization.url.clone(),
            description: seed.organization.description.clone(),
        })
        .await?;

    for project in &seed.projects {
        store
            .upsert_project(&Project {
                id: project.id.clone(),
                name: project.name.clone(),
                state: project.state.clone(),
                visibility: project.visibility.clone(),
                organization: seed.organization.name.clone(),
            })
            .await?;
    }

    info!(
        organization = %seed.organization.name,
        projects = seed.projects.len(),
        "Seeded containment hierarchy"
    );
    Ok(())
}
