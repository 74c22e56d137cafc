use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::{
    auth::verify_bearer,
    config::Config,
    models::{CreateRequestPayload, RequestStatus},
    store::Store,
    worker::PollingWorker,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub worker: PollingWorker,
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

pub async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRequestPayload>,
) -> impl IntoResponse {
    if let Err(err) = verify_bearer(&headers, &state.config.api_key) {
        return err.into_response();
    }

    if payload.project_name.trim().is_empty() || payload.repository_ids.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": "INVALID_REQUEST",
                    "message": "Request must include a project name and at least one repository id."
                }
            })),
        )
            .into_response();
    }

    match state
        .store
        .create_request(&payload.project_name, &payload.repository_ids)
        .await
    {
        Ok(request) => (StatusCode::ACCEPTED, Json(request.to_response())).into_response(),
        Err(err) => {
            error!("Failed to create analytics request: {err}");
            internal_error("Failed to create analytics request.")
        }
    }
}

pub async fn get_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    if let Err(err) = verify_bearer(&headers, &state.config.api_key) {
        return err.into_response();
    }

    match state.store.get_request(&request_id).await {
        Ok(Some(request)) => (StatusCode::OK, Json(request.to_response())).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "code": "REQUEST_NOT_FOUND",
                    "message": "Analytics request not found."
                }
            })),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to load analytics request: {err}");
            internal_error("Failed to load analytics request.")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

pub async fn list_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    if let Err(err) = verify_bearer(&headers, &state.config.api_key) {
        return err.into_response();
    }

    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<RequestStatus>() {
            Ok(status) => Some(status),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": {
                            "code": "INVALID_STATUS",
                            "message": format!("Unknown status filter: {raw}")
                        }
                    })),
                )
                    .into_response();
            }
        },
    };

    match state.store.list_requests(status).await {
        Ok(requests) => {
            let items: Vec<_> = requests.iter().map(|r| r.to_response()).collect();
            (StatusCode::OK, Json(json!({ "requests": items }))).into_response()
        }
        Err(err) => {
            error!("Failed to list analytics requests: {err}");
            internal_error("Failed to list analytics requests.")
        }
    }
}

pub async fn worker_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(err) = verify_bearer(&headers, &state.config.api_key) {
        return err.into_response();
    }

    (StatusCode::OK, Json(state.worker.status().await)).into_response()
}

fn internal_error(message: &str) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": {
                "code": "INTERNAL_ERROR",
                "message": message
            }
        })),
    )
        .into_response()
}
