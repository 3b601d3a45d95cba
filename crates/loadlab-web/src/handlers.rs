use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use loadlab_core::actions::{CpuStress, DiskStorm, LoadAction, MemorySurge, TrafficFlood};
use loadlab_core::error::SupervisorError;
use loadlab_core::models::ActionType;

use crate::api::ApiServer;

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthStatus {
        status: "healthy",
        timestamp: Utc::now(),
    })
}

pub async fn metrics(State(api): State<ApiServer>) -> impl IntoResponse {
    Json(api.metrics.current())
}

/// Sink endpoint; the default traffic-flood target points here.
pub async fn dummy() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct CpuStressRequest {
    target_percent: u32,
    duration_seconds: u64,
}

#[derive(Deserialize)]
pub struct MemorySurgeRequest {
    size_mb: u64,
    duration_seconds: u64,
}

#[derive(Deserialize)]
pub struct DiskStormRequest {
    operations: u32,
    file_size_kb: u32,
}

#[derive(Deserialize)]
pub struct TrafficFloodRequest {
    requests_per_sec: u32,
    duration_seconds: u64,
    #[serde(default)]
    target_url: Option<String>,
}

#[derive(Serialize)]
struct ActionResponse {
    id: String,
    status: String,
    started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn start_action(
    api: &ApiServer,
    action_type: ActionType,
    instance: Arc<dyn LoadAction>,
    message: &str,
) -> Response {
    match api.supervisor.start(action_type, instance).await {
        Ok(action) => (
            StatusCode::CREATED,
            Json(ActionResponse {
                id: action.id,
                status: action.status.as_str().to_string(),
                started_at: action.started_at,
                message: Some(message.to_string()),
            }),
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub async fn start_cpu_stress(
    State(api): State<ApiServer>,
    Json(req): Json<CpuStressRequest>,
) -> Response {
    let action = match CpuStress::new(req.target_percent, req.duration_seconds) {
        Ok(action) => action,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    start_action(
        &api,
        ActionType::CpuStress,
        Arc::new(action),
        "CPU stress action started",
    )
    .await
}

pub async fn start_memory_surge(
    State(api): State<ApiServer>,
    Json(req): Json<MemorySurgeRequest>,
) -> Response {
    let action = match MemorySurge::new(req.size_mb, req.duration_seconds) {
        Ok(action) => action,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    start_action(
        &api,
        ActionType::MemorySurge,
        Arc::new(action),
        "Memory surge action started",
    )
    .await
}

pub async fn start_disk_storm(
    State(api): State<ApiServer>,
    Json(req): Json<DiskStormRequest>,
) -> Response {
    let action = match DiskStorm::new(req.operations, req.file_size_kb) {
        Ok(action) => action,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    start_action(
        &api,
        ActionType::DiskStorm,
        Arc::new(action),
        "Disk storm action started",
    )
    .await
}

pub async fn start_traffic_flood(
    State(api): State<ApiServer>,
    Json(req): Json<TrafficFloodRequest>,
) -> Response {
    let action = match TrafficFlood::new(req.requests_per_sec, req.duration_seconds, req.target_url)
    {
        Ok(action) => action,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    start_action(
        &api,
        ActionType::TrafficFlood,
        Arc::new(action),
        "Traffic flood action started",
    )
    .await
}

pub async fn active_actions(State(api): State<ApiServer>) -> impl IntoResponse {
    let actions = api.supervisor.active().await;
    let count = actions.len();
    Json(json!({ "actions": actions, "count": count }))
}

pub async fn stop_action(State(api): State<ApiServer>, Path(id): Path<String>) -> Response {
    match api.supervisor.stop(&id).await {
        Ok(()) => Json(json!({
            "status": "stopped",
            "message": "Action stopped successfully",
        }))
        .into_response(),
        Err(err @ SupervisorError::ActionNotFound) => {
            (StatusCode::NOT_FOUND, err.to_string()).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
