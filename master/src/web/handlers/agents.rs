//! Agent registry endpoints.

use axum::extract::{Path, State};
use axum::Json;
use ngoogle_common::model::Agent;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    pub token: String,
    #[serde(default)]
    pub rate_mbps: f64,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state
        .agents
        .register(&req.hostname, &req.ip, req.port, &req.version)
        .await?;
    Ok(Json(agent))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .agents
        .heartbeat(&req.agent_id, &req.token, req.rate_mbps)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Agent>>, ApiError> {
    Ok(Json(state.agents.list().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Agent>, ApiError> {
    Ok(Json(state.agents.get(&id).await?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.agents.delete(&id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}
