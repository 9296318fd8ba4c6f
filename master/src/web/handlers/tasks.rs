//! Task endpoints.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use ngoogle_common::model::{Task, TaskMetrics};
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::services::tasks::CreateTaskRequest;
use crate::web::AppState;

use super::parse_time;

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = state.tasks.create(req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.tasks.list().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.get(&id).await?))
}

pub async fn dispatch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.tasks.dispatch(&id).await?;
    Ok(Json(json!({ "status": "dispatched" })))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.tasks.stop(&id).await?;
    Ok(Json(json!({ "status": "stopped" })))
}

pub async fn report_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut m): Json<TaskMetrics>,
) -> Result<Json<Value>, ApiError> {
    m.task_id = id;
    state.tasks.record_metrics(m).await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn get_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Vec<TaskMetrics>>, ApiError> {
    let from = parse_time(
        query.get("from").map(String::as_str),
        Utc::now() - chrono::Duration::hours(1),
    );
    let to = parse_time(query.get("to").map(String::as_str), Utc::now());
    Ok(Json(state.tasks.metrics(&id, from, to).await?))
}

pub async fn pull(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.tasks.pull_tasks(&agent_id).await?))
}
