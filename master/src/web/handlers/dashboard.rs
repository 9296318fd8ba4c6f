//! Dashboard, health and metrics endpoints.

use std::collections::HashMap;
use std::fmt::Write as _;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use ngoogle_common::model::{AgentStatus, BandwidthPoint, TaskStatus};
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::services::dashboard::Overview;
use crate::web::AppState;

use super::{parse_step, parse_time};

pub async fn overview(State(state): State<AppState>) -> Result<Json<Overview>, ApiError> {
    Ok(Json(state.dashboard.overview().await?))
}

pub async fn bandwidth_history(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Vec<BandwidthPoint>>, ApiError> {
    let from = parse_time(
        query.get("from").map(String::as_str),
        Utc::now() - chrono::Duration::days(7),
    );
    let to = parse_time(query.get("to").map(String::as_str), Utc::now());
    let step = parse_step(query.get("step").map(String::as_str));
    Ok(Json(state.dashboard.bandwidth_history(from, to, step).await?))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Prometheus text exposition of the fleet gauges.
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let online = match state.store.list_agents().await {
        Ok(agents) => agents
            .iter()
            .filter(|a| a.status == AgentStatus::Online)
            .count(),
        Err(_) => 0,
    };
    let running = match state.store.list_tasks().await {
        Ok(tasks) => tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count(),
        Err(_) => 0,
    };

    let mut body = String::new();
    let _ = writeln!(body, "# HELP ngoogle_agents_online Number of online agents");
    let _ = writeln!(body, "# TYPE ngoogle_agents_online gauge");
    let _ = writeln!(body, "ngoogle_agents_online {online}");
    let _ = writeln!(body, "# HELP ngoogle_tasks_running Number of running tasks");
    let _ = writeln!(body, "# TYPE ngoogle_tasks_running gauge");
    let _ = writeln!(body, "ngoogle_tasks_running {running}");

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
