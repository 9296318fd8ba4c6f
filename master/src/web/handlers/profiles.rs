//! Traffic profile endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use ngoogle_common::model::{Distribution, TrafficProfile};
use serde::Deserialize;

use crate::errors::ApiError;
use crate::services::generate_id;
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub distribution: Option<Distribution>,
    /// JSON array of `{offset_sec, rate_pct}` breakpoints.
    #[serde(default)]
    pub points: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<TrafficProfile>), ApiError> {
    let profile = TrafficProfile {
        id: generate_id(),
        name: req.name,
        description: req.description,
        distribution: req.distribution.unwrap_or(Distribution::Flat),
        points: if req.points.is_empty() {
            "[]".to_string()
        } else {
            req.points
        },
        created_at: Utc::now(),
    };
    state.store.create_profile(&profile).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<TrafficProfile>>, ApiError> {
    Ok(Json(state.store.list_profiles().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TrafficProfile>, ApiError> {
    state
        .store
        .get_profile(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("traffic profile {id}")))
}
