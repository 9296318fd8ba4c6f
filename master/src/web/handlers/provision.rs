//! Provisioning and credential endpoints. Credential payloads are accepted
//! on create and never echoed back.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use ngoogle_common::model::{Credential, ProvisionJob};
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::provision::{CredentialRequest, JobRequest};
use crate::web::AppState;

pub async fn start(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<(StatusCode, Json<ProvisionJob>), ApiError> {
    let job = state.provision.start(req).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<ProvisionJob>>, ApiError> {
    Ok(Json(state.provision.list().await?))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ProvisionJob>, ApiError> {
    Ok(Json(state.provision.get(&job_id).await?))
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ProvisionJob>, ApiError> {
    Ok(Json(state.provision.retry(&job_id).await?))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.provision.delete(&job_id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

pub async fn create_credential(
    State(state): State<AppState>,
    Json(req): Json<CredentialRequest>,
) -> Result<(StatusCode, Json<Credential>), ApiError> {
    // Credential serialization skips the payload field.
    let cred = state.provision.create_credential(req).await?;
    Ok((StatusCode::CREATED, Json(cred)))
}

pub async fn list_credentials(
    State(state): State<AppState>,
) -> Result<Json<Vec<Credential>>, ApiError> {
    Ok(Json(state.provision.list_credentials().await?))
}

pub async fn delete_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.provision.delete_credential(&id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}
