//! API error type and its HTTP mapping.
//!
//! Services return `ApiError` for caller mistakes and pass everything else
//! through as `Internal`; the web layer renders all of them as
//! `{"error": "<msg>"}` bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing field, bad enum value, illegal state transition.
    #[error("{0}")]
    Validation(String),

    /// Entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Token mismatch on heartbeat.
    #[error("invalid token")]
    Unauthorized,

    /// Duplicate IP or an in-progress job for the same host.
    #[error("{0}")]
    Conflict(String),

    /// Storage or other unexpected failure.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
