//! API error type: maps domain failures onto HTTP statuses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use weft::{StepError, StoreError};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Internal(m) => m.clone(),
            ApiError::Unauthorized => "unauthorized".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("api error: {}", self.message());
        }
        (status, Json(serde_json::json!({"error": self.message()}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => {
                ApiError::NotFound(format!("conversation not found: {}", path.display()))
            }
            StoreError::UnknownBranch(name) => ApiError::NotFound(format!("unknown branch {name}")),
            StoreError::Locked { path } => {
                ApiError::Conflict(format!("log is locked: {}", path.display()))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StepError> for ApiError {
    fn from(e: StepError) -> Self {
        match e {
            StepError::Busy => ApiError::Conflict("generation already in progress".to_string()),
            StepError::UnknownTool(id) => ApiError::NotFound(format!("no pending tool {id}")),
            StepError::Store(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<config::LoadError> for ApiError {
    fn from(e: config::LoadError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
