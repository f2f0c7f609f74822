use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use super::models::ErrorResponse;
use crate::orchestrator::OrchestratorError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request invalid: {0}")]
    InvalidRequest(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("idempotency key conflict: {0}")]
    IdempotencyConflict(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::IdempotencyConflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(json!(body))).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidRequest(value.to_string())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(value: OrchestratorError) -> Self {
        match value {
            OrchestratorError::InvalidBatchSize { .. }
            | OrchestratorError::DuplicateProviderId(_) => {
                ApiError::InvalidRequest(value.to_string())
            }
            OrchestratorError::IdempotencyConflict { key } => ApiError::IdempotencyConflict(key),
            OrchestratorError::JobNotFound(id) => ApiError::NotFound(format!("job {id}")),
            OrchestratorError::ProviderNotFound {
                job_id,
                provider_id,
            } => ApiError::NotFound(format!("provider {provider_id} in job {job_id}")),
            OrchestratorError::Store(err) => ApiError::Internal(err.to_string()),
        }
    }
}
