use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
};
use http_body_util::BodyExt;
use serde_json::json;

use super::{
    csv,
    models::{
        BatchValidationRequest, BatchValidationResponse, CancelResponse, HealthResponse,
        JobStatusResponse, RateLimitsResponse,
    },
    state::AppState,
};
use crate::api::error::ApiError;
use crate::model::{JobPriority, ValidationOptions};
use crate::orchestrator::BatchSubmission;

const IDEMPOTENCY_HEADER: &str = "X-Provcheck-Idempotency-Key";

/// Batch submission endpoint (POST /api/validate/batch)
///
/// Accepts a JSON batch of provider records plus validation options,
/// binds it to an idempotency key (body field, header, or content-derived),
/// and fans out one worker task per (provider, enabled source).
///
/// Replaying the same key with the same content returns the original job
/// with 202; the same key with different content is a 409 conflict.
pub async fn submit_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidRequest("missing Content-Type header".into()))?;
    super::utils::parse_json_content_type(content_type)?;

    let body_bytes = read_body(body, state.config.server.api.max_payload_bytes).await?;
    let request: BatchValidationRequest = serde_json::from_slice(&body_bytes)?;

    let idempotency_key = request
        .idempotency_key
        .clone()
        .or_else(|| header_value(&headers, IDEMPOTENCY_HEADER));

    let outcome = state
        .orchestrator
        .submit_batch(BatchSubmission {
            providers: request.provider_data,
            options: request.validation_options,
            idempotency_key,
            priority: request.priority,
        })
        .await?;

    let response = BatchValidationResponse {
        job_id: outcome.job_id,
        status: outcome.status,
        provider_count: outcome.provider_count,
        created_at: outcome.created_at,
    };

    Ok((axum::http::StatusCode::ACCEPTED, Json(response)))
}

/// CSV submission endpoint (POST /api/validate/csv)
///
/// The body is raw CSV with the fixed column mapping; validation options
/// arrive as query parameters and the idempotency key via the
/// X-Provcheck-Idempotency-Key header.
pub async fn submit_csv(
    State(state): State<AppState>,
    Query(options): Query<ValidationOptions>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidRequest("missing Content-Type header".into()))?;
    super::utils::parse_csv_content_type(content_type)?;

    let body_bytes = read_body(body, state.config.server.api.max_payload_bytes).await?;
    let providers =
        csv::parse_providers(&body_bytes).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    let outcome = state
        .orchestrator
        .submit_batch(BatchSubmission {
            providers,
            options,
            idempotency_key: header_value(&headers, IDEMPOTENCY_HEADER),
            priority: JobPriority::Normal,
        })
        .await?;

    let response = BatchValidationResponse {
        job_id: outcome.job_id,
        status: outcome.status,
        provider_count: outcome.provider_count,
        created_at: outcome.created_at,
    };

    Ok((axum::http::StatusCode::ACCEPTED, Json(response)))
}

/// Job status endpoint (GET /api/validate/job/{job_id}/status)
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.status(&job_id)?;
    Ok((
        axum::http::StatusCode::OK,
        Json(JobStatusResponse::from(job)),
    ))
}

/// Provider report endpoint (GET /api/validate/job/{job_id}/report/{provider_id})
///
/// Returns the fused report once the provider's tasks are terminal, and a
/// provisional report with `validation_status = pending` before that.
pub async fn get_report(
    State(state): State<AppState>,
    Path((job_id, provider_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.orchestrator.report(&job_id, &provider_id)?;
    Ok((axum::http::StatusCode::OK, Json(report)))
}

/// All terminal reports for one job (GET /api/validate/job/{job_id}/reports)
pub async fn get_all_reports(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.status(&job_id)?;
    let reports = state
        .store
        .reports_for_job(&job_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        axum::http::StatusCode::OK,
        Json(json!({
            "job_id": job.job_id,
            "status": job.status,
            "provider_count": job.provider_count,
            "reports": reports,
        })),
    ))
}

/// Cancellation endpoint (DELETE /api/validate/job/{job_id})
///
/// Idempotent: cancelling a terminal job acknowledges its current state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.cancel(&job_id).await?;
    let response = CancelResponse {
        job_id: job.job_id,
        status: job.status,
    };
    Ok((axum::http::StatusCode::OK, Json(response)))
}

/// Limiter usage per source (GET /api/validate/rate-limits)
pub async fn get_rate_limits(State(state): State<AppState>) -> impl IntoResponse {
    let response = RateLimitsResponse {
        rate_limits: state.limiter.status_all(),
        timestamp: chrono::Utc::now(),
    };
    (axum::http::StatusCode::OK, Json(response))
}

/// Operational counters and queue depths (GET /api/validate/metrics)
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let depths: std::collections::BTreeMap<String, usize> = state
        .queues
        .depths()
        .into_iter()
        .map(|(kind, depth)| (kind.to_string(), depth))
        .collect();

    (
        axum::http::StatusCode::OK,
        Json(json!({
            "counters": state.metrics.snapshot(),
            "queue_depths": depths,
            "timestamp": chrono::Utc::now().timestamp(),
        })),
    )
}

/// Health check endpoint (GET /health)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let store_status = match state.store.list_jobs() {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    components.insert("state_store".to_string(), store_status.to_string());
    components.insert("queues".to_string(), "healthy".to_string());
    components.insert("rate_limiter".to_string(), "healthy".to_string());

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .filter(|value| !value.is_empty())
}

/// Reads request body and validates size
///
/// Decompression is handled transparently by RequestDecompressionLayer
/// middleware, so this function receives already-decompressed data.
async fn read_body(body: axum::body::Body, max_size: usize) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes()
        .to_vec();

    super::utils::validate_body_size(&data, max_size)?;

    Ok(data)
}
