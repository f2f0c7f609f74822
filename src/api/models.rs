//! API models for the validation intake and status endpoints.
//!
//! The external contract:
//! - `POST /api/validate/batch` accepts a [`BatchValidationRequest`]
//! - `POST /api/validate/csv` accepts raw CSV bytes with a fixed column
//!   mapping (see [`super::csv`])
//! - status and report endpoints return [`JobStatusResponse`] and the
//!   stored `ProviderReport`
//!
//! A complete batch submission example (as JSON):
//!
//! ```json
//! {
//!   "provider_data": [
//!     {
//!       "provider_id": "P1",
//!       "given_name": "John",
//!       "family_name": "Smith",
//!       "identifier": "1234567893",
//!       "phone_primary": "(555) 123-4567",
//!       "license_number": "A123456",
//!       "license_state": "CA"
//!     }
//!   ],
//!   "validation_options": {
//!     "enable_license_validation": true,
//!     "confidence_threshold": 0.8
//!   },
//!   "idempotency_key": "batch-2024-05-01-001",
//!   "priority": "normal"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::limiter::SourceUsage;
use crate::model::{Job, JobPriority, JobStatus, ProviderRecord, ValidationOptions};

#[derive(Debug, Clone, Deserialize)]
pub struct BatchValidationRequest {
    pub provider_data: Vec<ProviderRecord>,
    #[serde(default)]
    pub validation_options: ValidationOptions,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub priority: JobPriority,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchValidationResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub provider_count: usize,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub provider_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub progress_percentage: f64,
    pub validation_options: ValidationOptions,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            provider_count: job.provider_count,
            completed_count: job.completed_count,
            failed_count: job.failed_count,
            progress_percentage: job.progress_percentage,
            validation_options: job.validation_options,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct RateLimitsResponse {
    pub rate_limits: Vec<SourceUsage>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
