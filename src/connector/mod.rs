//! The connector seam between the orchestration core and external sources.
//!
//! The core never talks to a registry, a places API, an OCR provider, or a
//! state board itself; it drives implementations of [`ValidationSource`]
//! that do. A connector returns a normalized record with per-field
//! confidence and classifies its own failures into the retry controller's
//! categories.
//!
//! Evidence conventions the rules engine reads from `metadata`:
//! - identifier: `record_found` (bool), registry names in `normalized_fields`
//! - address: `place_id` (string), `geometry_accuracy`
//!   (`rooftop` | `range_interpolated` | `approximate` | `none`)
//! - license: `license_status` (`active` | `expired` | `suspended` | `revoked`),
//!   `provider_name` (name on record at the board)

mod registry;

pub use registry::{ConnectorRegistry, RegistryError};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::{ConfidenceMap, FieldMap, ProviderRecord};
use crate::retry::ErrorCategory;

/// A connector failure, carrying its retry classification.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SourceError {
    pub category: ErrorCategory,
    pub message: String,
}

impl SourceError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Retryable,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::NonRetryable,
            message: message.into(),
        }
    }

    pub fn robot_detected(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::RobotDetected,
            message: message.into(),
        }
    }
}

/// Normalized evidence returned by one connector call.
#[derive(Debug, Clone, Default)]
pub struct SourceOutcome {
    pub normalized_fields: FieldMap,
    pub field_confidence: ConfidenceMap,
    pub metadata: Option<Value>,
}

impl SourceOutcome {
    /// Weighted mean of the per-field confidences; 0 when empty.
    pub fn overall_confidence(&self) -> f64 {
        if self.field_confidence.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.field_confidence.values().sum();
        sum / self.field_confidence.len() as f64
    }
}

/// One external authority.
///
/// Implementations own their HTTP/HTML/OCR plumbing, politeness headers,
/// and error classification. The payload is the field subset the source
/// needs (see [`crate::model::TaskKind::payload`]).
#[async_trait]
pub trait ValidationSource: Send + Sync {
    async fn execute(&self, payload: &ProviderRecord) -> Result<SourceOutcome, SourceError>;
}
