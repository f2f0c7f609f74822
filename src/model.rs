//! Core data model for validation jobs, tasks, and reports.
//!
//! Identity rules:
//! - `provider_id` is opaque and is the sole identity key within a job
//! - every task belongs to exactly one `(job, provider)` pair and has
//!   exactly one [`TaskKind`]
//! - the last written [`WorkerTaskResult`] per `(job, provider, kind)` is
//!   the authoritative evidence for that source

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type FieldMap = BTreeMap<String, String>;
pub type ConfidenceMap = BTreeMap<String, f64>;

/// A submitted practitioner record under validation.
///
/// All fields except `provider_id` are optional; which validation tasks are
/// fanned out depends on which fields are populated (see
/// [`ValidationOptions::enabled_kinds`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// 10-digit national practitioner identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_primary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_zip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_reference: Option<String>,
}

impl ProviderRecord {
    /// True when the record carries nothing beyond its identifier.
    pub fn is_empty(&self) -> bool {
        self.given_name.is_none()
            && self.family_name.is_none()
            && self.identifier.is_none()
            && self.phone_primary.is_none()
            && self.phone_alt.is_none()
            && self.email.is_none()
            && self.address_street.is_none()
            && self.address_city.is_none()
            && self.address_state.is_none()
            && self.address_zip.is_none()
            && self.license_number.is_none()
            && self.license_state.is_none()
            && self.document_reference.is_none()
    }
}

/// Per-batch validation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOptions {
    #[serde(default = "default_true")]
    pub enable_identifier_check: bool,
    #[serde(default = "default_true")]
    pub enable_address_validation: bool,
    #[serde(default = "default_true")]
    pub enable_document_processing: bool,
    #[serde(default = "default_true")]
    pub enable_license_validation: bool,
    #[serde(default = "default_true")]
    pub enable_enrichment: bool,
    /// Minimum overall confidence for a `valid` verdict (closed lower bound).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-task wall clock budget.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_seconds() -> u64 {
    300
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            enable_identifier_check: true,
            enable_address_validation: true,
            enable_document_processing: true,
            enable_license_validation: true,
            enable_enrichment: true,
            confidence_threshold: default_confidence_threshold(),
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl ValidationOptions {
    /// Enumerate the task kinds implied by these options for one record.
    ///
    /// A kind is only scheduled when its source has something to work with:
    /// no address fields means no address task, regardless of the flag.
    pub fn enabled_kinds(&self, record: &ProviderRecord) -> Vec<TaskKind> {
        let mut kinds = Vec::new();

        if self.enable_identifier_check && record.identifier.is_some() {
            kinds.push(TaskKind::IdentifierCheck);
        }
        if self.enable_address_validation && record.address_street.is_some() {
            kinds.push(TaskKind::AddressValidation);
        }
        if self.enable_document_processing && record.document_reference.is_some() {
            kinds.push(TaskKind::DocumentProcessing);
        }
        if self.enable_license_validation
            && record.license_number.is_some()
            && record.license_state.is_some()
        {
            kinds.push(TaskKind::LicenseVerification);
        }
        if self.enable_enrichment && !record.is_empty() {
            kinds.push(TaskKind::EnrichmentLookup);
        }

        kinds
    }
}

/// The five validation sources a task can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    IdentifierCheck,
    AddressValidation,
    DocumentProcessing,
    LicenseVerification,
    EnrichmentLookup,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::IdentifierCheck,
        TaskKind::AddressValidation,
        TaskKind::DocumentProcessing,
        TaskKind::LicenseVerification,
        TaskKind::EnrichmentLookup,
    ];

    /// Short source name used for rate limiting, logging, and flags.
    pub fn source(&self) -> &'static str {
        match self {
            TaskKind::IdentifierCheck => "identifier",
            TaskKind::AddressValidation => "address",
            TaskKind::DocumentProcessing => "document",
            TaskKind::LicenseVerification => "license",
            TaskKind::EnrichmentLookup => "enrichment",
        }
    }

    /// Declared fusion weight of this source.
    ///
    /// The four weighted authorities sum to 1.0; document evidence carries
    /// the website-tier weight since fusion normalizes by the sum of
    /// contributing weights.
    pub fn weight(&self) -> f64 {
        match self {
            TaskKind::IdentifierCheck => 0.40,
            TaskKind::AddressValidation => 0.25,
            TaskKind::EnrichmentLookup => 0.20,
            TaskKind::DocumentProcessing => 0.20,
            TaskKind::LicenseVerification => 0.15,
        }
    }

    /// Project the subset of record fields this source needs into a payload.
    pub fn payload(&self, record: &ProviderRecord) -> ProviderRecord {
        let base = ProviderRecord {
            provider_id: record.provider_id.clone(),
            ..ProviderRecord::default()
        };

        match self {
            TaskKind::IdentifierCheck => ProviderRecord {
                identifier: record.identifier.clone(),
                given_name: record.given_name.clone(),
                family_name: record.family_name.clone(),
                ..base
            },
            TaskKind::AddressValidation => ProviderRecord {
                address_street: record.address_street.clone(),
                address_city: record.address_city.clone(),
                address_state: record.address_state.clone(),
                address_zip: record.address_zip.clone(),
                ..base
            },
            TaskKind::DocumentProcessing => ProviderRecord {
                document_reference: record.document_reference.clone(),
                ..base
            },
            TaskKind::LicenseVerification => ProviderRecord {
                license_number: record.license_number.clone(),
                license_state: record.license_state.clone(),
                given_name: record.given_name.clone(),
                family_name: record.family_name.clone(),
                ..base
            },
            TaskKind::EnrichmentLookup => record.clone(),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskKind::IdentifierCheck => "identifier_check",
            TaskKind::AddressValidation => "address_validation",
            TaskKind::DocumentProcessing => "document_processing",
            TaskKind::LicenseVerification => "license_verification",
            TaskKind::EnrichmentLookup => "enrichment_lookup",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One accepted batch of providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub provider_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub progress_percentage: f64,
    pub validation_options: ValidationOptions,
    pub idempotency_key: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    /// Infrastructure diagnostic, populated only for `failed` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One (provider, source) unit of work, exclusively owned by the queue
/// until a worker claims it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTask {
    pub task_id: String,
    pub job_id: String,
    pub provider_id: String,
    pub kind: TaskKind,
    pub payload: ProviderRecord,
    pub attempt: u32,
    pub priority: JobPriority,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub scheduled_at: DateTime<Utc>,
    /// Per-task wall clock budget inherited from the job options.
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

/// Evidence from one attempt against one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTaskResult {
    pub kind: TaskKind,
    pub provider_id: String,
    pub success: bool,
    pub overall_confidence: f64,
    pub normalized_fields: FieldMap,
    pub field_confidence: ConfidenceMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_metadata: Option<Value>,
    pub attempt: u32,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub completed_at: DateTime<Utc>,
}

impl WorkerTaskResult {
    /// A terminal failure record: contributes no confidence, may still
    /// contribute flags.
    pub fn failed(kind: TaskKind, provider_id: &str, attempt: u32, message: String) -> Self {
        Self {
            kind,
            provider_id: provider_id.to_string(),
            success: false,
            overall_confidence: 0.0,
            normalized_fields: FieldMap::new(),
            field_confidence: ConfidenceMap::new(),
            error_message: Some(message),
            source_metadata: None,
            attempt,
            completed_at: Utc::now(),
        }
    }
}

/// Per-field outcome of a single fired rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    Warning,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub field_name: String,
    pub value: String,
    pub status: ValidationStatus,
    pub confidence: f64,
    pub source: TaskKind,
    pub criteria_met: bool,
    pub details: Value,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

/// Per-field fusion across evidence and rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSummary {
    pub field_name: String,
    pub agreed_value: String,
    pub confidence: f64,
    pub status: ValidationStatus,
    pub contributing_sources: Vec<TaskKind>,
    pub validation_count: usize,
}

/// Verdict for the whole provider record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Valid,
    Warning,
    Invalid,
    Pending,
}

/// The final per-provider verdict for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReport {
    pub provider_id: String,
    pub job_id: String,
    pub overall_confidence: f64,
    pub validation_status: ReportStatus,
    pub field_summaries: BTreeMap<String, FieldSummary>,
    pub aggregated_fields: FieldMap,
    pub flags: Vec<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub validation_timestamp: DateTime<Utc>,
    /// Wall clock from first task dispatch to report, in seconds.
    pub processing_time: f64,
}

/// Binding of one logical submission to one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub job_id: String,
    pub request_hash: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    /// Time to live in seconds; expired records are treated as absent.
    pub ttl_seconds: u64,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.num_seconds() >= self.ttl_seconds as i64
    }
}

/// Round a confidence for export. Internal math stays full precision.
pub fn round_confidence(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
