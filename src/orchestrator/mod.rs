//! Batch orchestration: intake, idempotent job creation, per-provider task
//! fan-out, cancellation, and status/report reads.
//!
//! The orchestrator is the only layer that raises errors to callers, and
//! only for input problems and idempotency conflicts. Everything below it
//! is recovered into evidence or flags.

pub mod progress;

pub use progress::ProgressTracker;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::model::{
    Job, JobPriority, JobStatus, ProviderRecord, ProviderReport, ValidationOptions, WorkerTask,
};
use crate::observability::Metrics;
use crate::queue::ValidationQueues;
use crate::report;
use crate::store::{IdempotentCreate, ProviderManifestEntry, StateStore, StoreError};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_IDEMPOTENCY_TTL_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("batch must contain between 1 and {max} providers, got {actual}")]
    InvalidBatchSize { actual: usize, max: usize },

    #[error("provider_id '{0}' appears more than once in the batch")]
    DuplicateProviderId(String),

    #[error("idempotency key '{key}' was already used with a different request")]
    IdempotencyConflict { key: String },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("provider '{provider_id}' is not part of job {job_id}")]
    ProviderNotFound { job_id: String, provider_id: String },

    #[error("state store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(job_id) => OrchestratorError::JobNotFound(job_id),
            StoreError::IdempotencyConflict { key, .. } => {
                OrchestratorError::IdempotencyConflict { key }
            }
            other => OrchestratorError::Store(other),
        }
    }
}

/// One accepted or replayed submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job_id: String,
    /// False when an idempotency replay returned the original job.
    pub created: bool,
    pub provider_count: usize,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub providers: Vec<ProviderRecord>,
    pub options: ValidationOptions,
    pub idempotency_key: Option<String>,
    pub priority: JobPriority,
}

pub struct Orchestrator {
    store: Arc<StateStore>,
    queues: Arc<ValidationQueues>,
    progress: Arc<ProgressTracker>,
    metrics: Arc<Metrics>,
    max_batch_size: usize,
    idempotency_ttl_seconds: u64,
}

impl Orchestrator {
    pub fn new(
        store: Arc<StateStore>,
        queues: Arc<ValidationQueues>,
        progress: Arc<ProgressTracker>,
        metrics: Arc<Metrics>,
        max_batch_size: usize,
        idempotency_ttl_seconds: u64,
    ) -> Self {
        Self {
            store,
            queues,
            progress,
            metrics,
            max_batch_size,
            idempotency_ttl_seconds,
        }
    }

    /// Accept a batch, bind it to an idempotency key, and fan out one task
    /// per (provider, enabled source).
    pub async fn submit_batch(
        &self,
        submission: BatchSubmission,
    ) -> Result<SubmitOutcome, OrchestratorError> {
        let count = submission.providers.len();
        if count == 0 || count > self.max_batch_size {
            return Err(OrchestratorError::InvalidBatchSize {
                actual: count,
                max: self.max_batch_size,
            });
        }

        let mut seen = HashSet::new();
        for provider in &submission.providers {
            if !seen.insert(provider.provider_id.as_str()) {
                return Err(OrchestratorError::DuplicateProviderId(
                    provider.provider_id.clone(),
                ));
            }
        }

        let request_hash = request_hash(&submission.providers, &submission.options)?;
        let key = submission
            .idempotency_key
            .clone()
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| format!("batch_{request_hash}"));

        let job_id = Uuid::now_v7().to_string();

        match self.store.create_idempotency(
            &key,
            &job_id,
            &request_hash,
            self.idempotency_ttl_seconds,
        )? {
            IdempotentCreate::Created => {}
            IdempotentCreate::Existing { job_id } => {
                let job = self.store.require_job(&job_id)?;
                info!(job_id, key, "Idempotent replay, returning original job");
                return Ok(SubmitOutcome {
                    job_id: job.job_id,
                    created: false,
                    provider_count: job.provider_count,
                    status: job.status,
                    created_at: job.created_at,
                });
            }
        }

        let now = Utc::now();
        let job = Job {
            job_id: job_id.clone(),
            status: JobStatus::Pending,
            priority: submission.priority,
            provider_count: count,
            completed_count: 0,
            failed_count: 0,
            progress_percentage: 0.0,
            validation_options: submission.options.clone(),
            idempotency_key: key,
            created_at: now,
            updated_at: now,
            error: None,
        };

        let entries: Vec<ProviderManifestEntry> = submission
            .providers
            .iter()
            .map(|record| ProviderManifestEntry {
                provider_id: record.provider_id.clone(),
                kinds: submission.options.enabled_kinds(record),
                record: record.clone(),
            })
            .collect();

        self.store.put_job(&job)?;
        self.store.put_manifest(&job_id, &entries)?;
        self.metrics.job_accepted();

        let mut task_count = 0usize;
        for entry in &entries {
            if entry.kinds.is_empty() {
                // No source has anything to check; local rules still run.
                self.progress
                    .finalize_untasked_provider(&job_id, entry)
                    .await?;
                continue;
            }
            for kind in &entry.kinds {
                self.queues.enqueue(WorkerTask {
                    task_id: Uuid::new_v4().to_string(),
                    job_id: job_id.clone(),
                    provider_id: entry.provider_id.clone(),
                    kind: *kind,
                    payload: kind.payload(&entry.record),
                    attempt: 1,
                    priority: submission.priority,
                    scheduled_at: Utc::now(),
                    timeout_seconds: submission.options.timeout_seconds,
                    max_retries: submission.options.max_retries,
                });
                task_count += 1;
            }
        }

        info!(
            job_id,
            provider_count = count,
            task_count,
            priority = ?submission.priority,
            "Batch accepted"
        );

        Ok(SubmitOutcome {
            job_id,
            created: true,
            provider_count: count,
            status: JobStatus::Pending,
            created_at: now,
        })
    }

    /// Idempotent cancellation: tombstones outstanding tasks and transitions
    /// the job. Terminal jobs are acknowledged unchanged.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        let job = self.progress.mark_cancelled(job_id).await?;
        self.queues.tombstone_job(job_id);
        Ok(job)
    }

    /// Synchronous job status read.
    pub fn status(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        Ok(self.store.require_job(job_id)?)
    }

    /// The fused report when the provider is terminal, a provisional
    /// pending report otherwise.
    pub fn report(
        &self,
        job_id: &str,
        provider_id: &str,
    ) -> Result<ProviderReport, OrchestratorError> {
        self.store.require_job(job_id)?;

        if let Some(report) = self.store.get_report(job_id, provider_id)? {
            return Ok(report);
        }

        let manifest = self.store.get_manifest(job_id)?;
        if manifest.iter().any(|e| e.provider_id == provider_id) {
            return Ok(report::pending_report(job_id, provider_id));
        }

        Err(OrchestratorError::ProviderNotFound {
            job_id: job_id.to_string(),
            provider_id: provider_id.to_string(),
        })
    }

    /// Startup recovery: re-enqueue missing tasks of non-terminal jobs and
    /// finalize providers whose evidence is already complete. Queue state is
    /// in-memory, so a restart loses claims; the durable store is the source
    /// of truth for what remains.
    pub async fn recover(&self) -> Result<usize, OrchestratorError> {
        let mut requeued = 0usize;

        for job in self.store.list_jobs()? {
            if job.status.is_terminal() {
                continue;
            }

            for entry in self.store.get_manifest(&job.job_id)? {
                let report_done = self
                    .store
                    .get_report(&job.job_id, &entry.provider_id)?
                    .is_some_and(|r| r.validation_status != crate::model::ReportStatus::Pending);
                if report_done {
                    continue;
                }

                let results = self
                    .store
                    .task_results_for_provider(&job.job_id, &entry.provider_id)?;
                let have: HashSet<_> = results.iter().map(|r| r.kind).collect();
                let missing: Vec<_> = entry
                    .kinds
                    .iter()
                    .copied()
                    .filter(|kind| !have.contains(kind))
                    .collect();

                if missing.is_empty() {
                    self.progress
                        .on_task_terminal(&job.job_id, &entry.provider_id)
                        .await?;
                    continue;
                }

                for kind in missing {
                    self.queues.enqueue(WorkerTask {
                        task_id: Uuid::new_v4().to_string(),
                        job_id: job.job_id.clone(),
                        provider_id: entry.provider_id.clone(),
                        kind,
                        payload: kind.payload(&entry.record),
                        attempt: 1,
                        priority: job.priority,
                        scheduled_at: Utc::now(),
                        timeout_seconds: job.validation_options.timeout_seconds,
                        max_retries: job.validation_options.max_retries,
                    });
                    requeued += 1;
                }
            }
        }

        if requeued > 0 {
            info!(requeued, "Recovered outstanding tasks from state store");
        }
        Ok(requeued)
    }
}

/// Canonical hash binding a submission's content to its idempotency key.
fn request_hash(
    providers: &[ProviderRecord],
    options: &ValidationOptions,
) -> Result<String, OrchestratorError> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(providers).map_err(|e| OrchestratorError::Store(e.into()))?);
    hasher.update(serde_json::to_vec(options).map_err(|e| OrchestratorError::Store(e.into()))?);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_hash_is_deterministic() {
        let providers = vec![ProviderRecord {
            provider_id: "P1".to_string(),
            given_name: Some("John".to_string()),
            ..ProviderRecord::default()
        }];
        let options = ValidationOptions::default();

        let a = request_hash(&providers, &options).unwrap();
        let b = request_hash(&providers, &options).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn request_hash_tracks_content() {
        let mut providers = vec![ProviderRecord {
            provider_id: "P1".to_string(),
            ..ProviderRecord::default()
        }];
        let options = ValidationOptions::default();
        let original = request_hash(&providers, &options).unwrap();

        providers[0].given_name = Some("Changed".to_string());
        let changed = request_hash(&providers, &options).unwrap();
        assert_ne!(original, changed);

        let other_options = ValidationOptions {
            confidence_threshold: 0.9,
            ..ValidationOptions::default()
        };
        let changed_options = request_hash(&providers, &other_options).unwrap();
        assert_ne!(changed, changed_options);
    }
}
