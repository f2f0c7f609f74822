use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{
    IdempotencyRecord, Job, ProviderRecord, ProviderReport, ReportStatus, TaskKind,
    WorkerTaskResult,
};

use super::error::{Result, StoreError};
use super::partitions::{
    encode_idem_key, encode_job_key, encode_manifest_key, encode_report_key, encode_report_prefix,
    encode_result_key, encode_result_prefix,
};

/// Which providers a job fans out to, which task kinds each expects, and
/// the original submission the rules engine will evaluate against.
///
/// Persisted at submit time so evaluation and progress can be recomputed
/// purely from the store after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderManifestEntry {
    pub provider_id: String,
    pub kinds: Vec<TaskKind>,
    pub record: ProviderRecord,
}

/// Outcome of an idempotent creation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotentCreate {
    /// No live record existed; the caller owns the key now.
    Created,
    /// Same key, same request hash: the original job stands.
    Existing { job_id: String },
}

/// Fjall-backed durable state: jobs, provider manifests, task results,
/// provider reports, and idempotency records.
///
/// All writes are atomic at the row level; read-your-write holds within a
/// job. There are no cross-job transactions.
#[derive(Clone)]
pub struct StateStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    manifests: PartitionHandle,
    task_results: PartitionHandle,
    provider_reports: PartitionHandle,
    idempotency: PartitionHandle,
    /// Serializes idempotency check-and-create; fjall has no native CAS.
    idem_guard: Arc<Mutex<()>>,
}

impl StateStore {
    /// Open or create a state store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening state store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let manifests = keyspace.open_partition("manifests", PartitionCreateOptions::default())?;
        let task_results =
            keyspace.open_partition("task_results", PartitionCreateOptions::default())?;
        let provider_reports =
            keyspace.open_partition("provider_reports", PartitionCreateOptions::default())?;
        let idempotency =
            keyspace.open_partition("idempotency", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            jobs,
            manifests,
            task_results,
            provider_reports,
            idempotency,
            idem_guard: Arc::new(Mutex::new(())),
        })
    }

    // --- jobs ---

    pub fn put_job(&self, job: &Job) -> Result<()> {
        let key = encode_job_key(&job.job_id);
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(key, value)?;
        debug!(job_id = %job.job_id, status = ?job.status, "Job upserted");
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn require_job(&self, job_id: &str) -> Result<Job> {
        self.get_job(job_id)?
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    /// Every stored job; used by startup recovery.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            jobs.push(serde_json::from_slice(&value)?);
        }
        Ok(jobs)
    }

    // --- provider manifests ---

    pub fn put_manifest(&self, job_id: &str, entries: &[ProviderManifestEntry]) -> Result<()> {
        let key = encode_manifest_key(job_id);
        let value = serde_json::to_vec(entries)?;
        self.manifests.insert(key, value)?;
        Ok(())
    }

    pub fn get_manifest(&self, job_id: &str) -> Result<Vec<ProviderManifestEntry>> {
        match self.manifests.get(encode_manifest_key(job_id))? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(Vec::new()),
        }
    }

    // --- task results ---

    /// Write the authoritative result for (job, provider, kind). Later
    /// attempts overwrite earlier ones.
    pub fn put_task_result(&self, job_id: &str, result: &WorkerTaskResult) -> Result<()> {
        let key = encode_result_key(job_id, &result.provider_id, result.kind);
        let value = serde_json::to_vec(result)?;
        self.task_results.insert(key, value)?;
        debug!(
            job_id,
            provider_id = %result.provider_id,
            kind = %result.kind,
            success = result.success,
            "Task result recorded"
        );
        Ok(())
    }

    pub fn get_task_result(
        &self,
        job_id: &str,
        provider_id: &str,
        kind: TaskKind,
    ) -> Result<Option<WorkerTaskResult>> {
        match self
            .task_results
            .get(encode_result_key(job_id, provider_id, kind))?
        {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// All recorded evidence for one provider in one job.
    pub fn task_results_for_provider(
        &self,
        job_id: &str,
        provider_id: &str,
    ) -> Result<Vec<WorkerTaskResult>> {
        let prefix = encode_result_prefix(job_id, provider_id);
        let mut results = Vec::new();
        for item in self.task_results.prefix(prefix) {
            let (_, value) = item?;
            results.push(serde_json::from_slice(&value)?);
        }
        Ok(results)
    }

    // --- provider reports ---

    /// Persist a provider report. Terminal reports are immutable: once a
    /// non-pending report exists it is never overwritten.
    pub fn put_report(&self, report: &ProviderReport) -> Result<bool> {
        let key = encode_report_key(&report.job_id, &report.provider_id);

        if let Some(existing) = self.provider_reports.get(&key)? {
            let existing: ProviderReport = serde_json::from_slice(&existing)?;
            if existing.validation_status != ReportStatus::Pending {
                warn!(
                    job_id = %report.job_id,
                    provider_id = %report.provider_id,
                    "Refusing to overwrite terminal report"
                );
                return Ok(false);
            }
        }

        let value = serde_json::to_vec(report)?;
        self.provider_reports.insert(key, value)?;
        Ok(true)
    }

    pub fn get_report(&self, job_id: &str, provider_id: &str) -> Result<Option<ProviderReport>> {
        match self
            .provider_reports
            .get(encode_report_key(job_id, provider_id))?
        {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Count of terminal (non-pending) reports for one job.
    pub fn terminal_report_count(&self, job_id: &str) -> Result<usize> {
        let prefix = encode_report_prefix(job_id);
        let mut count = 0;
        for item in self.provider_reports.prefix(prefix) {
            let (_, value) = item?;
            let report: ProviderReport = serde_json::from_slice(&value)?;
            if report.validation_status != ReportStatus::Pending {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn reports_for_job(&self, job_id: &str) -> Result<Vec<ProviderReport>> {
        let prefix = encode_report_prefix(job_id);
        let mut reports = Vec::new();
        for item in self.provider_reports.prefix(prefix) {
            let (_, value) = item?;
            reports.push(serde_json::from_slice(&value)?);
        }
        Ok(reports)
    }

    // --- idempotency ---

    /// Look up a live idempotency record. Expired records are removed and
    /// reported as absent.
    pub fn check_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let encoded = encode_idem_key(key);
        match self.idempotency.get(&encoded)? {
            Some(value) => {
                let record: IdempotencyRecord = serde_json::from_slice(&value)?;
                if record.is_expired(Utc::now()) {
                    self.idempotency.remove(encoded)?;
                    return Ok(None);
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Atomic compare-and-set on an idempotency key.
    ///
    /// - absent key: record is written, `Created` is returned
    /// - live key with the same request hash: `Existing` with the bound job
    /// - live key with a different hash: [`StoreError::IdempotencyConflict`]
    pub fn create_idempotency(
        &self,
        key: &str,
        job_id: &str,
        request_hash: &str,
        ttl_seconds: u64,
    ) -> Result<IdempotentCreate> {
        let _guard = self.idem_guard.lock().expect("idempotency guard poisoned");

        if let Some(existing) = self.check_idempotency(key)? {
            if existing.request_hash == request_hash {
                return Ok(IdempotentCreate::Existing {
                    job_id: existing.job_id,
                });
            }
            return Err(StoreError::IdempotencyConflict {
                key: key.to_string(),
                existing_job_id: existing.job_id,
            });
        }

        let record = IdempotencyRecord {
            key: key.to_string(),
            job_id: job_id.to_string(),
            request_hash: request_hash.to_string(),
            created_at: Utc::now(),
            ttl_seconds,
        };
        let value = serde_json::to_vec(&record)?;
        self.idempotency.insert(encode_idem_key(key), value)?;
        debug!(key, job_id, "Idempotency record created");
        Ok(IdempotentCreate::Created)
    }

    /// Remove every expired idempotency record.
    pub fn prune_expired_idempotency(&self) -> Result<usize> {
        let now = Utc::now();
        let mut expired_keys = Vec::new();
        for item in self.idempotency.iter() {
            let (key, value) = item?;
            let record: IdempotencyRecord = serde_json::from_slice(&value)?;
            if record.is_expired(now) {
                expired_keys.push(key.to_vec());
            }
        }
        let pruned = expired_keys.len();
        for key in expired_keys {
            self.idempotency.remove(key)?;
        }
        if pruned > 0 {
            info!(pruned, "Pruned expired idempotency records");
        }
        Ok(pruned)
    }

    /// Flush all pending writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}
