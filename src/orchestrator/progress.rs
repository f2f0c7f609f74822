//! Job progress tracking and the provider completion pipeline.
//!
//! Workers call [`ProgressTracker::on_task_terminal`] after recording an
//! authoritative task result. When that was the provider's last outstanding
//! source, the rules engine runs over the collected evidence, the report is
//! aggregated and persisted, and the job's progress advances. Completion is
//! emitted when every provider is terminal.
//!
//! All job-record read-modify-writes are serialized behind one async mutex;
//! it is never held across connector I/O.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::RulesEngine;
use crate::model::{Job, JobStatus, ReportStatus, TaskKind};
use crate::observability::Metrics;
use crate::report;
use crate::store::{ProviderManifestEntry, Result as StoreResult, StateStore};

pub struct ProgressTracker {
    store: Arc<StateStore>,
    engine: RulesEngine,
    metrics: Arc<Metrics>,
    job_update: Mutex<()>,
}

impl ProgressTracker {
    pub fn new(store: Arc<StateStore>, engine: RulesEngine, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            engine,
            metrics,
            job_update: Mutex::new(()),
        }
    }

    /// Flip a pending job to running on first task dequeue.
    pub async fn ensure_running(&self, job_id: &str) -> StoreResult<()> {
        let _guard = self.job_update.lock().await;
        let mut job = self.store.require_job(job_id)?;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Running;
            job.updated_at = Utc::now();
            self.store.put_job(&job)?;
            debug!(job_id, "Job running");
        }
        Ok(())
    }

    pub fn is_job_terminal(&self, job_id: &str) -> StoreResult<bool> {
        Ok(self
            .store
            .get_job(job_id)?
            .map(|job| job.status.is_terminal())
            .unwrap_or(true))
    }

    /// Called after the authoritative result for one (provider, kind) is
    /// recorded. Finalizes the provider once every expected source is
    /// terminal.
    pub async fn on_task_terminal(&self, job_id: &str, provider_id: &str) -> StoreResult<()> {
        let entries = self.store.get_manifest(job_id)?;
        let Some(entry) = entries.iter().find(|e| e.provider_id == provider_id) else {
            warn!(job_id, provider_id, "Task result for unknown provider");
            return Ok(());
        };

        let results = self.store.task_results_for_provider(job_id, provider_id)?;
        let have: HashSet<TaskKind> = results.iter().map(|r| r.kind).collect();
        if !entry.kinds.iter().all(|kind| have.contains(kind)) {
            return Ok(());
        }

        if let Some(existing) = self.store.get_report(job_id, provider_id)? {
            if existing.validation_status != ReportStatus::Pending {
                return Ok(());
            }
        }

        self.finalize_provider(job_id, entry).await
    }

    /// Finalize a provider that fans out to no tasks at all: local rules
    /// still run over the submission itself.
    pub async fn finalize_untasked_provider(
        &self,
        job_id: &str,
        entry: &ProviderManifestEntry,
    ) -> StoreResult<()> {
        self.finalize_provider(job_id, entry).await
    }

    async fn finalize_provider(
        &self,
        job_id: &str,
        entry: &ProviderManifestEntry,
    ) -> StoreResult<()> {
        let job = self.store.require_job(job_id)?;
        if job.status.is_terminal() {
            // Results arriving after cancellation are discarded.
            debug!(job_id, provider_id = %entry.provider_id, "Job terminal, dropping late result");
            return Ok(());
        }

        let results = self.store.task_results_for_provider(job_id, &entry.provider_id)?;
        let rule_results = self.engine.evaluate(&entry.record, &results).await;

        let processing_time =
            (Utc::now() - job.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        let report = report::aggregate(
            job_id,
            &entry.record,
            &results,
            &rule_results,
            job.validation_options.confidence_threshold,
            processing_time,
        );

        // Two sources finishing at once race to finalize; the lock makes
        // exactly one writer win and the loser observe the terminal report.
        {
            let _guard = self.job_update.lock().await;
            if let Some(existing) = self.store.get_report(job_id, &entry.provider_id)? {
                if existing.validation_status != ReportStatus::Pending {
                    return Ok(());
                }
            }
            if !self.store.put_report(&report)? {
                return Ok(());
            }
        }
        self.metrics.report_written();
        info!(
            job_id,
            provider_id = %entry.provider_id,
            status = ?report.validation_status,
            confidence = report.overall_confidence,
            "Provider report written"
        );

        let provider_failed = !results.is_empty() && results.iter().all(|r| !r.success);
        self.advance_job(job_id, provider_failed).await
    }

    /// Advance counters and progress after one provider reached terminal
    /// state; emit completion when the job is done.
    async fn advance_job(&self, job_id: &str, provider_failed: bool) -> StoreResult<()> {
        let _guard = self.job_update.lock().await;
        let mut job = self.store.require_job(job_id)?;
        if job.status.is_terminal() {
            return Ok(());
        }

        if provider_failed {
            job.failed_count += 1;
        } else {
            job.completed_count += 1;
        }
        let terminal = job.completed_count + job.failed_count;
        job.progress_percentage = 100.0 * terminal as f64 / job.provider_count.max(1) as f64;
        job.updated_at = Utc::now();

        if terminal >= job.provider_count {
            job.status = JobStatus::Completed;
            self.metrics.job_completed();
            info!(
                job_id,
                completed = job.completed_count,
                failed = job.failed_count,
                "Job completed"
            );
        }

        self.store.put_job(&job)
    }

    /// Idempotent cancellation. Terminal jobs are returned unchanged.
    pub async fn mark_cancelled(&self, job_id: &str) -> StoreResult<Job> {
        let _guard = self.job_update.lock().await;
        let mut job = self.store.require_job(job_id)?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        job.status = JobStatus::Cancelled;
        job.updated_at = Utc::now();
        self.store.put_job(&job)?;
        self.metrics.job_cancelled();
        info!(job_id, "Job cancelled");
        Ok(job)
    }

    /// Infrastructure failure: record the diagnostic and fail the job.
    pub async fn mark_failed(&self, job_id: &str, diagnostic: &str) -> StoreResult<()> {
        let _guard = self.job_update.lock().await;
        let mut job = self.store.require_job(job_id)?;
        if job.status.is_terminal() {
            return Ok(());
        }
        job.status = JobStatus::Failed;
        job.error = Some(diagnostic.to_string());
        job.updated_at = Utc::now();
        self.store.put_job(&job)?;
        self.metrics.job_failed();
        warn!(job_id, diagnostic, "Job failed");
        Ok(())
    }
}
