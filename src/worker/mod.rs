//! Validation worker pools.
//!
//! One fixed-size pool runs per task kind. Each worker loops: reserve a
//! task, drop it if its job is tombstoned or terminal, wait for the
//! source's rate limiter, invoke the connector under the task's wall-clock
//! budget, and settle the claim according to the retry controller.
//! Cancellation is checked before every suspension point; a connector call
//! already in flight completes and its result is discarded.
//!
//! Workers share no mutable state beyond the state store, the rate
//! limiter, and the queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connector::{ConnectorRegistry, SourceError};
use crate::limiter::RateLimiter;
use crate::model::{TaskKind, WorkerTask, WorkerTaskResult};
use crate::observability::Metrics;
use crate::orchestrator::ProgressTracker;
use crate::queue::{TaskQueue, ValidationQueues};
use crate::retry::{ErrorCategory, RetryDecision, RetryPolicy};
use crate::store::StateStore;

const RESERVE_TIMEOUT: Duration = Duration::from_millis(500);
const INFRA_NACK_DELAY: Duration = Duration::from_secs(1);

/// Per-kind worker concurrency.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub identifier_workers: usize,
    pub address_workers: usize,
    pub document_workers: usize,
    pub license_workers: usize,
    pub enrichment_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            identifier_workers: 8,
            address_workers: 8,
            document_workers: 4,
            license_workers: 2,
            enrichment_workers: 4,
        }
    }
}

impl WorkerPoolConfig {
    pub fn concurrency(&self, kind: TaskKind) -> usize {
        match kind {
            TaskKind::IdentifierCheck => self.identifier_workers,
            TaskKind::AddressValidation => self.address_workers,
            TaskKind::DocumentProcessing => self.document_workers,
            TaskKind::LicenseVerification => self.license_workers,
            TaskKind::EnrichmentLookup => self.enrichment_workers,
        }
    }
}

/// Everything a worker needs, shared across all pools.
pub struct WorkerContext {
    pub queues: Arc<ValidationQueues>,
    pub limiter: Arc<RateLimiter>,
    pub registry: Arc<ConnectorRegistry>,
    pub store: Arc<StateStore>,
    pub progress: Arc<ProgressTracker>,
    pub retry: RetryPolicy,
    pub metrics: Arc<Metrics>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn every per-kind pool.
    pub fn spawn(ctx: Arc<WorkerContext>, config: &WorkerPoolConfig) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for kind in TaskKind::ALL {
            for worker_id in 0..config.concurrency(kind) {
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                handles.push(tokio::spawn(async move {
                    run_worker(ctx, kind, worker_id, shutdown).await;
                }));
            }
        }

        info!(workers = handles.len(), "Worker pools started");
        Self { handles, shutdown }
    }

    /// Signal shutdown and wait for every worker to drain.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("Worker pools stopped");
    }
}

async fn run_worker(
    ctx: Arc<WorkerContext>,
    kind: TaskKind,
    worker_id: usize,
    shutdown: Arc<AtomicBool>,
) {
    debug!(%kind, worker_id, "Worker started");
    let queue = ctx.queues.queue(kind);

    while !shutdown.load(Ordering::Relaxed) {
        let Some(task) = queue.reserve(RESERVE_TIMEOUT).await else {
            continue;
        };
        process_task(&ctx, queue, task).await;
    }

    debug!(%kind, worker_id, "Worker stopped");
}

async fn process_task(ctx: &WorkerContext, queue: &TaskQueue, task: WorkerTask) {
    // Tombstoned or terminal jobs: settle without touching the connector.
    if queue.is_tombstoned(&task.job_id) {
        debug!(task_id = %task.task_id, job_id = %task.job_id, "Dropping tombstoned task");
        queue.ack(&task.task_id);
        return;
    }
    match ctx.progress.is_job_terminal(&task.job_id) {
        Ok(true) => {
            queue.ack(&task.task_id);
            return;
        }
        Ok(false) => {}
        Err(err) => {
            infra_failure(ctx, queue, &task, &err.to_string()).await;
            return;
        }
    }

    if let Err(err) = ctx.progress.ensure_running(&task.job_id).await {
        infra_failure(ctx, queue, &task, &err.to_string()).await;
        return;
    }

    // Admission may block; re-check cancellation afterwards.
    ctx.limiter.acquire(task.kind.source()).await;
    if queue.is_tombstoned(&task.job_id) {
        queue.ack(&task.task_id);
        return;
    }

    let connector = match ctx.registry.get(task.kind) {
        Ok(connector) => connector,
        Err(err) => {
            // No connector can ever serve this task; terminal failure.
            record_failure(
                ctx,
                queue,
                &task,
                ErrorCategory::NonRetryable,
                &err.to_string(),
            )
            .await;
            return;
        }
    };

    let budget = Duration::from_secs(task.timeout_seconds);
    let outcome = match tokio::time::timeout(budget, connector.execute(&task.payload)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SourceError::retryable(format!(
            "connector call exceeded {}s budget",
            task.timeout_seconds
        ))),
    };

    match outcome {
        Ok(evidence) => {
            // A job cancelled mid-call discards the result.
            if ctx.progress.is_job_terminal(&task.job_id).unwrap_or(true) {
                debug!(task_id = %task.task_id, "Job terminal after connector call, discarding result");
                queue.ack(&task.task_id);
                return;
            }

            let result = WorkerTaskResult {
                kind: task.kind,
                provider_id: task.provider_id.clone(),
                success: true,
                overall_confidence: evidence.overall_confidence(),
                normalized_fields: evidence.normalized_fields,
                field_confidence: evidence.field_confidence,
                error_message: None,
                source_metadata: evidence.metadata,
                attempt: task.attempt,
                completed_at: Utc::now(),
            };

            if let Err(err) = ctx.store.put_task_result(&task.job_id, &result) {
                infra_failure(ctx, queue, &task, &err.to_string()).await;
                return;
            }
            queue.ack(&task.task_id);
            ctx.metrics.task_executed();

            settle_provider(ctx, &task).await;
        }
        Err(source_err) => {
            let decision = ctx
                .retry
                .decide(source_err.category, task.attempt, Some(task.max_retries));
            match decision {
                RetryDecision::Retry(delay) => {
                    debug!(
                        task_id = %task.task_id,
                        attempt = task.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %source_err,
                        "Retrying task"
                    );
                    ctx.metrics.task_retried();
                    queue.nack(&task.task_id, delay);
                }
                RetryDecision::GiveUp => {
                    record_failure(ctx, queue, &task, source_err.category, &source_err.message)
                        .await;
                }
            }
        }
    }
}

/// Record a terminal failure as evidence: no confidence, flags only.
async fn record_failure(
    ctx: &WorkerContext,
    queue: &TaskQueue,
    task: &WorkerTask,
    category: ErrorCategory,
    message: &str,
) {
    warn!(
        task_id = %task.task_id,
        job_id = %task.job_id,
        provider_id = %task.provider_id,
        kind = %task.kind,
        attempt = task.attempt,
        message,
        "Task failed terminally"
    );

    let mut result = WorkerTaskResult::failed(
        task.kind,
        &task.provider_id,
        task.attempt,
        message.to_string(),
    );
    if category == ErrorCategory::RobotDetected {
        result.source_metadata = Some(json!({ "robot_detected": true }));
    }

    if let Err(err) = ctx.store.put_task_result(&task.job_id, &result) {
        infra_failure(ctx, queue, task, &err.to_string()).await;
        return;
    }
    queue.ack(&task.task_id);
    ctx.metrics.task_failed();

    settle_provider(ctx, task).await;
}

/// Drive the completion pipeline after an authoritative result landed.
async fn settle_provider(ctx: &WorkerContext, task: &WorkerTask) {
    if let Err(err) = ctx
        .progress
        .on_task_terminal(&task.job_id, &task.provider_id)
        .await
    {
        // The result itself is durable; recovery can finalize later.
        error!(
            job_id = %task.job_id,
            provider_id = %task.provider_id,
            error = %err,
            "Failed to advance provider after terminal task"
        );
    }
}

/// Queue/state-store trouble: yield the task back so the job can survive a
/// transient outage; fail the job once the attempts budget is spent.
async fn infra_failure(ctx: &WorkerContext, queue: &TaskQueue, task: &WorkerTask, message: &str) {
    warn!(
        task_id = %task.task_id,
        job_id = %task.job_id,
        attempt = task.attempt,
        message,
        "Infrastructure failure while processing task"
    );

    match ctx.retry.decide(
        ErrorCategory::Retryable,
        task.attempt,
        Some(task.max_retries),
    ) {
        RetryDecision::Retry(_) => {
            queue.nack(&task.task_id, INFRA_NACK_DELAY);
        }
        RetryDecision::GiveUp => {
            queue.ack(&task.task_id);
            let diagnostic = format!(
                "infrastructure failure on {} task for provider {}: {}",
                task.kind, task.provider_id, message
            );
            if let Err(err) = ctx.progress.mark_failed(&task.job_id, &diagnostic).await {
                error!(job_id = %task.job_id, error = %err, "Could not mark job failed");
            }
        }
    }
}
