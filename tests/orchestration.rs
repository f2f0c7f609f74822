//! End-to-end orchestration tests.
//!
//! These drive the full pipeline with mock connectors: submit a batch,
//! let the worker pools pull tasks through the rate limiter, and assert
//! on the fused provider reports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use provcheck::connector::{ConnectorRegistry, SourceError, SourceOutcome, ValidationSource};
use provcheck::engine::{RulesEngine, StaticMxResolver};
use provcheck::limiter::RateLimiter;
use provcheck::model::{
    Job, JobPriority, JobStatus, ProviderRecord, ReportStatus, TaskKind, ValidationOptions,
};
use provcheck::observability::Metrics;
use provcheck::orchestrator::{
    BatchSubmission, Orchestrator, OrchestratorError, ProgressTracker,
};
use provcheck::queue::ValidationQueues;
use provcheck::retry::RetryPolicy;
use provcheck::store::StateStore;
use provcheck::worker::{WorkerContext, WorkerPool, WorkerPoolConfig};

/// Identifier registry mock: finds a record with the submitted names.
struct RegistrySource;

#[async_trait]
impl ValidationSource for RegistrySource {
    async fn execute(&self, payload: &ProviderRecord) -> Result<SourceOutcome, SourceError> {
        let mut outcome = SourceOutcome::default();
        if let Some(identifier) = &payload.identifier {
            outcome
                .normalized_fields
                .insert("identifier".to_string(), identifier.clone());
            outcome
                .field_confidence
                .insert("identifier".to_string(), 0.95);
        }
        if let Some(given) = &payload.given_name {
            outcome
                .normalized_fields
                .insert("given_name".to_string(), given.clone());
            outcome.field_confidence.insert("given_name".to_string(), 0.9);
        }
        if let Some(family) = &payload.family_name {
            outcome
                .normalized_fields
                .insert("family_name".to_string(), family.clone());
            outcome
                .field_confidence
                .insert("family_name".to_string(), 0.9);
        }
        outcome.metadata = Some(json!({ "record_found": true }));
        Ok(outcome)
    }
}

/// State board mock with a fixed license status.
struct BoardSource {
    status: &'static str,
}

#[async_trait]
impl ValidationSource for BoardSource {
    async fn execute(&self, payload: &ProviderRecord) -> Result<SourceOutcome, SourceError> {
        let mut outcome = SourceOutcome::default();
        if let Some(number) = &payload.license_number {
            outcome
                .normalized_fields
                .insert("license_number".to_string(), number.clone());
            outcome
                .field_confidence
                .insert("license_number".to_string(), 0.9);
        }
        let name = format!(
            "{} {}",
            payload.given_name.as_deref().unwrap_or(""),
            payload.family_name.as_deref().unwrap_or("")
        );
        outcome.metadata = Some(json!({
            "license_status": self.status,
            "provider_name": name.trim(),
        }));
        Ok(outcome)
    }
}

/// Enrichment mock that returns nothing of interest.
struct QuietSource;

#[async_trait]
impl ValidationSource for QuietSource {
    async fn execute(&self, _payload: &ProviderRecord) -> Result<SourceOutcome, SourceError> {
        Ok(SourceOutcome::default())
    }
}

/// Source that always fails with a retryable error.
struct FlakySource;

#[async_trait]
impl ValidationSource for FlakySource {
    async fn execute(&self, _payload: &ProviderRecord) -> Result<SourceOutcome, SourceError> {
        Err(SourceError::retryable("upstream 503"))
    }
}

/// Source that trips anti-scraping detection.
struct BlockedSource;

#[async_trait]
impl ValidationSource for BlockedSource {
    async fn execute(&self, _payload: &ProviderRecord) -> Result<SourceOutcome, SourceError> {
        Err(SourceError::robot_detected("interstitial challenge"))
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    pool: Option<WorkerPool>,
    _dir: TempDir,
}

fn build_harness(registry: ConnectorRegistry) -> Harness {
    build_harness_inner(registry, true)
}

/// Harness without worker pools: submitted tasks stay queued, which makes
/// cancellation and provisional-report behavior deterministic.
fn build_idle_harness(registry: ConnectorRegistry) -> Harness {
    build_harness_inner(registry, false)
}

fn build_harness_inner(registry: ConnectorRegistry, spawn_workers: bool) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(StateStore::open(dir.path().join("state")).expect("state store"));
    let metrics = Arc::new(Metrics::new());
    // Generous limits so tests never stall on admission.
    let limiter = Arc::new(RateLimiter::new(HashMap::new()));
    let queues = Arc::new(ValidationQueues::new(Duration::from_secs(30)));

    let engine = RulesEngine::new(Arc::new(StaticMxResolver::with_domains(["example.com"])));
    let progress = Arc::new(ProgressTracker::new(store.clone(), engine, metrics.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        queues.clone(),
        progress.clone(),
        metrics.clone(),
        1000,
        3600,
    ));

    let pool = if spawn_workers {
        let ctx = Arc::new(WorkerContext {
            queues,
            limiter,
            registry: Arc::new(registry),
            store,
            progress,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                max_retries: 2,
            },
            metrics,
        });
        Some(WorkerPool::spawn(
            ctx,
            &WorkerPoolConfig {
                identifier_workers: 2,
                address_workers: 2,
                document_workers: 1,
                license_workers: 1,
                enrichment_workers: 2,
            },
        ))
    } else {
        None
    };

    Harness {
        orchestrator,
        pool,
        _dir: dir,
    }
}

fn default_registry() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    registry.register(TaskKind::IdentifierCheck, Arc::new(RegistrySource));
    registry.register(TaskKind::LicenseVerification, Arc::new(BoardSource { status: "active" }));
    registry.register(TaskKind::EnrichmentLookup, Arc::new(QuietSource));
    registry
}

fn sample_provider() -> ProviderRecord {
    ProviderRecord {
        provider_id: "P1".to_string(),
        given_name: Some("John".to_string()),
        family_name: Some("Smith".to_string()),
        identifier: Some("1234567893".to_string()),
        phone_primary: Some("(555) 123-4567".to_string()),
        license_number: Some("A123456".to_string()),
        license_state: Some("CA".to_string()),
        ..ProviderRecord::default()
    }
}

fn submission(providers: Vec<ProviderRecord>) -> BatchSubmission {
    BatchSubmission {
        providers,
        options: ValidationOptions::default(),
        idempotency_key: None,
        priority: JobPriority::Normal,
    }
}

async fn wait_terminal(orchestrator: &Orchestrator, job_id: &str) -> Job {
    for _ in 0..400 {
        let job = orchestrator.status(job_id).expect("job status");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

async fn shutdown(mut harness: Harness) {
    if let Some(pool) = harness.pool.take() {
        pool.shutdown().await;
    }
}

#[tokio::test]
async fn clean_provider_validates_with_no_flags() {
    let harness = build_harness(default_registry());

    let outcome = harness
        .orchestrator
        .submit_batch(submission(vec![sample_provider()]))
        .await
        .expect("submit");

    let job = wait_terminal(&harness.orchestrator, &outcome.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_count, 1);
    assert_eq!(job.failed_count, 0);
    assert!((job.progress_percentage - 100.0).abs() < f64::EPSILON);

    let report = harness
        .orchestrator
        .report(&outcome.job_id, "P1")
        .expect("report");
    assert_eq!(report.validation_status, ReportStatus::Valid);
    assert!(report.overall_confidence >= 0.90);
    assert!(report.flags.is_empty(), "unexpected flags: {:?}", report.flags);

    shutdown(harness).await;
}

#[tokio::test]
async fn suspended_license_invalidates_report() {
    let mut registry = ConnectorRegistry::new();
    registry.register(TaskKind::IdentifierCheck, Arc::new(RegistrySource));
    registry.register(
        TaskKind::LicenseVerification,
        Arc::new(BoardSource { status: "suspended" }),
    );
    registry.register(TaskKind::EnrichmentLookup, Arc::new(QuietSource));
    let harness = build_harness(registry);

    let outcome = harness
        .orchestrator
        .submit_batch(submission(vec![sample_provider()]))
        .await
        .expect("submit");

    wait_terminal(&harness.orchestrator, &outcome.job_id).await;

    let report = harness
        .orchestrator
        .report(&outcome.job_id, "P1")
        .expect("report");
    assert_eq!(report.validation_status, ReportStatus::Invalid);
    assert!(report.flags.contains(&"LICENSE_SUSPENDED".to_string()));
    // Confidence is still computed on an invalid report.
    assert!(report.overall_confidence > 0.0);

    shutdown(harness).await;
}

#[tokio::test]
async fn invalid_phone_downgrades_to_warning() {
    let harness = build_harness(default_registry());

    let mut provider = sample_provider();
    provider.phone_primary = Some("555-000-0000".to_string());

    let outcome = harness
        .orchestrator
        .submit_batch(submission(vec![provider]))
        .await
        .expect("submit");

    wait_terminal(&harness.orchestrator, &outcome.job_id).await;

    let report = harness
        .orchestrator
        .report(&outcome.job_id, "P1")
        .expect("report");
    assert_eq!(report.validation_status, ReportStatus::Warning);
    assert!(report.flags.contains(&"PHONE_INVALID".to_string()));

    shutdown(harness).await;
}

#[tokio::test]
async fn identical_submissions_share_one_job() {
    let harness = build_harness(default_registry());

    let mut first = submission(vec![sample_provider()]);
    first.idempotency_key = Some("k1".to_string());
    let mut second = submission(vec![sample_provider()]);
    second.idempotency_key = Some("k1".to_string());

    let a = harness.orchestrator.submit_batch(first).await.expect("first");
    let b = harness
        .orchestrator
        .submit_batch(second)
        .await
        .expect("second");

    assert!(a.created);
    assert!(!b.created);
    assert_eq!(a.job_id, b.job_id);

    // Only one set of tasks ran: the job still completes exactly once.
    let job = wait_terminal(&harness.orchestrator, &a.job_id).await;
    assert_eq!(job.provider_count, 1);
    assert_eq!(job.completed_count + job.failed_count, job.provider_count);

    shutdown(harness).await;
}

#[tokio::test]
async fn key_reuse_with_changed_content_conflicts() {
    let harness = build_harness(default_registry());

    let mut first = submission(vec![sample_provider()]);
    first.idempotency_key = Some("k1".to_string());
    harness.orchestrator.submit_batch(first).await.expect("first");

    let mut changed_provider = sample_provider();
    changed_provider.family_name = Some("Doe".to_string());
    let mut second = submission(vec![changed_provider]);
    second.idempotency_key = Some("k1".to_string());

    let err = harness
        .orchestrator
        .submit_batch(second)
        .await
        .expect_err("conflict");
    assert!(matches!(
        err,
        OrchestratorError::IdempotencyConflict { key } if key == "k1"
    ));

    shutdown(harness).await;
}

#[tokio::test]
async fn batch_size_bounds_are_enforced() {
    let harness = build_harness(default_registry());

    let err = harness
        .orchestrator
        .submit_batch(submission(vec![]))
        .await
        .expect_err("empty batch");
    assert!(matches!(
        err,
        OrchestratorError::InvalidBatchSize { actual: 0, .. }
    ));

    let oversized: Vec<ProviderRecord> = (0..1001)
        .map(|i| ProviderRecord {
            provider_id: format!("P{i}"),
            family_name: Some("Smith".to_string()),
            ..ProviderRecord::default()
        })
        .collect();
    let err = harness
        .orchestrator
        .submit_batch(submission(oversized))
        .await
        .expect_err("oversized batch");
    assert!(matches!(
        err,
        OrchestratorError::InvalidBatchSize { actual: 1001, .. }
    ));

    shutdown(harness).await;
}

#[tokio::test]
async fn cancellation_is_idempotent_and_tombstones_tasks() {
    // No workers running: every task is still queued when cancel lands.
    let harness = build_idle_harness(default_registry());

    let providers: Vec<ProviderRecord> = (0..3)
        .map(|i| ProviderRecord {
            provider_id: format!("P{i}"),
            ..sample_provider()
        })
        .collect();

    let outcome = harness
        .orchestrator
        .submit_batch(submission(providers))
        .await
        .expect("submit");

    let cancelled = harness
        .orchestrator
        .cancel(&outcome.job_id)
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    // cancel(cancel(j)) == cancel(j)
    let again = harness
        .orchestrator
        .cancel(&outcome.job_id)
        .await
        .expect("cancel again");
    assert_eq!(again.status, JobStatus::Cancelled);

    let job = harness.orchestrator.status(&outcome.job_id).expect("status");
    assert_eq!(job.status, JobStatus::Cancelled);
    // Nothing ever completed; progress reflects the cancelled remainder.
    assert_eq!(job.completed_count + job.failed_count, 0);

    shutdown(harness).await;
}

#[tokio::test]
async fn exhausted_retries_still_produce_a_report() {
    let mut registry = ConnectorRegistry::new();
    registry.register(TaskKind::IdentifierCheck, Arc::new(FlakySource));
    registry.register(
        TaskKind::LicenseVerification,
        Arc::new(BoardSource { status: "active" }),
    );
    registry.register(TaskKind::EnrichmentLookup, Arc::new(QuietSource));
    let harness = build_harness(registry);

    let outcome = harness
        .orchestrator
        .submit_batch(submission(vec![sample_provider()]))
        .await
        .expect("submit");

    let job = wait_terminal(&harness.orchestrator, &outcome.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let report = harness
        .orchestrator
        .report(&outcome.job_id, "P1")
        .expect("report");
    assert!(report.flags.contains(&"FAILED_VALIDATIONS:1".to_string()));
    // The registry never answered, so no identifier field was fused.
    assert!(!report.aggregated_fields.contains_key("identifier"));

    shutdown(harness).await;
}

#[tokio::test]
async fn robot_detection_fails_fast_and_flags() {
    let mut registry = default_registry();
    registry.register(TaskKind::LicenseVerification, Arc::new(BlockedSource));
    let harness = build_harness(registry);

    let outcome = harness
        .orchestrator
        .submit_batch(submission(vec![sample_provider()]))
        .await
        .expect("submit");

    wait_terminal(&harness.orchestrator, &outcome.job_id).await;

    let report = harness
        .orchestrator
        .report(&outcome.job_id, "P1")
        .expect("report");
    assert!(report.flags.contains(&"ROBOT_DETECTED:license".to_string()));
    assert!(report.flags.contains(&"FAILED_VALIDATIONS:1".to_string()));

    shutdown(harness).await;
}

#[tokio::test]
async fn pending_report_before_terminal() {
    // No workers running: the provider's tasks never settle, so the
    // report read must return the provisional pending shape.
    let harness = build_idle_harness(default_registry());

    let outcome = harness
        .orchestrator
        .submit_batch(submission(vec![sample_provider()]))
        .await
        .expect("submit");

    let report = harness
        .orchestrator
        .report(&outcome.job_id, "P1")
        .expect("report");
    assert_eq!(report.validation_status, ReportStatus::Pending);
    assert_eq!(report.provider_id, "P1");
    assert_eq!(report.job_id, outcome.job_id);

    let err = harness
        .orchestrator
        .report(&outcome.job_id, "nobody")
        .expect_err("unknown provider");
    assert!(matches!(err, OrchestratorError::ProviderNotFound { .. }));

    shutdown(harness).await;
}

#[tokio::test]
async fn multi_provider_progress_accounts_everyone() {
    let harness = build_harness(default_registry());

    let providers: Vec<ProviderRecord> = (0..5)
        .map(|i| ProviderRecord {
            provider_id: format!("P{i}"),
            ..sample_provider()
        })
        .collect();

    let outcome = harness
        .orchestrator
        .submit_batch(submission(providers))
        .await
        .expect("submit");

    let job = wait_terminal(&harness.orchestrator, &outcome.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_count + job.failed_count, 5);
    assert!((job.progress_percentage - 100.0).abs() < f64::EPSILON);

    for i in 0..5 {
        let report = harness
            .orchestrator
            .report(&outcome.job_id, &format!("P{i}"))
            .expect("report");
        assert_ne!(report.validation_status, ReportStatus::Pending);
        assert!(report.overall_confidence >= 0.0 && report.overall_confidence <= 1.0);
    }

    shutdown(harness).await;
}

#[tokio::test]
async fn provider_without_source_fields_still_gets_local_rules() {
    let harness = build_harness(default_registry());

    // Only a phone: no identifier/license/enrichment... except enrichment
    // runs on any non-empty record, so disable it to get a zero-task
    // provider with a purely local evaluation.
    let provider = ProviderRecord {
        provider_id: "PX".to_string(),
        phone_primary: Some("(555) 123-4567".to_string()),
        ..ProviderRecord::default()
    };
    let mut request = submission(vec![provider]);
    request.options.enable_enrichment = false;

    let outcome = harness
        .orchestrator
        .submit_batch(request)
        .await
        .expect("submit");

    let job = wait_terminal(&harness.orchestrator, &outcome.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let report = harness
        .orchestrator
        .report(&outcome.job_id, "PX")
        .expect("report");
    assert_eq!(
        report.aggregated_fields.get("phone_primary").unwrap(),
        "+15551234567"
    );
    assert!(report.flags.contains(&"MISSING_IDENTIFIER".to_string()));

    shutdown(harness).await;
}

#[tokio::test]
async fn recovery_requeues_unfinished_work() {
    // Submit with no worker pool running, drop everything, then rebuild on
    // the same store and let recovery re-enqueue and finish the job.
    let dir = TempDir::new().expect("temp dir");
    let store_path = dir.path().join("state");

    let job_id = {
        let store = Arc::new(StateStore::open(&store_path).expect("state store"));
        let metrics = Arc::new(Metrics::new());
        let queues = Arc::new(ValidationQueues::new(Duration::from_secs(30)));
        let engine = RulesEngine::new(Arc::new(StaticMxResolver::with_domains(["example.com"])));
        let progress = Arc::new(ProgressTracker::new(store.clone(), engine, metrics.clone()));
        let orchestrator = Orchestrator::new(
            store.clone(),
            queues,
            progress,
            metrics,
            1000,
            3600,
        );

        let outcome = orchestrator
            .submit_batch(submission(vec![sample_provider()]))
            .await
            .expect("submit");
        store.persist().expect("persist");
        outcome.job_id
        // No workers ran; tasks die with the in-memory queues here.
    };

    let store = Arc::new(StateStore::open(&store_path).expect("reopen state store"));
    let metrics = Arc::new(Metrics::new());
    let limiter = Arc::new(RateLimiter::new(HashMap::new()));
    let queues = Arc::new(ValidationQueues::new(Duration::from_secs(30)));
    let engine = RulesEngine::new(Arc::new(StaticMxResolver::with_domains(["example.com"])));
    let progress = Arc::new(ProgressTracker::new(store.clone(), engine, metrics.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        queues.clone(),
        progress.clone(),
        metrics.clone(),
        1000,
        3600,
    ));

    let ctx = Arc::new(WorkerContext {
        queues,
        limiter,
        registry: Arc::new(default_registry()),
        store,
        progress,
        retry: RetryPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_retries: 2,
        },
        metrics,
    });
    let pool = WorkerPool::spawn(ctx, &WorkerPoolConfig::default());

    let requeued = orchestrator.recover().await.expect("recover");
    assert!(requeued > 0);

    let job = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    pool.shutdown().await;
}
