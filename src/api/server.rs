use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::{services, state::AppState};
use crate::config::Config;
use crate::connector::ConnectorRegistry;
use crate::engine::{MxResolver, RulesEngine};
use crate::limiter::RateLimiter;
use crate::observability::Metrics;
use crate::orchestrator::{Orchestrator, ProgressTracker};
use crate::queue::ValidationQueues;
use crate::store::StateStore;
use crate::worker::{WorkerContext, WorkerPool};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the API router for a fully wired application state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/validate/batch", post(services::submit_batch))
        .route("/api/validate/csv", post(services::submit_csv))
        .route(
            "/api/validate/job/{job_id}/status",
            get(services::get_status),
        )
        .route(
            "/api/validate/job/{job_id}/report/{provider_id}",
            get(services::get_report),
        )
        .route(
            "/api/validate/job/{job_id}/reports",
            get(services::get_all_reports),
        )
        .route("/api/validate/job/{job_id}", delete(services::cancel_job))
        .route("/api/validate/rate-limits", get(services::get_rate_limits))
        .route("/api/validate/metrics", get(services::get_metrics))
        .route("/health", get(services::health))
        .with_state(state)
}

/// Wire every component and serve the API until shutdown.
///
/// The connector registry and MX resolver are injected by the embedding
/// application; the core never builds its own outbound clients.
pub async fn run(
    config: Config,
    registry: ConnectorRegistry,
    mx_resolver: Arc<dyn MxResolver>,
) -> Result<(), AnyError> {
    info!(path = %config.server.data_path.display(), "Opening state store");
    let store = Arc::new(StateStore::open(&config.server.data_path)?);

    let metrics = Arc::new(Metrics::new());
    let limiter = Arc::new(RateLimiter::new(config.source_limits()));
    let queues = Arc::new(ValidationQueues::new(config.visibility_timeout()));

    let engine = RulesEngine::new(mx_resolver);
    let progress = Arc::new(ProgressTracker::new(store.clone(), engine, metrics.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        queues.clone(),
        progress.clone(),
        metrics.clone(),
        config.server.api.max_batch_size,
        config.idempotency.ttl_seconds,
    ));

    let registry = Arc::new(registry);
    if registry.kinds().is_empty() {
        warn!("No connectors registered; every queued task will fail terminally");
    }

    let worker_ctx = Arc::new(WorkerContext {
        queues: queues.clone(),
        limiter: limiter.clone(),
        registry,
        store: store.clone(),
        progress,
        retry: config.retry_policy(),
        metrics: metrics.clone(),
    });
    let pool = WorkerPool::spawn(worker_ctx, &config.worker_pool());

    // Requeue whatever a previous process left unfinished.
    orchestrator.recover().await?;

    let bind_addr = config.server.bind_addr;
    let state = AppState {
        config: Arc::new(config),
        orchestrator,
        limiter,
        queues,
        store: store.clone(),
        metrics,
    };

    let app = router(state)
        // Automatically decompress gzip request bodies
        .layer(RequestDecompressionLayer::new());

    let listener = TcpListener::bind(bind_addr).await?;
    info!(address = %bind_addr, "provcheck API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.shutdown().await;
    store.persist()?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
