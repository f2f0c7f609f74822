use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use provcheck::api::state::AppState;
use provcheck::config::Config;
use provcheck::engine::{RulesEngine, StaticMxResolver};
use provcheck::limiter::RateLimiter;
use provcheck::observability::Metrics;
use provcheck::orchestrator::{Orchestrator, ProgressTracker};
use provcheck::queue::ValidationQueues;
use provcheck::store::StateStore;

/// Builds a test app with isolated dependencies. No worker pools run, so
/// submitted jobs stay pending; these tests exercise the HTTP contract.
fn build_test_app() -> (Router, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let store = Arc::new(
        StateStore::open(temp_dir.path().join("state")).expect("Failed to open test store"),
    );
    let metrics = Arc::new(Metrics::new());
    let limiter = Arc::new(RateLimiter::with_defaults());
    let queues = Arc::new(ValidationQueues::new(Duration::from_secs(30)));

    let engine = RulesEngine::new(Arc::new(StaticMxResolver::with_domains(["example.com"])));
    let progress = Arc::new(ProgressTracker::new(store.clone(), engine, metrics.clone()));

    let config = Config::default();
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        queues.clone(),
        progress,
        metrics.clone(),
        config.server.api.max_batch_size,
        config.idempotency.ttl_seconds,
    ));

    let state = AppState {
        config: Arc::new(config),
        orchestrator,
        limiter,
        queues,
        store,
        metrics,
    };

    (provcheck::api::router(state), temp_dir)
}

fn valid_batch() -> Value {
    json!({
        "provider_data": [
            {
                "provider_id": "P1",
                "given_name": "John",
                "family_name": "Smith",
                "identifier": "1234567893",
                "phone_primary": "(555) 123-4567",
                "license_number": "A123456",
                "license_state": "CA"
            }
        ],
        "validation_options": {
            "confidence_threshold": 0.8
        }
    })
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse body")
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

#[tokio::test]
async fn submit_batch_returns_accepted() {
    let (app, _dir) = build_test_app();

    let response = app
        .oneshot(post_json("/api/validate/batch", &valid_batch()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = response_json(response).await;
    assert!(body["job_id"].is_string());
    assert_eq!(body["status"], "pending");
    assert_eq!(body["provider_count"], 1);
}

#[tokio::test]
async fn empty_batch_is_invalid_request() {
    let (app, _dir) = build_test_app();

    let body = json!({ "provider_data": [] });
    let response = app
        .oneshot(post_json("/api/validate/batch", &body))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn oversized_batch_is_invalid_request() {
    let (app, _dir) = build_test_app();

    let providers: Vec<Value> = (0..1001)
        .map(|i| json!({ "provider_id": format!("P{i}"), "family_name": "Smith" }))
        .collect();
    let body = json!({ "provider_data": providers });

    let response = app
        .oneshot(post_json("/api/validate/batch", &body))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_content_type_is_rejected() {
    let (app, _dir) = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/validate/batch")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(valid_batch().to_string()))
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn idempotent_replay_returns_same_job() {
    let (app, _dir) = build_test_app();

    let mut body = valid_batch();
    body["idempotency_key"] = json!("k1");

    let first = app
        .clone()
        .oneshot(post_json("/api/validate/batch", &body))
        .await
        .expect("first");
    let first = response_json(first).await;

    let second = app
        .oneshot(post_json("/api/validate/batch", &body))
        .await
        .expect("second");
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let second = response_json(second).await;

    assert_eq!(first["job_id"], second["job_id"]);
}

#[tokio::test]
async fn key_replay_with_new_content_conflicts() {
    let (app, _dir) = build_test_app();

    let mut body = valid_batch();
    body["idempotency_key"] = json!("k1");
    app.clone()
        .oneshot(post_json("/api/validate/batch", &body))
        .await
        .expect("first");

    body["provider_data"][0]["family_name"] = json!("Doe");
    let response = app
        .oneshot(post_json("/api/validate/batch", &body))
        .await
        .expect("second");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["code"], "IDEMPOTENCY_CONFLICT");
}

#[tokio::test]
async fn job_status_roundtrip() {
    let (app, _dir) = build_test_app();

    let submitted = app
        .clone()
        .oneshot(post_json("/api/validate/batch", &valid_batch()))
        .await
        .expect("submit");
    let submitted = response_json(submitted).await;
    let job_id = submitted["job_id"].as_str().expect("job id");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/validate/job/{job_id}/status"))
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("status");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["job_id"], job_id);
    assert_eq!(body["provider_count"], 1);
    assert_eq!(body["completed_count"], 0);
    assert_eq!(body["progress_percentage"], 0.0);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (app, _dir) = build_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/validate/job/nope/status")
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn pending_report_is_served() {
    let (app, _dir) = build_test_app();

    let submitted = app
        .clone()
        .oneshot(post_json("/api/validate/batch", &valid_batch()))
        .await
        .expect("submit");
    let submitted = response_json(submitted).await;
    let job_id = submitted["job_id"].as_str().expect("job id");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/validate/job/{job_id}/report/P1"))
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("report");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["validation_status"], "pending");
    assert_eq!(body["provider_id"], "P1");
}

#[tokio::test]
async fn csv_submission_is_accepted() {
    let (app, _dir) = build_test_app();

    let csv = "provider_id,given_name,family_name,identifier\n\
               P1,John,Smith,1234567893\n\
               P2,Jane,Doe,1245319599\n";

    let request = Request::builder()
        .method("POST")
        .uri("/api/validate/csv")
        .header(header::CONTENT_TYPE, "text/csv")
        .header("X-Provcheck-Idempotency-Key", "csv-1")
        .body(Body::from(csv))
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = response_json(response).await;
    assert_eq!(body["provider_count"], 2);
}

#[tokio::test]
async fn csv_without_rows_is_invalid() {
    let (app, _dir) = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/validate/csv")
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from("provider_id,given_name\n"))
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_endpoint_is_idempotent() {
    let (app, _dir) = build_test_app();

    let submitted = app
        .clone()
        .oneshot(post_json("/api/validate/batch", &valid_batch()))
        .await
        .expect("submit");
    let submitted = response_json(submitted).await;
    let job_id = submitted["job_id"].as_str().expect("job id").to_string();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/validate/job/{job_id}"))
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("cancel");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["status"], "cancelled");
    }
}

#[tokio::test]
async fn rate_limits_are_reported() {
    let (app, _dir) = build_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/validate/rate-limits")
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let limits = body["rate_limits"].as_array().expect("array");
    assert_eq!(limits.len(), 5);
    let sources: Vec<&str> = limits
        .iter()
        .map(|l| l["source"].as_str().expect("source"))
        .collect();
    assert!(sources.contains(&"license"));
}

#[tokio::test]
async fn health_reports_components() {
    let (app, _dir) = build_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["state_store"], "healthy");
}

#[tokio::test]
async fn metrics_endpoint_reports_counters_and_depths() {
    let (app, _dir) = build_test_app();

    app.clone()
        .oneshot(post_json("/api/validate/batch", &valid_batch()))
        .await
        .expect("submit");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/validate/metrics")
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["counters"]["jobs_accepted"], 1);
    // The sample provider fans out identifier, license, and enrichment
    // tasks; with no workers running they sit in their queues.
    assert_eq!(body["queue_depths"]["identifier_check"], 1);
    assert_eq!(body["queue_depths"]["license_verification"], 1);
    assert_eq!(body["queue_depths"]["enrichment_lookup"], 1);
}
