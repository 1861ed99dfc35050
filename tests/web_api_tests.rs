//! Integration tests for `src/web_api.rs`
//!
//! Each test spawns a real HTTP server on an ephemeral port and exercises it
//! via `reqwest`. The engine is swapped per test so outcomes are
//! deterministic.
//!
//! All tests require the `web-api` Cargo feature.

#![cfg(feature = "web-api")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use tokio_genjob::config::GenJobConfig;
use tokio_genjob::web_api::{build_app, serve, SUBMITTER_HEADER};
use tokio_genjob::{EchoEngine, EngineError, Executor, GenerationEngine};

// ============================================================================
// Test Infrastructure
// ============================================================================

struct CountingEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl GenerationEngine for CountingEngine {
    async fn generate(&self, input: &str) -> Result<Value, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(json!({ "text": input.to_uppercase() }))
    }
}

struct RejectingEngine;

#[async_trait]
impl GenerationEngine for RejectingEngine {
    async fn generate(&self, _input: &str) -> Result<Value, EngineError> {
        Err(EngineError::Upstream {
            status: Some(401),
            message: "invalid api key".into(),
        })
    }
}

fn test_config() -> GenJobConfig {
    let mut config = GenJobConfig::default();
    config.server.max_request_size = 4096;
    config.limits.max_input_bytes = 1024;
    config.limits.rate_limit_max = 100;
    config.executor.fallback_delay_ms = 50;
    config.executor.fallback_attempts = 2;
    config
}

/// Spawn a server and return its base URL plus the executor behind it.
async fn spawn_server(config: GenJobConfig, engine: Arc<dyn GenerationEngine>) -> (String, Executor) {
    let (executor, app) = build_app(&config, engine);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("test: bind ephemeral port");
    let addr = listener.local_addr().expect("test: local addr");
    tokio::spawn(async move {
        let _ = serve(listener, app, std::future::pending()).await;
    });
    (format!("http://{addr}"), executor)
}

fn client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("reqwest client must build in tests")
}

async fn submit(client: &Client, base: &str, submitter: &str, input: &str) -> reqwest::Response {
    client
        .post(format!("{base}/api/v1/submit"))
        .header(SUBMITTER_HEADER, submitter)
        .json(&json!({ "input": input }))
        .send()
        .await
        .expect("test: submit request")
}

async fn status(client: &Client, base: &str, job_id: &str) -> reqwest::Response {
    client
        .get(format!("{base}/api/v1/status"))
        .query(&[("jobId", job_id)])
        .send()
        .await
        .expect("test: status request")
}

/// Poll the status endpoint until the job leaves `pending`/`processing`.
async fn wait_terminal(client: &Client, base: &str, job_id: &str) -> Value {
    for _ in 0..100 {
        let body: Value = status(client, base, job_id)
            .await
            .json()
            .await
            .expect("test: status body");
        if body["status"] == "completed" || body["status"] == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

// ============================================================================
// Submit
// ============================================================================

#[tokio::test]
async fn test_submit_returns_202_with_pending_job() {
    let (base, _) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let client = client();

    let resp = submit(&client, &base, "alice", "write a poem").await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body: Value = resp.json().await.expect("test: body");
    assert_eq!(body["status"], "pending");
    assert!(body["jobId"].as_str().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn test_submitted_job_completes_and_exposes_result() {
    let engine = Arc::new(CountingEngine {
        calls: AtomicUsize::new(0),
    });
    let (base, _) = spawn_server(test_config(), engine.clone()).await;
    let client = client();

    let body: Value = submit(&client, &base, "alice", "hello")
        .await
        .json()
        .await
        .expect("test: body");
    let job_id = body["jobId"].as_str().expect("test: job id").to_string();

    let done = wait_terminal(&client, &base, &job_id).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["jobId"], job_id);
    assert_eq!(done["result"]["text"], "HELLO");
    assert!(done.get("errorCode").is_none());
    assert!(done.get("input").is_none());

    // Let the fallback trigger fire; it must lose the claim.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_submit_without_submitter_is_401() {
    let (base, _) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let resp = client()
        .post(format!("{base}/api/v1/submit"))
        .json(&json!({ "input": "hi" }))
        .send()
        .await
        .expect("test: request");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.expect("test: body");
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn test_submit_invalid_input_is_400_not_retryable() {
    let (base, executor) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let client = client();

    let resp = submit(&client, &base, "alice", "   ").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.expect("test: body");
    assert_eq!(body["code"], "invalid-input");
    assert_eq!(body["retryable"], false);

    let resp = submit(&client, &base, "alice", &"x".repeat(1025)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{base}/api/v1/submit"))
        .header(SUBMITTER_HEADER, "alice")
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("test: request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let pending = executor
        .manager()
        .store()
        .list_by_status(tokio_genjob::JobStatus::Pending, 10)
        .await
        .expect("test: list");
    assert!(pending.is_empty(), "rejected submissions must not create jobs");
}

#[tokio::test]
async fn test_submit_over_rate_limit_is_429_retryable() {
    let mut config = test_config();
    config.limits.rate_limit_max = 2;
    let (base, _) = spawn_server(config, Arc::new(EchoEngine::new())).await;
    let client = client();

    assert_eq!(submit(&client, &base, "bob", "1").await.status(), StatusCode::ACCEPTED);
    assert_eq!(submit(&client, &base, "bob", "2").await.status(), StatusCode::ACCEPTED);

    let resp = submit(&client, &base, "bob", "3").await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = resp.json().await.expect("test: body");
    assert_eq!(body["code"], "rate-limited");
    assert_eq!(body["retryable"], true);

    // Other submitters are unaffected.
    assert_eq!(submit(&client, &base, "carol", "1").await.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_engine_failure_is_persisted_with_classified_code() {
    let (base, _) = spawn_server(test_config(), Arc::new(RejectingEngine)).await;
    let client = client();

    let body: Value = submit(&client, &base, "alice", "x")
        .await
        .json()
        .await
        .expect("test: body");
    let job_id = body["jobId"].as_str().expect("test: job id").to_string();

    let done = wait_terminal(&client, &base, &job_id).await;
    assert_eq!(done["status"], "failed");
    assert_eq!(done["errorCode"], "upstream-auth-failed");
    assert_eq!(done["retryable"], false);
    assert!(done.get("result").is_none());
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn test_status_unknown_job_is_404() {
    let (base, _) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let resp = status(&client(), &base, &uuid::Uuid::new_v4().to_string()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_missing_or_malformed_id_is_400() {
    let (base, _) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let client = client();

    let resp = client
        .get(format!("{base}/api/v1/status"))
        .send()
        .await
        .expect("test: request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = status(&client, &base, "not-a-job-id").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Fallback trigger
// ============================================================================

#[tokio::test]
async fn test_fallback_trigger_always_returns_ok() {
    let (base, _) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let client = client();

    let resp = client
        .post(format!("{base}/api/v1/fallback-trigger"))
        .send()
        .await
        .expect("test: request");
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.expect("test: body");
    assert_eq!(body, json!({ "ok": true }));

    let resp = client
        .post(format!("{base}/api/v1/fallback-trigger"))
        .json(&json!({ "anything": "ignored" }))
        .send()
        .await
        .expect("test: request");
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_fallback_trigger_runs_orphaned_pending_jobs() {
    let engine = Arc::new(CountingEngine {
        calls: AtomicUsize::new(0),
    });
    let (base, executor) = spawn_server(test_config(), engine.clone()).await;
    let client = client();

    // Created without dispatch, as if the primary trigger never ran.
    let job_id = executor
        .manager()
        .submit("orphan".into(), "alice")
        .await
        .expect("test: submit");

    let resp = client
        .post(format!("{base}/api/v1/fallback-trigger"))
        .send()
        .await
        .expect("test: request");
    assert_eq!(resp.status(), StatusCode::OK);

    let done = wait_terminal(&client, &base, &job_id.to_string()).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["result"]["text"], "ORPHAN");
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Middleware & ambient endpoints
// ============================================================================

#[tokio::test]
async fn test_request_id_is_echoed_or_generated() {
    let (base, _) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let client = client();

    let resp = client
        .get(format!("{base}/health"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .expect("test: request");
    assert_eq!(
        resp.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("req-123")
    );

    let resp = client
        .get(format!("{base}/health"))
        .send()
        .await
        .expect("test: request");
    assert!(resp.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let (base, _) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let resp = submit(&client(), &base, "alice", &"x".repeat(8192)).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_health_reports_version() {
    let (base, _) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let body: Value = client()
        .get(format!("{base}/health"))
        .send()
        .await
        .expect("test: request")
        .json()
        .await
        .expect("test: body");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_metrics_endpoint_serves_prometheus_text() {
    tokio_genjob::metrics::init_metrics().expect("test: init metrics");
    let (base, _) = spawn_server(test_config(), Arc::new(EchoEngine::new())).await;
    let client = client();
    submit(&client, &base, "alice", "count me").await;

    let text = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .expect("test: request")
        .text()
        .await
        .expect("test: body");
    assert!(text.contains("genjob_jobs_submitted_total"));
}
