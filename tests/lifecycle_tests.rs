//! End-to-end tests for the job lifecycle through the public API:
//! submit → dispatch → claim → engine → finalize, plus the stuck-job sweep.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tokio_genjob::retry::RetryPolicy;
use tokio_genjob::{
    EngineError, ErrorCode, Executor, ExecutorConfig, FinalizeOutcome, GenerationEngine,
    InputLimits, JobManager, JobOutcome, JobStatus, MemoryJobStore, RateLimiter, RunOutcome,
    Trigger,
};

struct SlowCountingEngine {
    calls: AtomicUsize,
    delay: Duration,
}

impl SlowCountingEngine {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationEngine for SlowCountingEngine {
    async fn generate(&self, input: &str) -> Result<Value, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "text": input }))
    }
}

fn manager(limit: usize) -> JobManager {
    JobManager::new(
        Arc::new(MemoryJobStore::new()),
        RateLimiter::new(limit, Duration::from_secs(60)),
        InputLimits::default(),
    )
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrent: 8,
        engine_timeout: Duration::from_secs(5),
        fallback_delay: Duration::from_millis(25),
        fallback_attempts: 2,
        finalize_retry: RetryPolicy::none(),
    }
}

#[tokio::test]
async fn test_submit_returns_promptly_without_touching_engine() {
    let engine = SlowCountingEngine::new(Duration::from_secs(30));
    let executor = Executor::new(manager(10), engine.clone(), config());

    let started = std::time::Instant::now();
    let id = executor
        .manager()
        .submit("long job".into(), "u")
        .await
        .expect("submit");
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(engine.calls(), 0);

    let job = executor.manager().status(&id).await.expect("status");
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_many_jobs_each_run_exactly_once_under_all_triggers() {
    let engine = SlowCountingEngine::new(Duration::from_millis(15));
    let executor = Executor::new(manager(100), engine.clone(), config());

    let mut ids = Vec::new();
    let mut handles = Vec::new();
    for i in 0..10 {
        let id = executor
            .manager()
            .submit(format!("job {i}"), "u")
            .await
            .expect("submit");
        handles.push(executor.dispatch(id));
        ids.push(id);
    }
    // A concurrent pending scan races the primary and fallback triggers.
    executor.process_pending(100).await;

    for h in handles {
        h.primary.await.expect("join primary");
        h.fallback.await.expect("join fallback");
    }

    assert_eq!(engine.calls(), ids.len());
    for id in ids {
        let job = executor.manager().status(&id).await.expect("status");
        assert_eq!(job.status, JobStatus::Completed);
    }
}

#[tokio::test]
async fn test_fallback_alone_completes_job() {
    let engine = SlowCountingEngine::new(Duration::ZERO);
    let executor = Executor::new(manager(10), engine.clone(), config());
    let id = executor
        .manager()
        .submit("x".into(), "u")
        .await
        .expect("submit");

    // The primary task is aborted before it is ever polled.
    let handles = executor.dispatch(id);
    handles.primary.abort();
    let _ = handles.fallback.await;

    let job = executor.manager().status(&id).await.expect("status");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_run_on_settled_job_is_not_claimed() {
    let engine = SlowCountingEngine::new(Duration::ZERO);
    let executor = Executor::new(manager(10), engine.clone(), config());
    let id = executor
        .manager()
        .submit("x".into(), "u")
        .await
        .expect("submit");

    assert!(matches!(
        executor.run(id, Trigger::Primary).await,
        RunOutcome::Finalized(JobOutcome::Success(_))
    ));
    assert_eq!(
        executor.run(id, Trigger::Fallback).await,
        RunOutcome::NotClaimed
    );
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_sweep_fails_job_whose_owner_vanished() {
    let engine = SlowCountingEngine::new(Duration::ZERO);
    let executor = Executor::new(manager(10), engine, config());
    let m = executor.manager().clone();
    let id = m.submit("x".into(), "u").await.expect("submit");

    // Claimed by an owner that never finalizes.
    assert!(m.claim(&id).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let sweeper = executor.spawn_sweeper(Duration::from_millis(10), Duration::from_millis(10));
    for _ in 0..50 {
        if m.status(&id).await.expect("status").status == JobStatus::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sweeper.abort();

    let job = m.status(&id).await.expect("status");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_code, Some(ErrorCode::Timeout));
    assert_eq!(
        job.error_message.as_deref(),
        Some("job exceeded processing deadline")
    );

    let late = m
        .finalize(&id, JobOutcome::Success(json!("late")))
        .await
        .expect("finalize");
    assert_eq!(late, FinalizeOutcome::AlreadySettled(JobStatus::Failed));
}
