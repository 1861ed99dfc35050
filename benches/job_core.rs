//! Job core benchmarks — admission and guarded-transition overhead.
//!
//! Everything here is in-process with the memory store, so the numbers are
//! the floor the HTTP layer and engine calls add to.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_genjob::{
    classify, EngineError, InputLimits, JobManager, JobOutcome, MemoryJobStore, RateLimiter,
};

fn manager() -> JobManager {
    JobManager::new(
        Arc::new(MemoryJobStore::new()),
        RateLimiter::new(usize::MAX, Duration::from_secs(60)),
        InputLimits::default(),
    )
}

// ---------------------------------------------------------------------------
// Bench: RateLimiter::admit across a varying number of submitters
// ---------------------------------------------------------------------------

fn bench_rate_limiter_admit(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let _guard = rt.enter();

    let mut group = c.benchmark_group("rate_limiter_admit");
    for submitters in [1usize, 100, 10_000] {
        let limiter = RateLimiter::new(usize::MAX, Duration::from_secs(60));
        let keys: Vec<String> = (0..submitters).map(|i| format!("user-{i}")).collect();
        let mut i = 0usize;
        group.bench_with_input(
            BenchmarkId::from_parameter(submitters),
            &submitters,
            |b, _| {
                b.iter(|| {
                    i = (i + 1) % keys.len();
                    black_box(limiter.admit(&keys[i]))
                })
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: submit → claim → finalize on the memory store
// ---------------------------------------------------------------------------

fn bench_lifecycle_cycle(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let manager = manager();

    c.bench_function("submit_claim_finalize", |b| {
        b.to_async(&rt).iter(|| async {
            let id = manager
                .submit(black_box("benchmark input".to_string()), "bench")
                .await
                .expect("submit");
            manager.claim(&id).await;
            let outcome = manager
                .finalize(&id, JobOutcome::Success(serde_json::json!({"ok": true})))
                .await;
            let _ = black_box(outcome);
        })
    });
}

// ---------------------------------------------------------------------------
// Bench: classify on text-only errors (worst case: pattern scan)
// ---------------------------------------------------------------------------

fn bench_classify_text(c: &mut Criterion) {
    let error = EngineError::Other("upstream said: something odd happened, no code".into());
    c.bench_function("classify_text_fallthrough", |b| {
        b.iter(|| black_box(classify(black_box(&error))))
    });
}

criterion_group!(
    benches,
    bench_rate_limiter_admit,
    bench_lifecycle_cycle,
    bench_classify_text
);
criterion_main!(benches);
