//! Prometheus metrics for the job core.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_submitted`, `inc_finalized`, …) are no-ops until then, so the job
//! core is always safe to run without observability.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `genjob_jobs_submitted_total` | Counter | |
//! | `genjob_submit_rejected_total` | Counter | `reason` |
//! | `genjob_claims_total` | Counter | `trigger`, `result` |
//! | `genjob_jobs_finalized_total` | Counter | `outcome`, `code` |
//! | `genjob_engine_duration_seconds` | Histogram | |
//! | `genjob_jobs_swept_total` | Counter | |

use crate::GenJobError;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

/// All job-core metrics bundled so they can live in one [`OnceLock`].
pub struct Metrics {
    /// Registry that owns every descriptor below.
    pub registry: Registry,
    /// Jobs accepted by `submit`.
    pub submitted: Counter,
    /// Submissions rejected, by reason code.
    pub submit_rejected: CounterVec,
    /// Claim attempts by trigger path and outcome.
    pub claims: CounterVec,
    /// Terminal transitions by outcome and error code.
    pub finalized: CounterVec,
    /// Generation engine call latency.
    pub engine_duration: Histogram,
    /// Processing jobs failed by the stuck-job sweep.
    pub swept: Counter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics_err(e: prometheus::Error) -> GenJobError {
    GenJobError::Other(format!("metrics init failed: {e}"))
}

impl Metrics {
    /// Build a bundle with every metric name prefixed by `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`GenJobError::Other`] if a descriptor is invalid or clashes.
    pub fn build(prefix: &str) -> Result<Self, GenJobError> {
        let registry = Registry::new();

        let submitted = Counter::new(
            format!("{prefix}_jobs_submitted_total"),
            "Jobs accepted by submit",
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(submitted.clone()))
            .map_err(metrics_err)?;

        let submit_rejected = CounterVec::new(
            Opts::new(
                format!("{prefix}_submit_rejected_total"),
                "Submissions rejected before a job was created",
            ),
            &["reason"],
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(submit_rejected.clone()))
            .map_err(metrics_err)?;

        let claims = CounterVec::new(
            Opts::new(format!("{prefix}_claims_total"), "Claim attempts"),
            &["trigger", "result"],
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(claims.clone()))
            .map_err(metrics_err)?;

        let finalized = CounterVec::new(
            Opts::new(
                format!("{prefix}_jobs_finalized_total"),
                "Jobs moved to a terminal state",
            ),
            &["outcome", "code"],
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(finalized.clone()))
            .map_err(metrics_err)?;

        let engine_duration = Histogram::with_opts(HistogramOpts::new(
            format!("{prefix}_engine_duration_seconds"),
            "Generation engine call duration",
        ))
        .map_err(metrics_err)?;
        registry
            .register(Box::new(engine_duration.clone()))
            .map_err(metrics_err)?;

        let swept = Counter::new(
            format!("{prefix}_jobs_swept_total"),
            "Processing jobs failed by the stuck-job sweep",
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(swept.clone()))
            .map_err(metrics_err)?;

        Ok(Self {
            registry,
            submitted,
            submit_rejected,
            claims,
            finalized,
            engine_duration,
            swept,
        })
    }
}

/// Initialise the global metrics bundle.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`GenJobError::Other`] if metric construction fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), GenJobError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = Metrics::build("genjob")?;
    // A racing initialiser builds identical descriptors; whichever lands first wins.
    let _ = METRICS.set(bundle);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Count an accepted submission.
pub fn inc_submitted() {
    if let Some(m) = metrics() {
        m.submitted.inc();
    }
}

/// Count a rejected submission by reason code.
pub fn inc_submit_rejected(reason: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.submit_rejected.get_metric_with_label_values(&[reason]) {
            c.inc();
        }
    }
}

/// Count a claim attempt on the given trigger path.
pub fn inc_claim(trigger: &str, won: bool) {
    if let Some(m) = metrics() {
        let result = if won { "won" } else { "lost" };
        if let Ok(c) = m.claims.get_metric_with_label_values(&[trigger, result]) {
            c.inc();
        }
    }
}

/// Count a terminal transition.
pub fn inc_finalized(outcome: &str, code: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.finalized.get_metric_with_label_values(&[outcome, code]) {
            c.inc();
        }
    }
}

/// Record how long one engine call took.
pub fn record_engine_latency(d: Duration) {
    if let Some(m) = metrics() {
        m.engine_duration.observe(d.as_secs_f64());
    }
}

/// Count jobs failed by the sweep.
pub fn inc_swept(n: usize) {
    if let Some(m) = metrics() {
        m.swept.inc_by(n as f64);
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics were never initialised or encoding
/// fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
