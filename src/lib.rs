//! # tokio-genjob
//!
//! Asynchronous generation-job core over Tokio.
//!
//! ## Architecture
//!
//! Submission is synchronous and cheap; generation is detached and polled:
//! ```text
//! submit ─► validate ─► admit ─► store(pending) ─► 202 {jobId}
//!                                     │
//!                 ┌───────────────────┴───────────────────┐
//!           primary task                          fallback task(s)
//!                 └──► claim (CAS pending→processing) ◄───┘
//!                              │ winner only
//!                        engine ─► classify ─► finalize(completed | failed)
//!
//! client: watch(jobId) ─► status reads every interval ─► Completed | Failed | TimedOut
//! ```
//!
//! - [`rate_limit`]: per-submitter fixed-window admission
//! - [`lifecycle`]: submit, claim, finalize
//! - [`store`]: guarded job persistence
//! - [`executor`]: detached dual-trigger execution and the stuck-job sweep
//! - [`classify`]: closed error taxonomy
//! - [`poll`]: bounded, cancellable client watch loop

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![warn(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod classify;
pub mod config;
pub mod engine;
pub mod executor;
pub mod job;
pub mod lifecycle;
pub mod metrics;
pub mod poll;
pub mod rate_limit;
pub mod retry;
pub mod store;

#[cfg(feature = "web-api")]
pub mod web_api;

// Re-exports for convenience
pub use classify::{classify, ClassifiedError, EngineError, ErrorCode};
pub use engine::{EchoEngine, GenerationEngine, HttpEngine};
pub use executor::{Executor, ExecutorConfig, RunOutcome, Trigger};
pub use job::{Job, JobId, JobOutcome, JobSnapshot, JobStatus};
pub use lifecycle::{FinalizeOutcome, InputLimits, JobManager, SubmitError};
pub use poll::{watch, HttpStatusClient, PollConfig, PollEvent, PollHandle, StatusSource};
pub use rate_limit::RateLimiter;
pub use store::{JobStore, MemoryJobStore, StoreError};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`GenJobError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use tokio_genjob::{init_tracing, GenJobError};
/// # fn example() -> Result<(), GenJobError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), GenJobError> {
    init_tracing_with("pretty")
}

/// Like [`init_tracing`], but uses `default_format` when `LOG_FORMAT` is
/// unset.
///
/// # Errors
///
/// Returns [`GenJobError::Other`] if the global subscriber is already set.
pub fn init_tracing_with(default_format: &str) -> Result<(), GenJobError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| default_format.to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| GenJobError::Other(format!("tracing init failed: {e}")))
}

/// Top-level errors for service startup and plumbing.
///
/// Job-level failures never surface here; they are classified and stored
/// on the job.
#[derive(Error, Debug)]
pub enum GenJobError {
    /// The configuration file is missing, malformed, or invalid.
    #[error(transparent)]
    Config(#[from] config::validation::ConfigError),

    /// A socket or file operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
