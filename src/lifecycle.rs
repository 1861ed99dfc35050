//! # Lifecycle — job creation and guarded state transitions
//!
//! ## Responsibility
//! Own submission (validate → admit → persist `pending` → return id) and
//! every legal transition afterwards: `claim` (`pending → processing`) and
//! `finalize` (`processing → completed | failed`).
//!
//! ## Guarantees
//! - `submit` never touches the generation engine and never creates a job
//!   for a rejected request
//! - `claim` returns `true` to exactly one caller per job
//! - `finalize` is idempotent: a job that is no longer `processing` is left
//!   alone and the call reports [`FinalizeOutcome::AlreadySettled`]
//!
//! ## NOT Responsible For
//! - Running the engine (see: `executor`)
//! - Persistence mechanics (see: `store`)

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::job::{Job, JobId, JobOutcome, JobPatch, JobStatus};
use crate::metrics;
use crate::rate_limit::RateLimiter;
use crate::store::{JobStore, StoreError};

/// Input validation bounds for [`JobManager::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLimits {
    /// Largest accepted input, in bytes.
    pub max_input_bytes: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 64 * 1024,
        }
    }
}

/// Synchronous rejection reasons from [`JobManager::submit`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitError {
    /// The input is empty or too large.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The submitter exhausted its admission window.
    #[error("rate limited: submitter {0} exceeded its admission window")]
    RateLimited(String),

    /// The job record could not be persisted.
    #[error("could not persist job: {0}")]
    Storage(#[from] StoreError),
}

impl SubmitError {
    /// Wire code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid-input",
            Self::RateLimited(_) => "rate-limited",
            Self::Storage(_) => "storage-error",
        }
    }

    /// Whether the same request may succeed later.
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::InvalidInput(_))
    }
}

/// Result of a [`JobManager::finalize`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// This call recorded the outcome.
    Applied(Job),
    /// The job was not `processing`; nothing was written.
    AlreadySettled(JobStatus),
}

/// Creates jobs and performs every guarded transition on them.
///
/// Cheap to clone; clones share the store and the rate limiter.
#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn JobStore>,
    limiter: RateLimiter,
    limits: InputLimits,
}

impl JobManager {
    /// Build a manager over `store`.
    pub fn new(store: Arc<dyn JobStore>, limiter: RateLimiter, limits: InputLimits) -> Self {
        Self {
            store,
            limiter,
            limits,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// The submit-side rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Validate, admit and persist a new `pending` job.
    ///
    /// Validation runs before admission so malformed requests do not
    /// consume the submitter's quota.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::InvalidInput`] for empty or oversized input
    /// - [`SubmitError::RateLimited`] when the limiter rejects the submitter
    /// - [`SubmitError::Storage`] when the record cannot be created
    pub async fn submit(&self, input: String, submitter_id: &str) -> Result<JobId, SubmitError> {
        if let Err(err) = self.validate(&input) {
            metrics::inc_submit_rejected(err.code());
            return Err(err);
        }

        if !self.limiter.admit(submitter_id) {
            metrics::inc_submit_rejected("rate-limited");
            return Err(SubmitError::RateLimited(submitter_id.to_string()));
        }

        let job = self.store.create(input, submitter_id).await.map_err(|e| {
            metrics::inc_submit_rejected("storage-error");
            SubmitError::Storage(e)
        })?;

        metrics::inc_submitted();
        info!(job_id = %job.id, submitter_id, "job submitted");
        Ok(job.id)
    }

    fn validate(&self, input: &str) -> Result<(), SubmitError> {
        if input.trim().is_empty() {
            return Err(SubmitError::InvalidInput("input must not be empty".into()));
        }
        if input.len() > self.limits.max_input_bytes {
            return Err(SubmitError::InvalidInput(format!(
                "input is {} bytes, limit is {}",
                input.len(),
                self.limits.max_input_bytes
            )));
        }
        Ok(())
    }

    /// Try to take ownership of a `pending` job.
    ///
    /// Returns `true` only to the caller whose guarded write succeeded.
    /// Every other caller, and any caller hitting a missing job or a store
    /// failure, gets `false`.
    pub async fn claim(&self, job_id: &JobId) -> bool {
        match self
            .store
            .update(job_id, JobStatus::Pending, JobPatch::Claim)
            .await
        {
            Ok(_) => {
                debug!(job_id = %job_id, "claim won");
                true
            }
            Err(StoreError::Conflict { actual, .. }) => {
                debug!(job_id = %job_id, status = %actual, "claim lost");
                false
            }
            Err(error) => {
                warn!(job_id = %job_id, %error, "claim failed");
                false
            }
        }
    }

    /// Record the terminal outcome of a `processing` job.
    ///
    /// # Errors
    ///
    /// Only backend failures ([`StoreError::Backend`]) and a vanished job
    /// ([`StoreError::NotFound`]) are errors. A job that is not
    /// `processing` yields `Ok(FinalizeOutcome::AlreadySettled)`.
    pub async fn finalize(
        &self,
        job_id: &JobId,
        outcome: JobOutcome,
    ) -> Result<FinalizeOutcome, StoreError> {
        let label = outcome.label();
        let code = match &outcome {
            JobOutcome::Success(_) => "none",
            JobOutcome::Failure(error) => error.code.as_str(),
        };

        match self
            .store
            .update(job_id, JobStatus::Processing, outcome.into_patch())
            .await
        {
            Ok(job) => {
                metrics::inc_finalized(label, code);
                info!(job_id = %job_id, outcome = label, code, "job finalized");
                Ok(FinalizeOutcome::Applied(job))
            }
            Err(StoreError::Conflict { actual, .. }) => {
                debug!(job_id = %job_id, status = %actual, "finalize skipped, job already settled");
                Ok(FinalizeOutcome::AlreadySettled(actual))
            }
            Err(error) => Err(error),
        }
    }

    /// Current job record.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids, or a backend failure.
    pub async fn status(&self, job_id: &JobId) -> Result<Job, StoreError> {
        self.store.get(job_id).await
    }
}
