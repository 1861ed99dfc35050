//! # Job — the durable unit of asynchronous generation work
//!
//! ## Responsibility
//! Define the [`Job`] record, its [`JobStatus`] lifecycle, and the patches
//! and outcomes that move a job between states.
//!
//! ## Guarantees
//! - Monotonic: [`JobStatus::can_transition_to`] admits only
//!   `pending → processing → completed | failed`
//! - Serializable: the record round-trips through serde with camelCase
//!   field names, and status values serialize lowercase
//! - Terminal fields: `result` is only set on completed jobs, error fields
//!   only on failed jobs
//!
//! ## NOT Responsible For
//! - Enforcing transitions against concurrent writers (see: `store`)
//! - Deciding when to transition (see: `lifecycle`, `executor`)

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{ClassifiedError, ErrorCode};

/// Opaque, immutable job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Lifecycle status of a [`Job`].
///
/// Jobs progress: `Pending` → `Processing` → `Completed` | `Failed`
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Persisted, waiting for an executor to claim it.
    Pending,
    /// Claimed by exactly one executor, generation in flight.
    Processing,
    /// Generation finished; `result` is available.
    Completed,
    /// Generation failed; error fields are available.
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobStatus {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` once no further transition is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` if `self → next` is a legal edge of the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

/// A guarded write applied by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPatch {
    /// `pending → processing`.
    Claim,
    /// `processing → completed` carrying the engine output.
    Complete {
        /// Opaque payload produced by the generation engine.
        result: serde_json::Value,
    },
    /// `processing → failed` carrying the classified error.
    Fail(ClassifiedError),
}

impl JobPatch {
    /// Status the job holds after this patch is applied.
    pub fn target_status(&self) -> JobStatus {
        match self {
            Self::Claim => JobStatus::Processing,
            Self::Complete { .. } => JobStatus::Completed,
            Self::Fail(_) => JobStatus::Failed,
        }
    }
}

/// Terminal outcome handed to `finalize`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Engine returned a result.
    Success(serde_json::Value),
    /// Engine (or the executor around it) failed.
    Failure(ClassifiedError),
}

impl JobOutcome {
    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "completed",
            Self::Failure(_) => "failed",
        }
    }

    pub(crate) fn into_patch(self) -> JobPatch {
        match self {
            Self::Success(result) => JobPatch::Complete { result },
            Self::Failure(error) => JobPatch::Fail(error),
        }
    }
}

/// The persisted job record.
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier, assigned at creation.
    pub id: JobId,
    /// Requesting principal.
    pub submitter_id: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Validated input payload.
    pub input: String,
    /// Engine output, present only when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Classified error code, present only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Human-readable failure description, present only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Whether resubmitting is likely to succeed, present only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
    /// Time the job entered a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh `pending` job.
    pub fn new(input: impl Into<String>, submitter_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            submitter_id: submitter_id.into(),
            status: JobStatus::Pending,
            input: input.into(),
            result: None,
            error_code: None,
            error_message: None,
            retryable: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply `patch` in place, stamping timestamps.
    ///
    /// Callers must have checked the transition is legal; the store does so
    /// under its write guard.
    pub(crate) fn apply(&mut self, patch: JobPatch, now: DateTime<Utc>) {
        self.status = patch.target_status();
        self.updated_at = now;
        match patch {
            JobPatch::Claim => {}
            JobPatch::Complete { result } => {
                self.result = Some(result);
                self.completed_at = Some(now);
            }
            JobPatch::Fail(error) => {
                self.error_code = Some(error.code);
                self.error_message = Some(error.message);
                self.retryable = Some(error.retryable);
                self.completed_at = Some(now);
            }
        }
    }

    /// The classified error recorded on a failed job.
    pub fn error(&self) -> Option<ClassifiedError> {
        let code = self.error_code?;
        Some(ClassifiedError {
            code,
            message: self.error_message.clone().unwrap_or_default(),
            retryable: self.retryable.unwrap_or_else(|| code.is_retryable()),
        })
    }
}

/// Client-facing view of a [`Job`], as returned by the status endpoint.
///
/// Omits the input, the submitter and the timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    /// Job identifier.
    pub job_id: JobId,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Engine output, present only when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Classified error code, present only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Failure description, present only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Retry hint, present only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl JobSnapshot {
    /// The classified error of a failed snapshot.
    ///
    /// A failed snapshot without an error code reads as [`ErrorCode::Unknown`].
    pub fn error(&self) -> Option<ClassifiedError> {
        if self.status != JobStatus::Failed {
            return None;
        }
        let code = self.error_code.unwrap_or(ErrorCode::Unknown);
        Some(ClassifiedError {
            code,
            message: self.error_message.clone().unwrap_or_default(),
            retryable: self.retryable.unwrap_or_else(|| code.is_retryable()),
        })
    }
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            result: job.result.clone(),
            error_code: job.error_code,
            error_message: job.error_message.clone(),
            retryable: job.retryable,
        }
    }
}
