//! # Store — job record persistence contract
//!
//! ## Responsibility
//! Define the [`JobStore`] contract the lifecycle manager writes through:
//! create, read-by-id, guarded update-by-id, and a status listing used by
//! the fallback trigger and the stuck-job sweep.
//!
//! ## Guarantees
//! - Guarded writes: [`JobStore::update`] applies a patch only if the stored
//!   status equals `expected`; otherwise it reports
//!   [`StoreError::Conflict`] and leaves the record untouched
//! - Monotonic: patches that are not a legal forward edge are rejected with
//!   [`StoreError::InvalidTransition`]
//!
//! ## NOT Responsible For
//! - Choosing when to transition (see: `lifecycle`)
//! - Cross-process durability (an implementation concern; [`MemoryJobStore`]
//!   is process-local)

pub mod memory;

pub use memory::MemoryJobStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{Job, JobId, JobPatch, JobStatus};

/// Errors reported by a [`JobStore`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No job with this identifier exists.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The stored status did not match the guard.
    #[error("job {id} is {actual}, expected {expected}")]
    Conflict {
        /// Job that was being written.
        id: JobId,
        /// Status the writer required.
        expected: JobStatus,
        /// Status actually stored.
        actual: JobStatus,
    },

    /// The patch does not describe a legal forward transition.
    #[error("illegal transition {from} -> {to}")]
    InvalidTransition {
        /// Guard status supplied by the caller.
        from: JobStatus,
        /// Status the patch would produce.
        to: JobStatus,
    },

    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Contract over the external job record store.
///
/// Implementations must make [`update`](JobStore::update) atomic with
/// respect to other `update` calls on the same id: this compare-and-swap is
/// the only thing preventing two triggers from both running a job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `pending` job.
    async fn create(&self, input: String, submitter_id: &str) -> Result<Job, StoreError>;

    /// Read a job by id.
    async fn get(&self, id: &JobId) -> Result<Job, StoreError>;

    /// Apply `patch` only if the stored status equals `expected`.
    ///
    /// Returns the updated record.
    async fn update(
        &self,
        id: &JobId,
        expected: JobStatus,
        patch: JobPatch,
    ) -> Result<Job, StoreError>;

    /// Jobs currently in `status`, oldest first, at most `limit`.
    async fn list_by_status(&self, status: JobStatus, limit: usize)
        -> Result<Vec<Job>, StoreError>;
}
