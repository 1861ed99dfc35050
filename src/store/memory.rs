//! In-memory [`JobStore`] backed by a [`DashMap`].
//!
//! The shard write guard returned by `get_mut` is held across the status
//! check and the write, which makes [`JobStore::update`] a true
//! compare-and-swap within the process.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use super::{JobStore, StoreError};
use crate::job::{Job, JobId, JobPatch, JobStatus};

/// Process-local job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<JobId, Job>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns `true` if no job has been created.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: String, submitter_id: &str) -> Result<Job, StoreError> {
        let job = Job::new(input, submitter_id);
        self.jobs.insert(job.id, job.clone());
        debug!(job_id = %job.id, submitter_id, "job created");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> Result<Job, StoreError> {
        self.jobs
            .get(id)
            .map(|job| job.clone())
            .ok_or(StoreError::NotFound(*id))
    }

    async fn update(
        &self,
        id: &JobId,
        expected: JobStatus,
        patch: JobPatch,
    ) -> Result<Job, StoreError> {
        let target = patch.target_status();
        if !expected.can_transition_to(target) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: target,
            });
        }

        let mut job = self.jobs.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        if job.status != expected {
            return Err(StoreError::Conflict {
                id: *id,
                expected,
                actual: job.status,
            });
        }

        job.apply(patch, Utc::now());
        debug!(job_id = %id, from = %expected, to = %target, "job transitioned");
        Ok(job.clone())
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs.truncate(limit);
        Ok(jobs)
    }
}
