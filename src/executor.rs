//! # Executor — detached, dual-triggered job execution
//!
//! ## Responsibility
//! Start generation work out-of-band once `submit` has returned an id:
//! a primary detached task runs immediately and a fallback task retries the
//! same sequence shortly after. Both run claim → engine → finalize.
//!
//! ## Guarantees
//! - At most one engine invocation per job: only the winner of the guarded
//!   `claim` reaches the engine, regardless of how many triggers race
//! - Error boundary: engine errors, timeouts and panics are classified and
//!   recorded via `finalize`; nothing escapes the detached task
//! - Bounded: at most `max_concurrent` jobs are `processing` through this
//!   executor at once; a run takes its permit before claiming
//!
//! ## NOT Responsible For
//! - Creating jobs or validating input (see: `lifecycle`)
//! - Classification rules (see: `classify`)

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::classify::{classify, ClassifiedError, EngineError, ErrorCode};
use crate::engine::GenerationEngine;
use crate::job::{JobId, JobOutcome, JobStatus};
use crate::lifecycle::{FinalizeOutcome, JobManager};
use crate::metrics;
use crate::retry::{retry_if, RetryPolicy};
use crate::store::StoreError;

/// Most `processing` jobs examined per sweep.
const SWEEP_BATCH: usize = 1000;

/// Tunables for [`Executor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Engine calls allowed in flight at once.
    pub max_concurrent: usize,
    /// Deadline for a single engine call.
    pub engine_timeout: Duration,
    /// Delay before each fallback attempt.
    pub fallback_delay: Duration,
    /// Fallback attempts made while the job is still `pending`.
    pub fallback_attempts: u32,
    /// Retry policy for recording an outcome after a store failure.
    pub finalize_retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            engine_timeout: Duration::from_secs(120),
            fallback_delay: Duration::from_secs(2),
            fallback_attempts: 3,
            finalize_retry: RetryPolicy::default(),
        }
    }
}

/// Which path started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The detached task spawned by [`Executor::dispatch`].
    Primary,
    /// The delayed reliability task spawned by [`Executor::dispatch`].
    Fallback,
    /// A [`Executor::process_pending`] scan.
    PendingScan,
}

impl Trigger {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::PendingScan => "pending-scan",
        }
    }
}

/// What a single [`Executor::run`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another caller owns (or already settled) the job.
    NotClaimed,
    /// This run invoked the engine and recorded the outcome.
    Finalized(JobOutcome),
    /// This run invoked the engine but the job was settled by someone else
    /// (the stuck-job sweep) before the outcome could be recorded.
    Superseded(JobStatus),
    /// The outcome could not be written; the job stays `processing` until
    /// the sweep fails it.
    Unrecorded(StoreError),
}

/// Handles for the two trigger paths started by [`Executor::dispatch`].
///
/// Dropping them detaches the tasks; they keep running.
pub struct DispatchHandles {
    /// Immediate claim-run-finalize task.
    pub primary: JoinHandle<RunOutcome>,
    /// Delayed fallback task.
    pub fallback: JoinHandle<RunOutcome>,
}

struct Inner {
    manager: JobManager,
    engine: Arc<dyn GenerationEngine>,
    permits: Arc<Semaphore>,
    config: ExecutorConfig,
}

/// Runs jobs detached from the request that created them.
///
/// Cheap to clone; clones share the engine, the manager and the worker
/// permits.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    /// Build an executor.
    pub fn new(
        manager: JobManager,
        engine: Arc<dyn GenerationEngine>,
        config: ExecutorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner: Arc::new(Inner {
                manager,
                engine,
                permits,
                config,
            }),
        }
    }

    /// The lifecycle manager this executor finalizes through.
    pub fn manager(&self) -> &JobManager {
        &self.inner.manager
    }

    /// Start both trigger paths for `job_id` and return without waiting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, job_id: JobId) -> DispatchHandles {
        let primary = {
            let this = self.clone();
            tokio::spawn(async move { this.run(job_id, Trigger::Primary).await })
        };
        let fallback = {
            let this = self.clone();
            tokio::spawn(async move { this.run_fallback(job_id).await })
        };
        debug!(job_id = %job_id, "dispatched primary and fallback triggers");
        DispatchHandles { primary, fallback }
    }

    /// Fallback path: after each delay, attempt the same claim-run-finalize
    /// sequence. Stops as soon as the job is no longer `pending`.
    async fn run_fallback(&self, job_id: JobId) -> RunOutcome {
        let attempts = self.inner.config.fallback_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.inner.config.fallback_delay).await;

            let outcome = self.run(job_id, Trigger::Fallback).await;
            if outcome != RunOutcome::NotClaimed {
                return outcome;
            }

            match self.inner.manager.status(&job_id).await {
                Ok(job) if job.status == JobStatus::Pending => {
                    debug!(job_id = %job_id, attempt, "job still pending after fallback attempt");
                }
                Ok(_) => return RunOutcome::NotClaimed,
                Err(StoreError::NotFound(_)) => return RunOutcome::NotClaimed,
                Err(error) => {
                    warn!(job_id = %job_id, attempt, %error, "fallback could not read job");
                }
            }
        }
        RunOutcome::NotClaimed
    }

    /// Take a worker permit, claim `job_id` and, if this caller wins, run
    /// the engine and record the outcome.
    ///
    /// The permit is held from before the claim until the outcome is
    /// recorded, so a job is only `processing` while a worker owns it.
    #[instrument(name = "run_job", skip_all, fields(job_id = %job_id, trigger = trigger.as_str()))]
    pub async fn run(&self, job_id: JobId, trigger: Trigger) -> RunOutcome {
        let manager = &self.inner.manager;

        let permit = match self.inner.permits.clone().acquire_owned().await {
            Ok(permit) => Arc::new(permit),
            Err(_) => {
                warn!("executor is shut down, leaving job pending");
                return RunOutcome::NotClaimed;
            }
        };

        let won = manager.claim(&job_id).await;
        metrics::inc_claim(trigger.as_str(), won);
        if !won {
            return RunOutcome::NotClaimed;
        }

        let outcome = match manager.status(&job_id).await {
            Ok(job) => self.generate(job.input, permit.clone()).await,
            Err(error) => {
                warn!(%error, "claimed job could not be read back");
                JobOutcome::Failure(classify(&EngineError::Storage(error.to_string())))
            }
        };

        let finalized = retry_if(
            &self.inner.config.finalize_retry,
            || manager.finalize(&job_id, outcome.clone()),
            |e| matches!(e, StoreError::Backend(_)),
        )
        .await;
        drop(permit);

        match finalized {
            Ok(FinalizeOutcome::Applied(_)) => RunOutcome::Finalized(outcome),
            Ok(FinalizeOutcome::AlreadySettled(status)) => {
                warn!(status = %status, "job was settled before this run could record it");
                RunOutcome::Superseded(status)
            }
            Err(error) => {
                error!(%error, "could not record job outcome, leaving for sweep");
                RunOutcome::Unrecorded(error)
            }
        }
    }

    /// Invoke the engine on its own task under a deadline.
    ///
    /// The engine task shares the run's permit, so an aborted run does not
    /// free the slot while the engine call is still in flight.
    async fn generate(&self, input: String, permit: Arc<OwnedSemaphorePermit>) -> JobOutcome {
        let engine = self.inner.engine.clone();
        let deadline = self.inner.config.engine_timeout;
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            tokio::time::timeout(deadline, engine.generate(&input)).await
        });

        let result = match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(EngineError::Timeout(format!(
                "engine exceeded {}ms",
                deadline.as_millis()
            ))),
            Err(join) if join.is_panic() => {
                Err(EngineError::Other(format!("engine panicked: {}", panic_message(join))))
            }
            Err(join) => Err(EngineError::Other(format!("engine task cancelled: {join}"))),
        };
        metrics::record_engine_latency(started.elapsed());

        match result {
            Ok(value) => JobOutcome::Success(value),
            Err(error) => {
                let classified = classify(&error);
                warn!(code = %classified.code, retryable = classified.retryable, %error, "engine failed");
                JobOutcome::Failure(classified)
            }
        }
    }

    /// Run every currently `pending` job (up to `limit`) that this caller
    /// manages to claim. Returns how many this call executed.
    ///
    /// This is the entry point behind the fallback-trigger endpoint.
    pub async fn process_pending(&self, limit: usize) -> usize {
        let pending = match self
            .inner
            .manager
            .store()
            .list_by_status(JobStatus::Pending, limit)
            .await
        {
            Ok(jobs) => jobs,
            Err(error) => {
                warn!(%error, "could not list pending jobs");
                return 0;
            }
        };

        let mut set = JoinSet::new();
        for job in pending {
            let this = self.clone();
            set.spawn(async move { this.run(job.id, Trigger::PendingScan).await });
        }

        let mut executed = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(RunOutcome::NotClaimed) => {}
                Ok(_) => executed += 1,
                Err(error) => error!(%error, "pending-scan task failed"),
            }
        }
        if executed > 0 {
            info!(executed, "pending scan executed jobs");
        }
        executed
    }

    /// Fail jobs stuck in `processing` for longer than `older_than`.
    ///
    /// Uses the same guarded `processing → failed` write as `finalize`, so a
    /// late outcome from the original owner becomes a no-op. Returns how
    /// many jobs this call failed.
    pub async fn sweep_stuck(&self, older_than: Duration) -> usize {
        let manager = &self.inner.manager;
        let processing = match manager
            .store()
            .list_by_status(JobStatus::Processing, SWEEP_BATCH)
            .await
        {
            Ok(jobs) => jobs,
            Err(error) => {
                warn!(%error, "could not list processing jobs");
                return 0;
            }
        };

        let Ok(older_than) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let cutoff = Utc::now() - older_than;
        let mut swept = 0;
        for job in processing.into_iter().filter(|j| j.updated_at < cutoff) {
            let error = ClassifiedError::new(ErrorCode::Timeout, "job exceeded processing deadline");
            match manager.finalize(&job.id, JobOutcome::Failure(error)).await {
                Ok(FinalizeOutcome::Applied(_)) => {
                    warn!(job_id = %job.id, "stuck job failed by sweep");
                    swept += 1;
                }
                Ok(FinalizeOutcome::AlreadySettled(_)) => {}
                Err(error) => warn!(job_id = %job.id, %error, "sweep could not fail job"),
            }
        }
        metrics::inc_swept(swept);
        swept
    }

    /// Run [`sweep_stuck`](Self::sweep_stuck) every `interval` until the
    /// returned handle is aborted. Each tick also drops expired rate-limit
    /// windows.
    pub fn spawn_sweeper(&self, interval: Duration, older_than: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                this.sweep_stuck(older_than).await;
                let purged = this.inner.manager.limiter().purge_expired();
                if purged > 0 {
                    debug!(purged, "dropped expired rate-limit windows");
                }
            }
        })
    }
}

fn panic_message(join: tokio::task::JoinError) -> String {
    let payload = join.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
