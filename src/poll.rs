//! # Poll — client-side status watching
//!
//! ## Responsibility
//! Turn repeated status reads into a stream of [`PollEvent`]s until the job
//! settles, the attempt budget runs out, or the caller cancels.
//!
//! ## Guarantees
//! - Bounded: at most `max_attempts` reads, then [`PollEvent::TimedOut`]
//! - Never overlapping: each read is awaited before the next tick, and late
//!   ticks are delayed rather than bunched
//! - Monotonic progress: emitted percentages never decrease
//! - Cancellable: after [`PollHandle::cancel`] no further read is started
//!   and no further event is emitted
//!
//! ## NOT Responsible For
//! - Changing the job record (a client timeout is purely local)
//! - Retrying failed jobs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::classify::{ClassifiedError, ErrorCode};
use crate::job::{JobId, JobSnapshot, JobStatus};
use crate::lifecycle::JobManager;
use crate::store::StoreError;

/// Shortest interval [`watch`] uses; smaller values are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Errors from a [`StatusSource`] read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    /// The job does not exist.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The read could not be completed.
    #[error("status source unavailable: {0}")]
    Unavailable(String),

    /// The source answered with something other than a job snapshot.
    #[error("invalid status response: {0}")]
    InvalidResponse(String),
}

/// Anything that can report the current state of a job.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Read the current snapshot of `job_id`.
    async fn fetch(&self, job_id: &JobId) -> Result<JobSnapshot, PollError>;
}

#[async_trait]
impl StatusSource for JobManager {
    async fn fetch(&self, job_id: &JobId) -> Result<JobSnapshot, PollError> {
        match self.status(job_id).await {
            Ok(job) => Ok(JobSnapshot::from(&job)),
            Err(StoreError::NotFound(id)) => Err(PollError::NotFound(id)),
            Err(error) => Err(PollError::Unavailable(error.to_string())),
        }
    }
}

/// [`StatusSource`] that reads `GET /api/v1/status` over HTTP.
pub struct HttpStatusClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusClient {
    /// Client for a server at `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusClient {
    async fn fetch(&self, job_id: &JobId) -> Result<JobSnapshot, PollError> {
        let job_param = job_id.to_string();
        let response = self
            .client
            .get(format!("{}/api/v1/status", self.base_url))
            .query(&[("jobId", job_param.as_str())])
            .send()
            .await
            .map_err(|e| PollError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PollError::NotFound(*job_id));
        }
        if !status.is_success() {
            return Err(PollError::Unavailable(format!("status endpoint returned {status}")));
        }

        response
            .json::<JobSnapshot>()
            .await
            .map_err(|e| PollError::InvalidResponse(e.to_string()))
    }
}

/// Poll cadence and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between reads.
    pub interval: Duration,
    /// Reads allowed before giving up.
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

/// One observation emitted by [`watch`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// The job is still running.
    Progress {
        /// Status seen on this read.
        status: JobStatus,
        /// Coarse progress, never lower than a previously emitted value.
        percent: u8,
        /// 1-based read number.
        attempt: u32,
    },
    /// Terminal: the job completed.
    Completed {
        /// Engine output.
        result: Value,
    },
    /// Terminal: the job failed, or does not exist.
    Failed(ClassifiedError),
    /// Terminal: the read budget ran out before the job settled.
    TimedOut {
        /// Reads performed.
        attempts: u32,
    },
    /// A read failed; polling continues.
    SourceError {
        /// 1-based read number.
        attempt: u32,
        /// What went wrong.
        error: PollError,
    },
}

impl PollEvent {
    /// Whether this event ends the watch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed(_) | Self::TimedOut { .. }
        )
    }

    /// The error a caller should surface for a failed or timed-out watch.
    pub fn client_error(&self) -> Option<ClassifiedError> {
        match self {
            Self::Failed(error) => Some(error.clone()),
            Self::TimedOut { attempts } => Some(ClassifiedError::new(
                ErrorCode::Timeout,
                format!("job did not finish after {attempts} status checks"),
            )),
            _ => None,
        }
    }
}

/// Coarse progress shown for `status`.
pub fn progress_percent(status: JobStatus) -> u8 {
    match status {
        JobStatus::Pending => 10,
        JobStatus::Processing => 60,
        JobStatus::Completed => 100,
        JobStatus::Failed => 100,
    }
}

/// Owned handle to a running [`watch`] loop.
///
/// Dropping the handle does not stop the loop; dropping the event receiver
/// does.
pub struct PollHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop polling. No read starts and no event is emitted afterwards.
    ///
    /// Safe to call repeatedly and after the loop has ended.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Returns `true` once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit.
    pub async fn finished(self) {
        if let Err(error) = self.task.await {
            warn!(%error, "poll loop ended abnormally");
        }
    }
}

/// Start watching `job_id`.
///
/// Reads once immediately, then once per `config.interval` (at least
/// [`MIN_POLL_INTERVAL`]).
/// Must be called from within a Tokio runtime.
pub fn watch(
    source: Arc<dyn StatusSource>,
    job_id: JobId,
    config: PollConfig,
) -> (PollHandle, mpsc::Receiver<PollEvent>) {
    let (events_tx, events_rx) = mpsc::channel(16);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(poll_loop(source, job_id, config, events_tx, cancel_rx));
    (
        PollHandle {
            cancel: cancel_tx,
            task,
        },
        events_rx,
    )
}

async fn poll_loop(
    source: Arc<dyn StatusSource>,
    job_id: JobId,
    config: PollConfig,
    events: mpsc::Sender<PollEvent>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_percent = 0u8;

    for attempt in 1..=config.max_attempts {
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return,
            _ = ticker.tick() => {}
        }

        let read = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return,
            read = source.fetch(&job_id) => read,
        };

        let event = match read {
            Ok(snapshot) => match snapshot.status {
                JobStatus::Completed => PollEvent::Completed {
                    result: snapshot.result.unwrap_or(Value::Null),
                },
                JobStatus::Failed => PollEvent::Failed(
                    snapshot
                        .error()
                        .unwrap_or_else(|| ClassifiedError::new(ErrorCode::Unknown, "job failed")),
                ),
                status => {
                    last_percent = last_percent.max(progress_percent(status));
                    PollEvent::Progress {
                        status,
                        percent: last_percent,
                        attempt,
                    }
                }
            },
            Err(PollError::NotFound(_)) => PollEvent::Failed(ClassifiedError {
                code: ErrorCode::Unknown,
                message: "job not found".into(),
                retryable: false,
            }),
            Err(error) => {
                debug!(job_id = %job_id, attempt, %error, "status read failed");
                PollEvent::SourceError { attempt, error }
            }
        };

        let terminal = event.is_terminal();
        if !emit(&events, &mut cancel, event).await || terminal {
            return;
        }
    }

    debug!(job_id = %job_id, attempts = config.max_attempts, "poll budget exhausted");
    let timed_out = PollEvent::TimedOut {
        attempts: config.max_attempts,
    };
    emit(&events, &mut cancel, timed_out).await;
}

/// Send `event` unless cancellation wins first. Returns `false` when the
/// loop should stop.
async fn emit(
    events: &mpsc::Sender<PollEvent>,
    cancel: &mut watch::Receiver<bool>,
    event: PollEvent,
) -> bool {
    if *cancel.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancelled(cancel) => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

/// Resolves once cancellation is requested. Never resolves if the handle
/// was dropped without cancelling.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script of reads; the last entry repeats.
    struct ScriptedSource {
        script: Mutex<Vec<Result<JobSnapshot, PollError>>>,
        reads: AtomicU32,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<JobSnapshot, PollError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                reads: AtomicU32::new(0),
            })
        }

        fn reads(&self) -> u32 {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch(&self, _job_id: &JobId) -> Result<JobSnapshot, PollError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().expect("test: lock");
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    fn snap(status: JobStatus) -> Result<JobSnapshot, PollError> {
        Ok(JobSnapshot {
            job_id: JobId::new(),
            status,
            result: (status == JobStatus::Completed).then(|| serde_json::json!({"text": "done"})),
            error_code: None,
            error_message: None,
            retryable: None,
        })
    }

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(2),
            max_attempts,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<PollEvent>) -> Vec<PollEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_third_read() {
        let source = ScriptedSource::new(vec![
            snap(JobStatus::Pending),
            snap(JobStatus::Processing),
            snap(JobStatus::Completed),
        ]);
        let (handle, rx) = watch(source.clone(), JobId::new(), config(10));
        let events = collect(rx).await;
        handle.finished().await;

        assert_eq!(source.reads(), 3);
        assert_eq!(
            events,
            vec![
                PollEvent::Progress {
                    status: JobStatus::Pending,
                    percent: 10,
                    attempt: 1
                },
                PollEvent::Progress {
                    status: JobStatus::Processing,
                    percent: 60,
                    attempt: 2
                },
                PollEvent::Completed {
                    result: serde_json::json!({"text": "done"})
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_settling_job_times_out_after_budget() {
        let source = ScriptedSource::new(vec![snap(JobStatus::Pending)]);
        let (handle, rx) = watch(source.clone(), JobId::new(), config(5));
        let events = collect(rx).await;
        handle.finished().await;

        assert_eq!(source.reads(), 5);
        assert_eq!(events.len(), 6);
        let last = events.last().expect("test: last event");
        assert_eq!(last, &PollEvent::TimedOut { attempts: 5 });
        assert_eq!(
            last.client_error().expect("test: client error").code,
            ErrorCode::Timeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_never_goes_backwards() {
        let source = ScriptedSource::new(vec![
            snap(JobStatus::Processing),
            snap(JobStatus::Pending),
            snap(JobStatus::Completed),
        ]);
        let (_handle, rx) = watch(source, JobId::new(), config(10));
        let events = collect(rx).await;
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                PollEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_reports_stored_error() {
        let source = ScriptedSource::new(vec![Ok(JobSnapshot {
            job_id: JobId::new(),
            status: JobStatus::Failed,
            result: None,
            error_code: Some(ErrorCode::UpstreamRateLimited),
            error_message: Some("429".into()),
            retryable: Some(true),
        })]);
        let (_handle, rx) = watch(source, JobId::new(), config(10));
        let events = collect(rx).await;
        assert_eq!(
            events,
            vec![PollEvent::Failed(ClassifiedError {
                code: ErrorCode::UpstreamRateLimited,
                message: "429".into(),
                retryable: true,
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_job_is_terminal_and_not_retryable() {
        let id = JobId::new();
        let source = ScriptedSource::new(vec![Err(PollError::NotFound(id))]);
        let (_handle, rx) = watch(source.clone(), id, config(10));
        let events = collect(rx).await;

        assert_eq!(source.reads(), 1);
        match events.as_slice() {
            [PollEvent::Failed(err)] => {
                assert_eq!(err.code, ErrorCode::Unknown);
                assert!(!err.retryable);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_errors_count_as_attempts_and_do_not_stop_polling() {
        let source = ScriptedSource::new(vec![
            Err(PollError::Unavailable("connection reset".into())),
            snap(JobStatus::Completed),
        ]);
        let (_handle, rx) = watch(source.clone(), JobId::new(), config(10));
        let events = collect(rx).await;

        assert_eq!(source.reads(), 2);
        assert!(matches!(events[0], PollEvent::SourceError { attempt: 1, .. }));
        assert!(matches!(events[1], PollEvent::Completed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_reads_and_emits_nothing_more() {
        let source = ScriptedSource::new(vec![snap(JobStatus::Pending)]);
        let (handle, mut rx) = watch(source.clone(), JobId::new(), config(100));

        let first = rx.recv().await.expect("test: first event");
        assert!(matches!(first, PollEvent::Progress { attempt: 1, .. }));

        handle.cancel();
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(source.reads(), 1);
        assert!(handle.is_finished());
        assert!(rx.recv().await.is_none());

        handle.cancel();
        handle.finished().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_follow_interval() {
        let source = ScriptedSource::new(vec![snap(JobStatus::Processing)]);
        let (handle, _rx) = watch(source.clone(), JobId::new(), config(100));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.reads(), 1, "immediate first read");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.reads(), 2);

        handle.cancel();
        handle.finished().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_ends_with_timed_out() {
        let source = ScriptedSource::new(vec![snap(JobStatus::Pending)]);
        let zero = PollConfig {
            interval: Duration::ZERO,
            max_attempts: 3,
        };
        let (handle, rx) = watch(source.clone(), JobId::new(), zero);
        let events = collect(rx).await;
        handle.finished().await;

        assert_eq!(source.reads(), 3);
        assert_eq!(events.last(), Some(&PollEvent::TimedOut { attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_event_blocked_on_full_channel() {
        let source = ScriptedSource::new(vec![snap(JobStatus::Processing)]);
        let fast = PollConfig {
            interval: Duration::from_millis(10),
            max_attempts: 1000,
        };
        let (handle, mut rx) = watch(source.clone(), JobId::new(), fast);

        // Nobody drains, so the channel fills and the loop parks on a send.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let reads_when_full = source.reads();
        assert!(reads_when_full < 1000);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(handle.is_finished());
        assert_eq!(source.reads(), reads_when_full);

        let mut buffered = 0;
        while let Some(event) = rx.recv().await {
            assert!(!event.is_terminal());
            buffered += 1;
        }
        assert_eq!(buffered, 16);
        handle.finished().await;
    }
}
