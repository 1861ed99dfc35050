//! Web API Server
//!
//! HTTP surface for the job core. Submission returns immediately with a job
//! id; generation runs detached and clients poll for the outcome.
//!
//! ## Endpoints
//!
//! - `POST /api/v1/submit` — Create a job (`x-submitter-id` header required)
//! - `GET  /api/v1/status?jobId=` — Current job snapshot
//! - `POST /api/v1/fallback-trigger` — Run pending jobs nobody picked up
//! - `GET  /health` — Health check
//! - `GET  /metrics` — Prometheus metrics

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::GenJobConfig;
use crate::engine::GenerationEngine;
use crate::executor::Executor;
use crate::job::{JobId, JobSnapshot, JobStatus};
use crate::lifecycle::{JobManager, SubmitError};
use crate::rate_limit::RateLimiter;
use crate::store::{MemoryJobStore, StoreError};
use crate::GenJobError;

/// Header carrying the authenticated submitter identity.
pub const SUBMITTER_HEADER: &str = "x-submitter-id";

// ============================================================================
// Types
// ============================================================================

/// JSON body for `POST /api/v1/submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Text handed to the generation engine.
    pub input: String,
}

/// `202` body for `POST /api/v1/submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// Identifier to poll.
    pub job_id: JobId,
    /// Always `pending`.
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    #[serde(default)]
    job_id: Option<String>,
}

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Executor (and, through it, the lifecycle manager).
    pub executor: Executor,
    /// Most pending jobs one fallback-trigger call will pick up.
    pub pending_batch: usize,
}

// ============================================================================
// Server
// ============================================================================

/// Build the router with all routes and middleware.
pub fn router(state: AppState, max_request_size: usize) -> Router {
    Router::new()
        .route("/api/v1/submit", post(submit_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/fallback-trigger", post(fallback_trigger_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn_with_state(
            max_request_size,
            body_size_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wire an in-memory store, limiter, manager and executor from `config`
/// and return the executor alongside its router.
pub fn build_app(config: &GenJobConfig, engine: Arc<dyn GenerationEngine>) -> (Executor, Router) {
    let manager = JobManager::new(
        Arc::new(MemoryJobStore::new()),
        RateLimiter::new(config.limits.rate_limit_max, config.limits.window()),
        config.limits.input_limits(),
    );
    let executor = Executor::new(manager, engine, config.executor.executor_config());
    let state = AppState {
        executor: executor.clone(),
        pending_batch: config.executor.pending_batch,
    };
    (executor, router(state, config.server.max_request_size))
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish; detached job tasks are not
/// awaited.
///
/// # Errors
///
/// Returns [`GenJobError::Io`] if the server fails.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<(), GenJobError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Web API ready on http://{}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

/// Echoes the client's `X-Request-ID`, or generates one, on every response.
async fn request_id_middleware(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// Rejects requests whose `Content-Length` exceeds `max_size` with 413.
async fn body_size_middleware(
    State(max_size): State<usize>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(content_length) = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if content_length > max_size {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({
                    "code": "payload-too-large",
                    "message": "request body too large",
                    "retryable": false,
                })),
            )
                .into_response();
        }
    }

    next.run(req).await
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /api/v1/submit` — validate, admit, persist, then fire the executor
/// without waiting for it.
#[instrument(skip_all, fields(submitter_id = tracing::field::Empty))]
async fn submit_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let submitter_id = headers
        .get(SUBMITTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(AppError::Unauthenticated)?
        .to_string();
    tracing::Span::current().record("submitter_id", submitter_id.as_str());

    let Json(request) =
        payload.map_err(|rejection| AppError::InvalidInput(rejection.body_text()))?;

    let job_id = state
        .executor
        .manager()
        .submit(request.input, &submitter_id)
        .await?;

    // Detached: the response does not wait on either trigger.
    drop(state.executor.dispatch(job_id));

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}

/// `GET /api/v1/status?jobId=` — current snapshot of a job.
async fn status_handler(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<JobSnapshot>, AppError> {
    let raw = query
        .job_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("jobId is required".into()))?;
    let job_id: JobId = raw
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("jobId '{raw}' is not a valid id")))?;

    let job = state.executor.manager().status(&job_id).await?;
    Ok(Json(JobSnapshot::from(&job)))
}

/// `POST /api/v1/fallback-trigger` — best-effort sweep of `pending` jobs.
///
/// Always answers 200; the work runs detached and any failure is only
/// logged.
async fn fallback_trigger_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let executor = state.executor.clone();
    let batch = state.pending_batch;
    tokio::spawn(async move {
        executor.process_pending(batch).await;
    });
    Json(serde_json::json!({ "ok": true }))
}

/// `GET /health` — Health check endpoint.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /metrics` — Prometheus metrics endpoint.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

// ============================================================================
// Errors
// ============================================================================

/// Application-level errors returned by API handlers.
///
/// Each variant maps to an HTTP status code and a JSON body of the form
/// `{"code", "message", "retryable"}`.
#[derive(Debug)]
enum AppError {
    /// No submitter identity on the request.
    Unauthenticated,
    /// Malformed body, query or input.
    InvalidInput(String),
    /// Submitter exceeded its admission window.
    RateLimited(String),
    /// Unknown job id.
    NotFound(JobId),
    /// The job store failed.
    Storage(String),
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::InvalidInput(msg) => Self::InvalidInput(msg),
            SubmitError::RateLimited(id) => {
                Self::RateLimited(format!("submitter {id} exceeded its admission window"))
            }
            SubmitError::Storage(e) => Self::Storage(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, retryable) = match self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                format!("missing {SUBMITTER_HEADER} header"),
                false,
            ),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "invalid-input", msg, false),
            AppError::RateLimited(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "rate-limited", msg, true)
            }
            AppError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "not-found",
                format!("job {id} not found"),
                false,
            ),
            AppError::Storage(msg) => {
                warn!(error = %msg, "storage error surfaced to client");
                (StatusCode::SERVICE_UNAVAILABLE, "storage-error", msg, true)
            }
        };

        (
            status,
            Json(serde_json::json!({
                "code": code,
                "message": message,
                "retryable": retryable,
            })),
        )
            .into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================
