//! Generation engine abstraction and implementations
//!
//! Provides the [`GenerationEngine`] trait consumed by the executor and two
//! implementations:
//! - [`EchoEngine`]: testing/demo engine
//! - [`HttpEngine`]: JSON-over-HTTP generation backend
//!
//! Engines report failures as [`EngineError`]; the executor classifies them
//! before they are persisted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::classify::EngineError;
use crate::config::{EngineConfig, EngineKind};
use crate::GenJobError;

/// Turns validated input text into an opaque structured result.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via
/// `Arc<dyn GenerationEngine>`.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Generate output for `input`.
    async fn generate(&self, input: &str) -> Result<Value, EngineError>;
}

// ============================================================================
// Echo Engine (Testing)
// ============================================================================

/// Echo engine for testing
///
/// Returns `{"text": input, "words": n}` after a simulated delay.
pub struct EchoEngine {
    /// Simulated generation delay
    pub delay: Duration,
}

impl EchoEngine {
    /// Echo engine with a 10ms delay.
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(10),
        }
    }

    /// Echo engine with a custom delay.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationEngine for EchoEngine {
    async fn generate(&self, input: &str) -> Result<Value, EngineError> {
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({
            "text": input,
            "words": input.split_whitespace().count(),
        }))
    }
}

// ============================================================================
// HTTP Engine
// ============================================================================

/// Request payload posted to the generation backend
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    input: &'a str,
}

/// Generation backend reached over HTTP.
///
/// POSTs `{"input": ...}` as JSON to `url` and expects a JSON object back.
/// Transport timeouts become [`EngineError::Timeout`], non-2xx statuses
/// become [`EngineError::Upstream`] with the status attached, and bodies that
/// are not a JSON object become [`EngineError::InvalidResponse`].
///
/// ## Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio_genjob::engine::HttpEngine;
///
/// let engine = Arc::new(
///     HttpEngine::new("http://localhost:8000/generate")
///         .with_timeout(Duration::from_secs(120))
/// );
/// ```
pub struct HttpEngine {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpEngine {
    /// Create an engine posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl GenerationEngine for HttpEngine {
    async fn generate(&self, input: &str) -> Result<Value, EngineError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&GenerateRequest { input })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(format!("generation request timed out: {e}"))
                } else {
                    EngineError::Upstream {
                        status: e.status().map(|s| s.as_u16()),
                        message: format!("generation request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Upstream {
                status: Some(status.as_u16()),
                message: error_text,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(format!("failed to parse response: {e}")))?;

        if !body.is_object() {
            return Err(EngineError::InvalidResponse(
                "expected a JSON object".to_string(),
            ));
        }

        Ok(body)
    }
}

/// Build the engine selected by `config`.
///
/// # Errors
///
/// Returns [`GenJobError::Other`] if the `http` engine has no URL.
pub fn build_engine(config: &EngineConfig) -> Result<Arc<dyn GenerationEngine>, GenJobError> {
    match config.kind {
        EngineKind::Echo => Ok(Arc::new(EchoEngine::new())),
        EngineKind::Http => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| GenJobError::Other("engine.url is required for the http engine".into()))?;
            Ok(Arc::new(
                HttpEngine::new(url).with_timeout(Duration::from_millis(config.timeout_ms)),
            ))
        }
    }
}
