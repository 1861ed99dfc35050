//! # Declarative Service Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file that configures the job service:
//! ```text
//! genjob --config genjob.toml
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `GenJobConfig`
//! - Complete: every field has a default, so an empty file is a valid config
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the runtime from config (that belongs to the binary)
//! - Hot reload

pub mod loader;
pub mod validation;

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::executor::ExecutorConfig;
use crate::lifecycle::InputLimits;
use crate::poll::PollConfig;
use crate::retry::RetryPolicy;

// ── Default value functions ──────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Default request body limit: 1 MiB.
fn default_max_request_size() -> usize {
    1024 * 1024
}

/// Default input limit: 64 KiB.
fn default_max_input_bytes() -> usize {
    64 * 1024
}

fn default_rate_limit_max() -> usize {
    10
}

fn default_rate_limit_window_s() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    16
}

/// Default engine deadline: 120s.
fn default_engine_timeout_ms() -> u64 {
    120_000
}

fn default_fallback_delay_ms() -> u64 {
    2_000
}

fn default_fallback_attempts() -> u32 {
    3
}

/// Default stuck-job age: 10 minutes.
fn default_stuck_after_s() -> u64 {
    600
}

fn default_sweep_interval_s() -> u64 {
    60
}

fn default_pending_batch() -> usize {
    50
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

/// Default poll budget: 150 reads (5 minutes at 2s).
fn default_poll_max_attempts() -> u32 {
    150
}

fn default_engine_http_timeout_ms() -> u64 {
    60_000
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a job service instance.
///
/// # Example
///
/// ```toml
/// [server]
/// port = 9000
///
/// [limits]
/// rate_limit_max = 10
/// rate_limit_window_s = 60
///
/// [engine]
/// kind = "http"
/// url = "http://localhost:8000/generate"
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct GenJobConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Input validation and admission settings.
    pub limits: LimitsConfig,
    /// Execution trigger settings.
    pub executor: ExecutorSection,
    /// Client poll cadence, used by tooling built on this crate.
    pub polling: PollingConfig,
    /// Generation backend selection.
    pub engine: EngineConfig,
    /// Logging.
    pub observability: ObservabilityConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ServerConfig {
    /// IP address or hostname to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port the server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum allowed request body size in bytes.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_request_size: default_max_request_size(),
        }
    }
}

/// Validation and admission control.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LimitsConfig {
    /// Largest accepted input in bytes.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
    /// Submissions admitted per submitter per window.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,
    /// Window length in seconds.
    #[serde(default = "default_rate_limit_window_s")]
    pub rate_limit_window_s: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_s: default_rate_limit_window_s(),
        }
    }
}

impl LimitsConfig {
    /// Validation bounds for the lifecycle manager.
    pub fn input_limits(&self) -> InputLimits {
        InputLimits {
            max_input_bytes: self.max_input_bytes,
        }
    }

    /// Rate-limit window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_s)
    }
}

/// Execution trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ExecutorSection {
    /// Engine calls allowed in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Deadline for one engine call, in milliseconds.
    #[serde(default = "default_engine_timeout_ms")]
    pub engine_timeout_ms: u64,
    /// Delay before each fallback attempt, in milliseconds.
    #[serde(default = "default_fallback_delay_ms")]
    pub fallback_delay_ms: u64,
    /// Fallback attempts while a job stays pending.
    #[serde(default = "default_fallback_attempts")]
    pub fallback_attempts: u32,
    /// Age in seconds after which a `processing` job is failed by the sweep.
    #[serde(default = "default_stuck_after_s")]
    pub stuck_after_s: u64,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_s")]
    pub sweep_interval_s: u64,
    /// Most pending jobs one fallback-trigger call picks up.
    #[serde(default = "default_pending_batch")]
    pub pending_batch: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            engine_timeout_ms: default_engine_timeout_ms(),
            fallback_delay_ms: default_fallback_delay_ms(),
            fallback_attempts: default_fallback_attempts(),
            stuck_after_s: default_stuck_after_s(),
            sweep_interval_s: default_sweep_interval_s(),
            pending_batch: default_pending_batch(),
        }
    }
}

impl ExecutorSection {
    /// Runtime executor settings.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_concurrent: self.max_concurrent,
            engine_timeout: Duration::from_millis(self.engine_timeout_ms),
            fallback_delay: Duration::from_millis(self.fallback_delay_ms),
            fallback_attempts: self.fallback_attempts,
            finalize_retry: RetryPolicy::default(),
        }
    }

    /// Stuck-job age as a [`Duration`].
    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_s)
    }

    /// Sweep period as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_s)
    }
}

/// Client poll cadence and budget.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PollingConfig {
    /// Milliseconds between status reads.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Reads before the client gives up.
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

impl PollingConfig {
    /// Runtime poll settings.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.interval_ms),
            max_attempts: self.max_attempts,
        }
    }
}

/// Generation backend selection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EngineConfig {
    /// Which engine implementation to use.
    #[serde(default)]
    pub kind: EngineKind,
    /// Endpoint for the `http` engine.
    #[serde(default)]
    pub url: Option<String>,
    /// Per-request transport timeout for the `http` engine, in milliseconds.
    #[serde(default = "default_engine_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            url: None,
            timeout_ms: default_engine_http_timeout_ms(),
        }
    }
}

/// Supported generation engines.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// In-process echo engine for demos and tests.
    #[default]
    Echo,
    /// JSON-over-HTTP backend.
    Http,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format. `LOG_FORMAT` in the environment takes precedence.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

impl LogFormat {
    /// Value understood by `LOG_FORMAT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

/// Export the JSON Schema for `GenJobConfig`.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(GenJobConfig);
    serde_json::to_string_pretty(&schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: GenJobConfig = toml::from_str("").expect("test: parse empty");
        assert_eq!(config, GenJobConfig::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.max_input_bytes, 64 * 1024);
        assert_eq!(config.polling.max_attempts, 150);
        assert_eq!(config.engine.kind, EngineKind::Echo);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: GenJobConfig = toml::from_str(
            r#"
[executor]
fallback_delay_ms = 500
"#,
        )
        .expect("test: parse");
        assert_eq!(config.executor.fallback_delay_ms, 500);
        assert_eq!(config.executor.fallback_attempts, 3);
        assert_eq!(config.executor.max_concurrent, 16);
    }

    #[test]
    fn test_engine_kind_deserializes_from_snake_case() {
        let config: GenJobConfig = toml::from_str(
            r#"
[engine]
kind = "http"
url = "http://localhost:9000/generate"
"#,
        )
        .expect("test: parse");
        assert_eq!(config.engine.kind, EngineKind::Http);
        assert_eq!(
            config.engine.url.as_deref(),
            Some("http://localhost:9000/generate")
        );
    }

    #[test]
    fn test_section_conversions() {
        let config = GenJobConfig::default();
        let exec = config.executor.executor_config();
        assert_eq!(exec.engine_timeout, Duration::from_secs(120));
        assert_eq!(exec.fallback_delay, Duration::from_secs(2));

        let poll = config.polling.poll_config();
        assert_eq!(poll.interval, Duration::from_secs(2));
        assert_eq!(poll.max_attempts, 150);

        assert_eq!(config.limits.window(), Duration::from_secs(60));
        assert_eq!(config.limits.input_limits().max_input_bytes, 64 * 1024);
    }

    #[test]
    fn test_log_format_serializes_to_snake_case() {
        let json = serde_json::to_string(&LogFormat::Json).expect("test: serialize");
        assert_eq!(json, "\"json\"");
        assert_eq!(LogFormat::Pretty.as_str(), "pretty");
    }

    #[test]
    fn test_export_schema_produces_valid_json() {
        let schema = export_schema().expect("test: export schema");
        let parsed: serde_json::Value = serde_json::from_str(&schema).expect("test: parse schema");
        assert!(parsed.get("properties").is_some() || parsed.get("definitions").is_some());
    }
}
