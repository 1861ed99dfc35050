//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`GenJobConfig`] that cannot
//! be expressed through the type system alone (range checks, cross-field
//! invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::{EngineKind, GenJobConfig};

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "executor.max_concurrent").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn at_least_one(errors: &mut Vec<ConfigError>, field: &str, value: u64, unit: &str) {
    if value == 0 {
        errors.push(ConfigError::InvalidField {
            field: field.into(),
            value: "0".into(),
            reason: format!("must be at least 1{unit}"),
        });
    }
}

/// Validate all semantic constraints on a [`GenJobConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &GenJobConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Server ───────────────────────────────────────────────────────
    if config.server.host.trim().is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "server.host".into(),
            value: String::new(),
            reason: "host must not be empty".into(),
        });
    }
    at_least_one(
        &mut errors,
        "server.max_request_size",
        config.server.max_request_size as u64,
        " byte",
    );

    // ── Limits ───────────────────────────────────────────────────────
    at_least_one(
        &mut errors,
        "limits.max_input_bytes",
        config.limits.max_input_bytes as u64,
        " byte",
    );
    at_least_one(
        &mut errors,
        "limits.rate_limit_window_s",
        config.limits.rate_limit_window_s,
        " second",
    );
    if config.limits.max_input_bytes > config.server.max_request_size {
        errors.push(ConfigError::InvalidField {
            field: "limits.max_input_bytes".into(),
            value: config.limits.max_input_bytes.to_string(),
            reason: "must be \u{2264} server.max_request_size".into(),
        });
    }

    // ── Executor ─────────────────────────────────────────────────────
    let exec = &config.executor;
    at_least_one(&mut errors, "executor.max_concurrent", exec.max_concurrent as u64, "");
    at_least_one(&mut errors, "executor.engine_timeout_ms", exec.engine_timeout_ms, "ms");
    at_least_one(&mut errors, "executor.sweep_interval_s", exec.sweep_interval_s, " second");
    at_least_one(&mut errors, "executor.pending_batch", exec.pending_batch as u64, "");
    if exec.stuck_after_s.saturating_mul(1000) <= exec.engine_timeout_ms {
        errors.push(ConfigError::InvalidField {
            field: "executor.stuck_after_s".into(),
            value: exec.stuck_after_s.to_string(),
            reason: "must exceed executor.engine_timeout_ms".into(),
        });
    }

    // ── Polling ──────────────────────────────────────────────────────
    at_least_one(&mut errors, "polling.interval_ms", config.polling.interval_ms, "ms");
    at_least_one(
        &mut errors,
        "polling.max_attempts",
        u64::from(config.polling.max_attempts),
        "",
    );

    // ── Engine ───────────────────────────────────────────────────────
    if config.engine.kind == EngineKind::Http {
        match config.engine.url.as_deref().map(str::trim) {
            None | Some("") => errors.push(ConfigError::InvalidField {
                field: "engine.url".into(),
                value: String::new(),
                reason: "required when engine.kind = \"http\"".into(),
            }),
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                errors.push(ConfigError::InvalidField {
                    field: "engine.url".into(),
                    value: url.to_string(),
                    reason: "must be an http:// or https:// URL".into(),
                })
            }
            Some(_) => {}
        }
        at_least_one(&mut errors, "engine.timeout_ms", config.engine.timeout_ms, "ms");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
