//! Error classification.
//!
//! Maps arbitrary failures from the generation engine or the job store into
//! a closed taxonomy of [`ErrorCode`]s with a retryable hint. Classification
//! is a pure function of the error, so the same input class always yields the
//! same code.
//!
//! Rules are applied in priority order:
//!
//! 1. structured variants ([`EngineError::Timeout`], [`EngineError::Storage`],
//!    [`EngineError::InvalidResponse`], [`EngineError::MalformedInput`])
//! 2. an HTTP-like status, explicit or found in the message text
//! 3. case-insensitive message patterns
//! 4. everything else is [`ErrorCode::Unknown`] and retryable

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw failure reported by a generation engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine call exceeded its deadline.
    #[error("generation timed out: {0}")]
    Timeout(String),

    /// The upstream provider responded with an error.
    #[error("upstream error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Upstream {
        /// HTTP-like status, if the transport exposed one.
        status: Option<u16>,
        /// Provider error text.
        message: String,
    },

    /// The provider responded but the payload failed structural validation.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    /// The input itself cannot be processed.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Reading or writing the job record failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Anything without more structure (including caught panics).
    #[error("{0}")]
    Other(String),
}

/// Closed set of engine-side failure codes persisted on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// The engine call took too long.
    Timeout,
    /// The provider throttled us (HTTP 429).
    UpstreamRateLimited,
    /// The provider rejected our credentials (HTTP 401/403).
    UpstreamAuthFailed,
    /// The provider is down or overloaded (HTTP 5xx).
    UpstreamUnavailable,
    /// The provider answered with something we could not use.
    InvalidUpstreamResponse,
    /// The submitted input cannot be generated from.
    MalformedInput,
    /// The job store failed.
    StorageError,
    /// Unmatched failure.
    Unknown,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [ErrorCode; 8] = [
        Self::Timeout,
        Self::UpstreamRateLimited,
        Self::UpstreamAuthFailed,
        Self::UpstreamUnavailable,
        Self::InvalidUpstreamResponse,
        Self::MalformedInput,
        Self::StorageError,
        Self::Unknown,
    ];

    /// Kebab-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::UpstreamRateLimited => "upstream-rate-limited",
            Self::UpstreamAuthFailed => "upstream-auth-failed",
            Self::UpstreamUnavailable => "upstream-unavailable",
            Self::InvalidUpstreamResponse => "invalid-upstream-response",
            Self::MalformedInput => "malformed-input",
            Self::StorageError => "storage-error",
            Self::Unknown => "unknown",
        }
    }

    /// Default retryable hint for this code.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UpstreamAuthFailed | Self::MalformedInput)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure after classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    /// Taxonomy code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Whether resubmitting the same input is likely to succeed.
    pub retryable: bool,
}

impl ClassifiedError {
    /// Build with the code's default retryable hint.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Classify a raw engine failure.
///
/// # Panics
///
/// This function never panics.
pub fn classify(error: &EngineError) -> ClassifiedError {
    let message = error.to_string();
    let code = classify_code(error);
    ClassifiedError {
        code,
        message,
        retryable: code.is_retryable(),
    }
}

fn classify_code(error: &EngineError) -> ErrorCode {
    match error {
        EngineError::Timeout(_) => return ErrorCode::Timeout,
        EngineError::Storage(_) => return ErrorCode::StorageError,
        EngineError::InvalidResponse(_) => return ErrorCode::InvalidUpstreamResponse,
        EngineError::MalformedInput(_) => return ErrorCode::MalformedInput,
        EngineError::Upstream { .. } | EngineError::Other(_) => {}
    }

    let text = match error {
        EngineError::Upstream { message, .. } | EngineError::Other(message) => message.as_str(),
        _ => "",
    };

    let status = match error {
        EngineError::Upstream {
            status: Some(status),
            ..
        } => Some(*status),
        _ => status_in_text(text),
    };

    if let Some(code) = status.and_then(code_for_status) {
        return code;
    }

    code_for_text(text).unwrap_or(ErrorCode::Unknown)
}

fn code_for_status(status: u16) -> Option<ErrorCode> {
    match status {
        429 => Some(ErrorCode::UpstreamRateLimited),
        401 | 403 => Some(ErrorCode::UpstreamAuthFailed),
        408 | 504 => Some(ErrorCode::Timeout),
        500..=599 => Some(ErrorCode::UpstreamUnavailable),
        400 | 422 => Some(ErrorCode::MalformedInput),
        _ => None,
    }
}

/// First standalone three-digit number in `400..=599`.
fn status_in_text(text: &str) -> Option<u16> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|status| (400..=599).contains(status))
}

fn code_for_text(text: &str) -> Option<ErrorCode> {
    const PATTERNS: &[(&[&str], ErrorCode)] = &[
        (&["timed out", "timeout", "deadline exceeded"], ErrorCode::Timeout),
        (
            &["rate limit", "too many requests", "quota exceeded"],
            ErrorCode::UpstreamRateLimited,
        ),
        (
            &["unauthorized", "invalid api key", "forbidden", "authentication"],
            ErrorCode::UpstreamAuthFailed,
        ),
        (
            &["unavailable", "overloaded", "connection refused", "bad gateway"],
            ErrorCode::UpstreamUnavailable,
        ),
        (
            &["parse", "invalid json", "unexpected response", "missing field"],
            ErrorCode::InvalidUpstreamResponse,
        ),
    ];

    let lower = text.to_ascii_lowercase();
    PATTERNS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, code)| *code)
}
