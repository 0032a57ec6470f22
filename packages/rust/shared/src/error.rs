//! Error types for BlogPostGen.
//!
//! Library crates use [`BlogPostGenError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// HTTP status codes that are worth another attempt.
const RETRYABLE_STATUS: [u16; 2] = [408, 429];

/// Top-level error type for all BlogPostGen operations.
#[derive(Debug, thiserror::Error)]
pub enum BlogPostGenError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Connection-level failure: no response status was received.
    #[error("network error: {0}")]
    Network(String),

    /// The remote service answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A remote call exceeded its caller-specified timeout.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The remote service answered but reported `success = false`.
    #[error("remote service error: {0}")]
    Remote(String),

    /// Plan or record parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Article store or run ledger error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (bad plan entry, missing asset, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A named project, article or pipeline does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Pipeline bookkeeping error (inconsistent action state).
    #[error("pipeline error: {0}")]
    Pipeline(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BlogPostGenError>;

impl BlogPostGenError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Failures without a response status (connection errors, timeouts) and
    /// request-timeout / rate-limit / 5xx statuses are retryable. Everything
    /// else fails immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => {
                RETRYABLE_STATUS.contains(status) || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = BlogPostGenError::config("missing data root");
        assert_eq!(err.to_string(), "config error: missing data root");

        let err = BlogPostGenError::Http {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "HTTP 503: unavailable");
    }

    #[test]
    fn retryable_classification() {
        let http = |status| BlogPostGenError::Http {
            status,
            message: String::new(),
        };

        assert!(BlogPostGenError::Network("connection refused".into()).is_retryable());
        assert!(BlogPostGenError::Timeout { timeout_ms: 10 }.is_retryable());
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(http(status).is_retryable(), "{status} should retry");
        }
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(!http(status).is_retryable(), "{status} should not retry");
        }
        assert!(!BlogPostGenError::Remote("bad prompt".into()).is_retryable());
        assert!(!BlogPostGenError::validation("bad input").is_retryable());
    }
}
