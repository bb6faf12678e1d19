//! Error types for Harvester.
//!
//! Library crates use [`HarvesterError`] and [`SourceError`] via `thiserror`.
//! The CLI wraps these with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for Harvester operations that abort before or
/// outside plan execution.
#[derive(Debug, thiserror::Error)]
pub enum HarvesterError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A plan could not be built from the given topic and context.
    #[error("invalid plan: {message}")]
    InvalidPlan { message: String },

    /// Network/HTTP client setup error.
    #[error("network error: {0}")]
    Network(String),

    /// Response or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown source kind, malformed value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvesterError>;

impl HarvesterError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-plan error from any displayable message.
    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan {
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
}

// ---------------------------------------------------------------------------
// Source adapter errors
// ---------------------------------------------------------------------------

/// Failure reported by a source adapter for a single fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The source did not answer within its time budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The source asked us to slow down (HTTP 429 or an equivalent body).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Connection failed or the source answered with a server error.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The response could not be parsed into content items.
    #[error("parse error: {0}")]
    Parse(String),

    /// The query was malformed or rejected by the source.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Serializable discriminant of a [`SourceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Timeout,
    RateLimited,
    Unreachable,
    Parse,
    InvalidQuery,
}

impl SourceError {
    /// The error's kind, without the message.
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            Self::Timeout(_) => SourceErrorKind::Timeout,
            Self::RateLimited(_) => SourceErrorKind::RateLimited,
            Self::Unreachable(_) => SourceErrorKind::Unreachable,
            Self::Parse(_) => SourceErrorKind::Parse,
            Self::InvalidQuery(_) => SourceErrorKind::InvalidQuery,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// The detail message carried by the error.
    pub fn message(&self) -> &str {
        match self {
            Self::Timeout(m)
            | Self::RateLimited(m)
            | Self::Unreachable(m)
            | Self::Parse(m)
            | Self::InvalidQuery(m) => m,
        }
    }
}

impl SourceErrorKind {
    /// `Timeout`, `RateLimited` and `Unreachable` are retried; the rest are not.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::Unreachable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unreachable => "unreachable",
            Self::Parse => "parse",
            Self::InvalidQuery => "invalid_query",
        }
    }
}

impl std::fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
