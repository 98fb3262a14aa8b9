//! Error types for feedpress.
//!
//! Library crates use [`FeedpressError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The three pipeline failure kinds (`Fetch`, `Generation`, `Publish`) are
//! per-item: stages log them and move on. Only [`FeedpressError::Io`] on the
//! working directory aborts a run.

use std::path::PathBuf;

/// Top-level error type for all feedpress operations.
#[derive(Debug, thiserror::Error)]
pub enum FeedpressError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A feed was unreachable or malformed.
    #[error("fetch error: {message}")]
    Fetch { message: String, retryable: bool },

    /// The language-generation or image-search service failed.
    #[error("generation error: {message}")]
    Generation { message: String, retryable: bool },

    /// The spreadsheet or image host rejected a write.
    #[error("publish error: {message}")]
    Publish { message: String, retryable: bool },

    /// Malformed artifact or API payload.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FeedpressError>;

impl FeedpressError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a (non-retryable) fetch error.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a (non-retryable) generation error.
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation {
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a (non-retryable) publish error.
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish {
            message: msg.into(),
            retryable: false,
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

    /// Mark a fetch/generation/publish error as transient (network failure,
    /// HTTP 429 or 5xx). Other variants are returned unchanged.
    pub fn retryable(self) -> Self {
        match self {
            Self::Fetch { message, .. } => Self::Fetch {
                message,
                retryable: true,
            },
            Self::Generation { message, .. } => Self::Generation {
                message,
                retryable: true,
            },
            Self::Publish { message, .. } => Self::Publish {
                message,
                retryable: true,
            },
            other => other,
        }
    }

    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Fetch { retryable: true, .. }
                | Self::Generation { retryable: true, .. }
                | Self::Publish { retryable: true, .. }
        )
    }

    /// Errors that end the whole run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
