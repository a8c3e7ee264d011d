//! Error types for carebot.
//!
//! Library crates use [`CarebotError`] via `thiserror`.
//! The app crate wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all carebot operations.
#[derive(Debug, thiserror::Error)]
pub enum CarebotError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to a remote collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// Response body or file content could not be parsed.
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

    /// Data validation error (bad input, dimension mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The intent classifier was unavailable or failed.
    #[error("classifier failure: {0}")]
    ClassifierFailure(String),

    /// Embedding or vector index lookup failed.
    #[error("retrieval failure: {0}")]
    RetrievalFailure(String),

    /// A generative responder or the program generator failed.
    #[error("generation failure: {0}")]
    GenerationFailure(String),

    /// Program archive could not persist an artifact.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// No live session with this id.
    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    /// An answer could not be coerced to the question's type.
    #[error("invalid answer for '{field}': expected {expected}, got {value:?}")]
    InvalidType {
        field: String,
        expected: String,
        value: String,
    },

    /// Every question of the session has already been answered.
    #[error("session {id} has already answered every question")]
    AlreadyComplete { id: String },

    /// Finalization was requested before the questionnaire was complete.
    #[error("session {id} is incomplete: {answered} of {total} questions answered")]
    Incomplete {
        id: String,
        answered: usize,
        total: usize,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CarebotError>;

impl CarebotError {
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

    /// Unknown session handle.
    pub fn session_not_found(id: impl ToString) -> Self {
        Self::SessionNotFound { id: id.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CarebotError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = CarebotError::InvalidType {
            field: "age".into(),
            expected: "int".into(),
            value: "thirty".into(),
        };
        assert!(err.to_string().contains("expected int"));
        assert!(err.to_string().contains("\"thirty\""));
    }

    #[test]
    fn incomplete_reports_progress() {
        let err = CarebotError::Incomplete {
            id: "abc".into(),
            answered: 3,
            total: 29,
        };
        assert_eq!(
            err.to_string(),
            "session abc is incomplete: 3 of 29 questions answered"
        );
    }
}
