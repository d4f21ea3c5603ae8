//! Error types for the ETL task scheduler.
//!
//! Two families live here:
//!
//! - [`ProcessError`] describes what can go wrong while looking at, starting
//!   or signalling OS processes. The scheduler core turns almost all of these
//!   into run log entries instead of propagating them.
//! - [`Error`] is the general-purpose error for everything else (run log
//!   persistence) and supports context chaining.
//!
//! ```rust
//! use etl_common::{Error, Result, ResultExt};
//!
//! fn write_snapshot() -> Result<()> {
//!     Err(Error::serialization("unsupported value"))
//! }
//!
//! fn caller() -> Result<()> {
//!     write_snapshot().context("Failed to flush run log")
//! }
//! # assert!(caller().is_err());
//! ```

use thiserror::Error;

/// Result type alias for general scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for non-process operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization of a persisted record failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (shouldn't happen in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Process-level failure surfaced through a general API.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Generic error with context.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a Serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Adds context to an error.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }
}

/// Convenience methods for Result types
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
}

// ==============================================================================
// Process Errors
// ==============================================================================

/// Process-specific error types.
///
/// `id` is whatever identifies the subject in the failing call: a pid, a task
/// base name, or the scheduler's own executable name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Process already running: {id} (pid {pid})")]
    AlreadyRunning { id: String, pid: u32 },

    #[error("Process spawn failed: {id} - {reason}")]
    SpawnFailed { id: String, reason: String },

    #[error("Process table inspection failed: {reason}")]
    Inspection { reason: String },

    #[error("Process timeout: {id} - {operation}")]
    Timeout { id: String, operation: String },

    #[error("Invalid state: {id} - expected {expected}, got {actual}")]
    InvalidState {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Process configuration error: {id} - {reason}")]
    Configuration { id: String, reason: String },
}

impl ProcessError {
    pub fn already_running(id: impl Into<String>, pid: u32) -> Self {
        Self::AlreadyRunning { id: id.into(), pid }
    }

    pub fn spawn_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn inspection(reason: impl Into<String>) -> Self {
        Self::Inspection {
            reason: reason.into(),
        }
    }

    pub fn timeout(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            id: id.into(),
            operation: operation.into(),
        }
    }

    pub fn invalid_state(
        id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = Error::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "logs/scheduler",
        ))
        .context("Flush failed");

        let error_message = err.to_string();
        assert!(error_message.contains("Flush failed"));
        assert!(error_message.contains("logs/scheduler"));
    }

    #[test]
    fn test_process_error_wraps_transparently() {
        let err: Error = ProcessError::inspection("ps exited with 1").into();
        assert_eq!(err.to_string(), "Process table inspection failed: ps exited with 1");
    }

    #[test]
    fn test_process_error_construction() {
        let error = ProcessError::timeout("start_extract.py", "stop within 60s");
        assert!(matches!(error, ProcessError::Timeout { .. }));
        assert_eq!(
            format!("{}", error),
            "Process timeout: start_extract.py - stop within 60s"
        );

        let error = ProcessError::already_running("etl-scheduler", 77);
        assert_eq!(
            error.to_string(),
            "Process already running: etl-scheduler (pid 77)"
        );

        let error =
            ProcessError::spawn_failed("scripts/start_load.py", "No such file or directory");
        assert!(format!("{}", error).contains("spawn failed"));
    }
}
