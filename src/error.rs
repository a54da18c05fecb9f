//! Error handling for the proc-graph crate.
//!
//! This module provides the error types for lifecycle operations, designed
//! for both programmatic handling and human-readable error messages.
//!
//! Each error variant carries:
//!
//! * **Error Code**: a stable identifier for programmatic handling and metrics
//! * **Message**: a human-readable description of the error
//! * **Source**: optional underlying error for better context
//!
//! There are deliberately few variants. The only failure a process graph
//! produces on its own is a teardown action reporting an error; the only
//! environmental failure is OS signal handler registration. Teardown
//! failures are stored on the process that produced them and handed back to
//! every caller of `close()`; they are never propagated across the graph
//! (see [`Process::close_err`](crate::Process::close_err)).
//!
//! Errors are cheaply cloneable: sources are reference-counted so the
//! terminal status of a process can be returned to any number of
//! concurrent close callers.
//!
//! # Usage
//!
//! ```no_run
//! use proc_graph::{Error, Result};
//!
//! fn release_resources() -> Result<()> {
//!     let flush_failed = false;
//!     if flush_failed {
//!         return Err(Error::teardown("failed to flush the write-ahead log"));
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

/// Result type alias for proc-graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Shared source error, cloneable across every observer of a terminal status.
type SharedSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Error code enum for categorizing and identifying errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ErrorCode {
    /// Teardown errors: 1000-1999
    TeardownFailed = 1000,

    /// Signal handling errors: 2000-2999
    SignalRegisterFailed = 2000,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), *self as i32)
    }
}

impl ErrorCode {
    /// Convert error code to string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TeardownFailed => "TEARDOWN_FAILED",
            Self::SignalRegisterFailed => "SIGNAL_REGISTER_FAILED",
        }
    }
}

/// Error type for all lifecycle operations.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A teardown action reported a failure.
    #[error("teardown error [{code}]: {message}")]
    Teardown {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        #[cfg_attr(feature = "serde", serde(skip))]
        source: Option<SharedSource>,
    },

    /// Signal handler registration or delivery errors.
    #[error("signal handling error [{code}]: {message}")]
    Signal {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        #[cfg_attr(feature = "serde", serde(skip))]
        source: Option<SharedSource>,
    },
}

impl Error {
    /// Create a new teardown error.
    pub fn teardown<S: Into<String>>(message: S) -> Self {
        Self::Teardown {
            code: ErrorCode::TeardownFailed,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new teardown error with a source error.
    pub fn teardown_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Teardown {
            code: ErrorCode::TeardownFailed,
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create a new signal error.
    pub fn signal<S: Into<String>>(message: S) -> Self {
        Self::Signal {
            code: ErrorCode::SignalRegisterFailed,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new signal error with a source error.
    pub fn signal_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Signal {
            code: ErrorCode::SignalRegisterFailed,
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Check if this error came from a teardown action.
    #[must_use]
    pub const fn is_teardown(&self) -> bool {
        matches!(self, Self::Teardown { .. })
    }

    /// Check if this error is signal-related.
    #[must_use]
    pub const fn is_signal(&self) -> bool {
        matches!(self, Self::Signal { .. })
    }

    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Teardown { code, .. } | Self::Signal { code, .. } => *code,
        }
    }

    /// Get the error category for metrics/logging.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Teardown { .. } => "teardown",
            Self::Signal { .. } => "signal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::teardown("test message");
        assert!(err.is_teardown());
        assert_eq!(err.category(), "teardown");
        assert_eq!(err.code(), ErrorCode::TeardownFailed);
    }

    #[test]
    fn test_signal_error_with_source() {
        let io_err = std::io::Error::other("no handler slot");
        let err = Error::signal_with_source("failed to register SIGTERM", io_err);
        assert!(err.is_signal());
        assert_eq!(err.category(), "signal");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_clone_shares_source() {
        let io_err = std::io::Error::other("disk gone");
        let err = Error::teardown_with_source("failed to sync state", io_err);
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
        assert!(std::error::Error::source(&copy).is_some());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(
            format!("{}", ErrorCode::TeardownFailed),
            "TEARDOWN_FAILED(1000)"
        );
        assert_eq!(
            format!("{}", ErrorCode::SignalRegisterFailed),
            "SIGNAL_REGISTER_FAILED(2000)"
        );
    }
}
