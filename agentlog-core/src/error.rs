//! Error types for agentlog-core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the agentlog-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be decoded
    #[error("parse error in {adapter} log: {message}")]
    Parse { adapter: String, message: String },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single line exceeded the scanner's maximum size
    #[error("line exceeds {limit} bytes in {}", path.display())]
    LineTooLong { path: PathBuf, limit: usize },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Directory or file not found
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The adapter does not advertise the requested capability
    #[error("{adapter} does not support {capability}")]
    CapabilityMissing {
        adapter: String,
        capability: &'static str,
    },

    /// Search query could not be compiled
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Filesystem watch error
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Deadline elapsed
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Shutdown or superseded request
    #[error("cancelled")]
    Cancelled,
}

/// Abstract error categories used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Parse,
    Io,
    LineTooLong,
    CapabilityMissing,
    Timeout,
    Cancelled,
    Config,
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Error::Io(_) | Error::Watch(_) => ErrorKind::Io,
            Error::Parse { .. } | Error::Json(_) | Error::InvalidQuery(_) => ErrorKind::Parse,
            Error::LineTooLong { .. } => ErrorKind::LineTooLong,
            Error::Config(_) => ErrorKind::Config,
            Error::SessionNotFound(_) | Error::NotFound(_) => ErrorKind::NotFound,
            Error::CapabilityMissing { .. } => ErrorKind::CapabilityMissing,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the receiver should drop this error without telling the user.
    pub fn is_silent(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled | ErrorKind::CapabilityMissing)
    }
}

/// Result type alias for agentlog-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found_kind() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_silent_kinds() {
        assert!(Error::Cancelled.is_silent());
        assert!(Error::CapabilityMissing {
            adapter: "x".into(),
            capability: "search"
        }
        .is_silent());
        assert!(!Error::Timeout(Duration::from_secs(30)).is_silent());
    }

    #[test]
    fn test_line_too_long_message() {
        let err = Error::LineTooLong {
            path: PathBuf::from("/tmp/a.jsonl"),
            limit: 10,
        };
        assert_eq!(err.to_string(), "line exceeds 10 bytes in /tmp/a.jsonl");
    }
}
