//! Error types for the harvest pipeline
//!
//! Each component owns its error enum. [`QueryError`] is what a single query
//! can end with; none of these abort a whole run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a fetch failure, used by the retry policy and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    RateLimit,
    Server,
    Client,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Client)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a page request
#[derive(Error, Debug)]
pub enum FetchError {
    /// Connection refused, reset, DNS failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 429, optionally carrying the server's wait hint
    #[error("Rate limited by server (retry after: {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx, an unreadable body, or an inconsistent page
    #[error("Server error{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Server { status: Option<u16>, message: String },

    /// Any other 4xx; the request itself is wrong and retrying cannot help
    #[error("Client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// The retry budget ran out on a retryable failure
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Network(_) => ErrorKind::Network,
            FetchError::RateLimited { .. } => ErrorKind::RateLimit,
            FetchError::Server { .. } => ErrorKind::Server,
            FetchError::Client { .. } => ErrorKind::Client,
            FetchError::RetriesExhausted { last, .. } => last.kind(),
        }
    }

    /// Whether another attempt could succeed. An exhausted error never is.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::RetriesExhausted { .. } => false,
            other => other.kind().is_retryable(),
        }
    }
}

/// Failure to read or write a checkpoint
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint at {path} belongs to query '{found}', expected '{expected}'")]
    Mismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to hand a record to the output
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Output I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Terminal cause of a failed query
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] CheckpointError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::RateLimited { retry_after: None }.is_retryable());
        assert!(FetchError::server("bad gateway").is_retryable());
        assert!(!FetchError::Client {
            status: 400,
            message: "bad jql".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_exhausted_keeps_last_kind_but_is_final() {
        let err = FetchError::RetriesExhausted {
            attempts: 5,
            last: Box::new(FetchError::Server {
                status: Some(503),
                message: "unavailable".into(),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Giving up after 5 attempts: Server error (HTTP 503): unavailable"
        );
    }
}
