//! Error types for digest pipeline operations.
//!
//! Defines error types for each subsystem:
//! - External collaborators (sources, analyzers, sinks, notifiers)
//! - Ephemeral workspaces (materialize, quota, cleanup)
//! - Result cache persistence
//! - Run-level pipeline failures

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Transport-level failure categories that are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Peer reset the connection mid-flight.
    ConnectionReset,
    /// Nothing was listening on the other end.
    ConnectionRefused,
    /// The connection or request timed out.
    TimedOut,
    /// Host name resolution failed (NXDOMAIN or a temporary resolver failure).
    DnsFailure,
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkErrorKind::ConnectionReset => "connection reset",
            NetworkErrorKind::ConnectionRefused => "connection refused",
            NetworkErrorKind::TimedOut => "timed out",
            NetworkErrorKind::DnsFailure => "dns failure",
        };
        f.write_str(s)
    }
}

/// Errors raised by the pluggable collaborators the pipeline invokes.
///
/// The variants carry enough shape for the retry engine to tell transient
/// failures (network, 429, 5xx, timeouts) from terminal ones.
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("{0}")]
    Other(String),

    #[error("IO error: {0}")]
    Io(#[source] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExternalError {
    /// Shorthand for an HTTP status failure.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Shorthand for a transport failure.
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }
}

impl From<io::Error> for ExternalError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Some(NetworkErrorKind::ConnectionReset)
            }
            io::ErrorKind::ConnectionRefused => Some(NetworkErrorKind::ConnectionRefused),
            io::ErrorKind::TimedOut => Some(NetworkErrorKind::TimedOut),
            _ => None,
        };
        match kind {
            Some(kind) => ExternalError::Network {
                kind,
                message: err.to_string(),
            },
            None => ExternalError::Io(err),
        }
    }
}

impl From<reqwest::Error> for ExternalError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            return ExternalError::network(NetworkErrorKind::TimedOut, message);
        }
        if let Some(status) = err.status() {
            return ExternalError::http(status.as_u16(), message);
        }
        if err.is_connect() {
            let lower = message.to_lowercase();
            let kind = if lower.contains("dns") || lower.contains("resolve") {
                NetworkErrorKind::DnsFailure
            } else if lower.contains("reset") {
                NetworkErrorKind::ConnectionReset
            } else {
                NetworkErrorKind::ConnectionRefused
            };
            return ExternalError::network(kind, message);
        }
        if err.is_decode() {
            return ExternalError::Parse(message);
        }
        ExternalError::Other(message)
    }
}

/// Errors that can occur while acquiring, reading or releasing a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid workspace name '{0}': nothing left after sanitizing")]
    InvalidName(String),

    #[error("materialize of '{source_ref}' failed: {reason}")]
    MaterializeFailed { source_ref: String, reason: String },

    #[error("materialize of '{source_ref}' timed out after {timeout_ms} ms")]
    MaterializeTimeout { source_ref: String, timeout_ms: u64 },

    #[error("workspace '{name}' exceeds quota: {actual} > {limit} {unit}")]
    QuotaExceeded {
        name: String,
        actual: u64,
        limit: u64,
        unit: &'static str,
    },

    #[error("failed to remove workspace {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("workspace task failed: {0}")]
    Join(String),

    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl WorkspaceError {
    /// Whether this failure is a quota violation (terminal for the item).
    pub fn is_quota(&self) -> bool {
        matches!(self, WorkspaceError::QuotaExceeded { .. })
    }
}

/// Errors from the cache's durable backing.
///
/// These never escape `set`/`get`; they are logged and the in-memory cache
/// keeps working.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache persistence failed for {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt cache file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Run-level failures. Once a run has started only collection aborts it;
/// everything per item degrades instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("collection failed: {0}")]
    Collection(#[source] crate::retry::RetryError<ExternalError>),

    #[error("collection returned no items")]
    NoItems,

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::pipeline::config::ConfigError),

    #[error("pipeline is missing its {0}")]
    MissingCollaborator(&'static str),

    #[error("workspace setup failed: {0}")]
    Workspace(#[from] WorkspaceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let err: ExternalError = io::Error::new(io::ErrorKind::ConnectionRefused, "nope").into();
        assert!(matches!(
            err,
            ExternalError::Network {
                kind: NetworkErrorKind::ConnectionRefused,
                ..
            }
        ));

        let err: ExternalError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(
            err,
            ExternalError::Network {
                kind: NetworkErrorKind::TimedOut,
                ..
            }
        ));

        let err: ExternalError = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, ExternalError::Io(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ExternalError::http(503, "unavailable");
        assert_eq!(err.to_string(), "HTTP 503: unavailable");

        let err = WorkspaceError::QuotaExceeded {
            name: "owner_repo".to_string(),
            actual: 80,
            limit: 50,
            unit: "MB",
        };
        assert!(err.to_string().contains("80 > 50 MB"));
        assert!(err.is_quota());
    }

    #[tokio::test]
    async fn test_reqwest_connect_error_is_network() {
        let client = reqwest::Client::new();
        let err = client
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .expect_err("nothing listens on port 1");
        let converted = ExternalError::from(err);
        assert!(
            matches!(converted, ExternalError::Network { .. }),
            "expected a network error, got {:?}",
            converted
        );
    }
}
