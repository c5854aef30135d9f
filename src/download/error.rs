//! Error types for the transfer layer.
//!
//! [`DownloadError`] carries full context (URL, path) for one failed request
//! or file transfer. The fetcher folds these into serializable
//! [`DownloadFailure`] records so a scene's report can list every target
//! that did not make it to disk.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use super::nodes::DownloadTarget;
use crate::auth::AuthError;

/// Errors that can occur while issuing a request or transferring a file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS, body read).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response after retries and token refresh.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing a target.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Streamed byte count does not match the advertised content length.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Final path that was not written.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Bytes actually received.
        actual_bytes: u64,
    },

    /// Response body could not be decoded as the expected JSON document.
    #[error("invalid response body from {url}: {source}")]
    Decode {
        /// The URL whose body failed to decode.
        url: String,
        /// The underlying decode error.
        #[source]
        source: reqwest::Error,
    },

    /// Bearer token could not be obtained or refreshed.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl DownloadError {
    /// Creates a network error, promoting reqwest timeouts to [`DownloadError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a body decode error.
    pub fn decode(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }

    /// Returns the HTTP status when this error came from a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Typed reason a single target failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Server answered with a non-success status.
    HttpError {
        /// The HTTP status code.
        status: u16,
    },
    /// Byte count disagreed with the expected content length.
    SizeMismatch {
        /// Expected size in bytes.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },
    /// Local filesystem failure.
    IoError,
    /// Connection, TLS or body-stream failure.
    NetworkError,
    /// Request exceeded its timeout.
    Timeout,
    /// Token acquisition failed mid-run.
    AuthError,
    /// Worker task panicked or was cancelled before reporting.
    TaskFailed,
}

impl From<&DownloadError> for FailureKind {
    fn from(error: &DownloadError) -> Self {
        match error {
            DownloadError::HttpStatus { status, .. } => Self::HttpError { status: *status },
            DownloadError::Integrity {
                expected_bytes,
                actual_bytes,
                ..
            } => Self::SizeMismatch {
                expected: *expected_bytes,
                actual: *actual_bytes,
            },
            DownloadError::Io { .. } => Self::IoError,
            DownloadError::Timeout { .. } => Self::Timeout,
            DownloadError::Network { .. } | DownloadError::Decode { .. } => Self::NetworkError,
            DownloadError::Auth(_) => Self::AuthError,
        }
    }
}

/// One target that could not be transferred, with its typed reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadFailure {
    /// The remote file that failed.
    pub target: DownloadTarget,
    /// Typed failure reason.
    #[serde(flatten)]
    pub kind: FailureKind,
    /// Full error message for logs and reports.
    pub message: String,
}

impl DownloadFailure {
    /// Builds a failure record from the error that ended a target's transfer.
    #[must_use]
    pub fn from_error(target: DownloadTarget, error: &DownloadError) -> Self {
        Self {
            target,
            kind: FailureKind::from(error),
            message: error.to_string(),
        }
    }

    /// Builds a failure record for a worker that never returned a result.
    #[must_use]
    pub fn task_failed(target: DownloadTarget, error: &tokio::task::JoinError) -> Self {
        Self {
            target,
            kind: FailureKind::TaskFailed,
            message: format!("download task failed: {error}"),
        }
    }
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let error = DownloadError::http_status("https://example.com/$value", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/$value"));
        assert_eq!(error.status(), Some(404));
    }

    #[test]
    fn test_integrity_maps_to_size_mismatch() {
        let error = DownloadError::integrity("/tmp/B02.jp2", 10, 7);
        assert_eq!(
            FailureKind::from(&error),
            FailureKind::SizeMismatch {
                expected: 10,
                actual: 7
            }
        );
    }

    #[test]
    fn test_io_maps_to_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = DownloadError::io("/tmp/B02.jp2", io_error);
        assert_eq!(FailureKind::from(&error), FailureKind::IoError);
        assert!(error.to_string().contains("/tmp/B02.jp2"));
    }

    #[test]
    fn test_failure_serializes_with_kind_tag() {
        let target = DownloadTarget::new(["S2A.SAFE", "MTD_MSIL2A.xml"]);
        let failure =
            DownloadFailure::from_error(target, &DownloadError::http_status("http://x", 503));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "http_error");
        assert_eq!(json["status"], 503);
        assert_eq!(json["target"][1], "MTD_MSIL2A.xml");
        assert!(failure.to_string().starts_with("S2A.SAFE/MTD_MSIL2A.xml"));
    }
}
