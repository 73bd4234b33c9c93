//! Error types for the download module.
//!
//! Every variant carries the locator or path it concerns so log lines and
//! failure reasons are self-describing.

use std::path::PathBuf;

use thiserror::Error;

use crate::item::FailureReason;

/// Errors that can occur during a single transfer attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The locator that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The locator that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The locator that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing the working file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Bytes on disk differ from the total the server declared.
    #[error("size mismatch for {path}: expected {expected_bytes} bytes, got {actual_bytes}")]
    SizeMismatch {
        /// Working file that failed verification.
        path: PathBuf,
        /// Declared total size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// The locator answered with a document instead of media bytes.
    #[error("{url} is not a media resource (content type {content_type})")]
    NotMedia {
        /// The locator.
        url: String,
        /// Content type reported by the server.
        content_type: String,
    },

    /// The server answered a range request with a range that does not
    /// start at the requested offset.
    #[error("unexpected range for {url}: requested offset {requested}, got {received:?}")]
    UnexpectedRange {
        /// The locator.
        url: String,
        /// Offset sent in the Range header.
        requested: u64,
        /// Start offset in the Content-Range reply, if parseable.
        received: Option<u64>,
    },

    /// The run was cancelled while the attempt was in flight.
    #[error("transfer of {url} cancelled")]
    Cancelled {
        /// The locator.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// Underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
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

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a size mismatch error.
    pub fn size_mismatch(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::SizeMismatch {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a not-a-media-resource error.
    pub fn not_media(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::NotMedia {
            url: url.into(),
            content_type: content_type.into(),
        }
    }

    /// Creates an unexpected range error.
    pub fn unexpected_range(url: impl Into<String>, requested: u64, received: Option<u64>) -> Self {
        Self::UnexpectedRange {
            url: url.into(),
            requested,
            received,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs the
// url or path the source error lacks. Use the constructors above.

impl From<&DownloadError> for FailureReason {
    fn from(error: &DownloadError) -> Self {
        match error {
            DownloadError::SizeMismatch {
                expected_bytes,
                actual_bytes,
                ..
            } => Self::SizeMismatch {
                expected: *expected_bytes,
                actual: *actual_bytes,
            },
            DownloadError::NotMedia { content_type, .. } => Self::NotAMediaResource {
                content_type: content_type.clone(),
            },
            DownloadError::Cancelled { .. } => Self::Cancelled,
            other => Self::Network {
                detail: other.to_string(),
            },
        }
    }
}
