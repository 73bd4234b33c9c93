//! Error types for the progress store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or persisting the progress record.
///
/// All of these are fatal to a run: continuing without a trustworthy record
/// would re-download completed files or lose attempt counts.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// The progress file exists but could not be read.
    #[error("failed to read progress file {path}: {source}")]
    Read {
        /// Progress file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The progress file is not a valid progress record.
    #[error("progress file {path} is corrupted: {source}")]
    Corrupted {
        /// Progress file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The record could not be serialized.
    #[error("failed to serialize progress record: {source}")]
    Serialize {
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// The record could not be written or moved into place.
    #[error("failed to write progress file {path}: {source}")]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ProgressError {
    /// Creates a read error.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Corrupted {
            path: path.into(),
            source,
        }
    }

    /// Creates a write error.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
