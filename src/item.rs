//! Candidate items and the per-item transfer outcomes.
//!
//! A [`CandidateItem`] is produced by a [`CandidateExtractor`](crate::extract::CandidateExtractor)
//! and is read-only from then on. Every item that survives filtering ends
//! with exactly one [`TransferOutcome`].

use std::fmt;
use std::path::PathBuf;

use url::Url;

/// A discovered reference to a potentially downloadable media resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    /// Where the resource bytes live.
    pub locator: Url,
    /// Human-readable title used to name the local file.
    pub title: String,
    /// Estimated play time, used by the minimum-duration filter.
    pub estimated_duration_secs: u64,
    /// Page the item was discovered on.
    pub source_page: Url,
}

impl CandidateItem {
    /// Creates a new candidate item.
    #[must_use]
    pub fn new(
        locator: Url,
        title: impl Into<String>,
        estimated_duration_secs: u64,
        source_page: Url,
    ) -> Self {
        Self {
            locator,
            title: title.into(),
            estimated_duration_secs,
            source_page,
        }
    }

    /// Returns the locator as the string key used by the progress store.
    #[must_use]
    pub fn locator_key(&self) -> &str {
        self.locator.as_str()
    }
}

/// Final result of handing one item to the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The resource was verified and renamed to its final path.
    Success {
        /// Final on-disk location.
        path: PathBuf,
        /// Verified size in bytes.
        bytes: u64,
    },
    /// The transfer did not produce a verified file.
    Failed {
        /// Why the transfer stopped.
        reason: FailureReason,
    },
    /// No transfer was attempted.
    Skipped {
        /// Why the item was not transferred.
        reason: SkipReason,
    },
}

impl TransferOutcome {
    /// Convenience constructor for a failed outcome.
    #[must_use]
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }

    /// Convenience constructor for a skipped outcome.
    #[must_use]
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    /// Returns true for [`TransferOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Reason attached to [`TransferOutcome::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Permanent network or HTTP failure (4xx, invalid URL, local I/O).
    Network {
        /// Error text from the final attempt.
        detail: String,
    },
    /// Received size differs from the size the server declared.
    SizeMismatch {
        /// Declared total size.
        expected: u64,
        /// Bytes on disk.
        actual: u64,
    },
    /// The attempt budget for this locator is spent.
    ExhaustedRetries {
        /// Attempts recorded for the locator, across runs.
        attempts: u32,
        /// Failure of the last attempt made in this run, if any was made.
        last: Option<Box<FailureReason>>,
    },
    /// The locator answered with a page instead of media bytes.
    NotAMediaResource {
        /// Content type the server reported.
        content_type: String,
    },
    /// The run was cancelled while this transfer was in flight.
    Cancelled,
}

impl FailureReason {
    /// Stable short tag used in summaries and logs.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::SizeMismatch { .. } => "size-mismatch",
            Self::ExhaustedRetries { .. } => "exhausted-retries",
            Self::NotAMediaResource { .. } => "not-a-media-resource",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { detail } => write!(f, "network: {detail}"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size-mismatch: expected {expected} bytes, got {actual}")
            }
            Self::ExhaustedRetries {
                attempts,
                last: Some(last),
            } => write!(f, "exhausted-retries after {attempts} attempts (last: {last})"),
            Self::ExhaustedRetries {
                attempts,
                last: None,
            } => write!(f, "exhausted-retries after {attempts} attempts"),
            Self::NotAMediaResource { content_type } => {
                write!(f, "not-a-media-resource: content type {content_type}")
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Reason attached to [`TransferOutcome::Skipped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The locator is already recorded as complete.
    AlreadyCompleted,
    /// The same locator was already dispatched earlier in this run.
    Duplicate,
    /// The run was cancelled before the item was dispatched.
    Cancelled,
}

impl SkipReason {
    /// Stable short tag used in summaries and logs.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::AlreadyCompleted => "already-completed",
            Self::Duplicate => "duplicate",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
