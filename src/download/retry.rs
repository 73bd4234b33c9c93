//! Retry logic with linear backoff for transient transfer failures.
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//!
//! The [`RetryPolicy`] then decides, from the failure type and the attempt
//! number recorded for the locator, whether another attempt is allowed and
//! how long to wait before it. Attempt numbers are counted across runs, so a
//! locator that already burned its budget in an earlier run is not retried.
//!
//! # Example
//!
//! ```
//! use harvester_core::download::{
//!     DownloadError, RetryPolicy, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://example.com/clip.mp4", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::Exhausted { attempts } => println!("gave up after {attempts}"),
//!     RetryDecision::Permanent => println!("not retryable"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts per locator, across runs.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default backoff unit: attempt N waits N times this (10 seconds).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);

/// Classification of transfer failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, size mismatch.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, invalid URL, HTML page instead of media.
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number the retry will be (1-indexed).
        attempt: u32,
    },

    /// The attempt budget is spent.
    Exhausted {
        /// Attempts made, including the one that just failed.
        attempts: u32,
    },

    /// The failure is permanent; retrying would not help.
    Permanent,
}

/// Linear backoff retry configuration.
///
/// # Delay Calculation
///
/// ```text
/// delay = base_delay * failed_attempt
/// ```
///
/// With defaults, delays are 10s, 20s, 30s, 40s before the fifth attempt
/// exhausts the budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Backoff unit.
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using the default delay.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff unit.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::Permanent;
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::Exhausted { attempts: attempt };
        }

        let delay = self.delay_for(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Wait before the attempt following `failed_attempt`.
    #[must_use]
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        self.base_delay.saturating_mul(failed_attempt.max(1))
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout | Transient |
/// | Network (most) | Transient |
/// | Network (TLS) | Permanent |
/// | HTTP 408, 416, 429, 5xx | Transient |
/// | Other HTTP 4xx | Permanent |
/// | SizeMismatch, UnexpectedRange | Transient |
/// | Io, InvalidUrl, NotMedia, Cancelled | Permanent |
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),

        DownloadError::Timeout { .. }
        | DownloadError::SizeMismatch { .. }
        | DownloadError::UnexpectedRange { .. } => FailureType::Transient,

        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }

        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::NotMedia { .. }
        | DownloadError::Cancelled { .. }
        | DownloadError::ClientBuild { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient, // Request Timeout
        416 => FailureType::Transient, // Range Not Satisfiable, working file is discarded
        429 => FailureType::Transient, // Too Many Requests
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
