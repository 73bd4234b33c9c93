//! Per-item transfer state machine.
//!
//! ```text
//! Pending -> Attempting(n) -> Succeeded(n)
//!                          -> Retrying(n, delay) -> Attempting(n + 1)
//!                          -> Exhausted(n)
//!                          -> Abandoned(n)        (permanent failure)
//! ```
//!
//! The machine holds no I/O; the engine drives it and acts on the state it
//! lands in, which keeps every transition testable without a server.

use std::time::Duration;

use super::retry::{FailureType, RetryDecision, RetryPolicy};
use crate::item::CandidateItem;

/// Where a transfer task currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Not yet attempted in this run.
    Pending,
    /// Attempt `attempt` is in flight.
    Attempting {
        /// 1-indexed attempt number, counted across runs.
        attempt: u32,
    },
    /// Attempt `attempt` failed transiently; wait `delay` before the next one.
    Retrying {
        /// The attempt that failed.
        attempt: u32,
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Attempt `attempt` produced a verified file.
    Succeeded {
        /// The attempt that succeeded.
        attempt: u32,
    },
    /// The attempt budget is spent.
    Exhausted {
        /// Attempts recorded for the locator.
        attempts: u32,
    },
    /// A permanent failure ended the task at attempt `attempt`.
    Abandoned {
        /// The attempt that failed permanently.
        attempt: u32,
    },
}

impl TransferState {
    /// Returns true once no further attempt will be made.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Exhausted { .. } | Self::Abandoned { .. }
        )
    }
}

/// Exclusive, per-item record of one transfer.
#[derive(Debug, Clone)]
pub struct TransferTask {
    /// The item being transferred.
    pub item: CandidateItem,
    /// Attempts recorded for the locator, including earlier runs.
    pub attempt_count: u32,
    /// Bytes known to be durably written to the working file.
    pub bytes_confirmed: u64,
    state: TransferState,
}

impl TransferTask {
    /// Creates a pending task; `prior_attempts` comes from the progress store.
    #[must_use]
    pub fn new(item: CandidateItem, prior_attempts: u32) -> Self {
        Self {
            item,
            attempt_count: prior_attempts,
            bytes_confirmed: 0,
            state: TransferState::Pending,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Moves to `Attempting` with the attempt number the store granted.
    pub fn begin_attempt(&mut self, attempt: u32) {
        self.attempt_count = attempt;
        self.state = TransferState::Attempting { attempt };
    }

    /// Records the working file size confirmed on disk.
    pub fn confirm_bytes(&mut self, bytes: u64) {
        self.bytes_confirmed = bytes;
    }

    /// Moves to `Succeeded`.
    pub fn record_success(&mut self) {
        self.state = TransferState::Succeeded {
            attempt: self.attempt_count,
        };
    }

    /// Marks the budget as already spent without making an attempt.
    pub fn record_exhausted(&mut self) {
        self.state = TransferState::Exhausted {
            attempts: self.attempt_count,
        };
    }

    /// Applies the retry policy to a failed attempt and returns the new state.
    pub fn record_failure(&mut self, failure: FailureType, policy: &RetryPolicy) -> TransferState {
        let attempt = self.attempt_count;
        self.state = match policy.should_retry(failure, attempt) {
            RetryDecision::Retry { delay, .. } => TransferState::Retrying { attempt, delay },
            RetryDecision::Exhausted { attempts } => TransferState::Exhausted { attempts },
            RetryDecision::Permanent => TransferState::Abandoned { attempt },
        };
        self.state
    }
}
