//! Bounded fan-out of transfers with per-item outcome collection.
//!
//! The [`TransferCoordinator`] owns one semaphore for its whole lifetime, so
//! the concurrency bound holds across every batch the pipeline hands it, even
//! when batches overlap. Each item runs in its own Tokio task; a failing or
//! panicking transfer never affects its siblings.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::item::{CandidateItem, FailureReason, SkipReason, TransferOutcome};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// How often a permit wait checks the cancellation flag.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The unit of work the coordinator fans out.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Transfers one item to completion, folding every error into the outcome.
    async fn transfer(&self, item: &CandidateItem) -> TransferOutcome;
}

/// Error type for coordinator construction.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Runs transfers on a bounded pool and collects one outcome per item.
pub struct TransferCoordinator {
    semaphore: Arc<Semaphore>,
    limit: usize,
    transfer: Arc<dyn Transfer>,
    cancel: Arc<AtomicBool>,
}

impl std::fmt::Debug for TransferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("limit", &self.limit)
            .field("available_permits", &self.semaphore.available_permits())
            .finish_non_exhaustive()
    }
}

impl TransferCoordinator {
    /// Creates a coordinator running at most `limit` transfers at once.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidConcurrency`] if `limit` is outside 1-100.
    #[instrument(level = "debug", skip(transfer))]
    pub fn new(limit: usize, transfer: Arc<dyn Transfer>) -> Result<Self, CoordinatorError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&limit) {
            return Err(CoordinatorError::InvalidConcurrency { value: limit });
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            transfer,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shares the run's cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configured concurrency limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Dispatches every item exactly once and returns `(item, outcome)`
    /// pairs in completion order.
    ///
    /// Items still waiting for a permit when the run is cancelled come back
    /// as [`SkipReason::Cancelled`].
    #[instrument(skip(self, items), fields(items = items.len(), limit = self.limit))]
    pub async fn run(&self, items: Vec<CandidateItem>) -> Vec<(CandidateItem, TransferOutcome)> {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut slots: Vec<Option<CandidateItem>> = Vec::with_capacity(total);
        let mut tasks: JoinSet<(usize, TransferOutcome)> = JoinSet::new();

        let mut queued = items.into_iter().enumerate();
        for (index, item) in queued.by_ref() {
            let permit = tokio::select! {
                biased;
                () = wait_for_cancel(&self.cancel) => None,
                result = Arc::clone(&self.semaphore).acquire_owned() => result.ok(),
            };
            let Some(permit) = permit else {
                results.push((item, TransferOutcome::skipped(SkipReason::Cancelled)));
                break;
            };

            slots.push(Some(item.clone()));
            let transfer = Arc::clone(&self.transfer);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(transfer.transfer(&item))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        warn!(locator = %item.locator, "transfer task panicked");
                        TransferOutcome::failed(FailureReason::Network {
                            detail: "transfer task panicked".to_string(),
                        })
                    });
                (index, outcome)
            });
        }
        for (_, item) in queued {
            results.push((item, TransferOutcome::skipped(SkipReason::Cancelled)));
        }

        debug!(spawned = tasks.len(), "waiting for transfers to complete");

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(item) = slots.get_mut(index).and_then(Option::take) {
                        results.push((item, outcome));
                    }
                }
                Err(error) => warn!(error = %error, "transfer task aborted"),
            }
        }

        // Tasks lost to an abort still owe their item an outcome.
        for item in slots.into_iter().flatten() {
            results.push((
                item,
                TransferOutcome::failed(FailureReason::Network {
                    detail: "transfer task aborted".to_string(),
                }),
            ));
        }

        let succeeded = results.iter().filter(|(_, o)| o.is_success()).count();
        info!(total, succeeded, "transfer batch complete");
        results
    }
}

async fn wait_for_cancel(cancel: &AtomicBool) {
    while !cancel.load(Ordering::SeqCst) {
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}
