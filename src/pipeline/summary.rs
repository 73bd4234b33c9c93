//! Per-run tallies reported to the user.

use std::collections::BTreeMap;
use std::fmt;

use crate::item::{CandidateItem, TransferOutcome};

/// What one run did, with one outcome per item that passed the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Pages dispatched and marked visited, including failed fetches.
    pub pages_visited: usize,
    /// Pages whose fetch failed.
    pub page_failures: usize,
    /// Pages fetched but not understood by the extractor.
    pub extraction_failures: usize,
    /// Items yielded by the extractor.
    pub items_discovered: usize,
    /// Items dropped by the minimum-duration filter.
    pub items_below_min_duration: usize,
    /// Verified transfers.
    pub transfers_succeeded: usize,
    /// Items not transferred (already complete, duplicate, cancelled).
    pub transfers_skipped: usize,
    /// Failed transfers keyed by [`FailureReason::tag`](crate::FailureReason::tag).
    pub failures_by_reason: BTreeMap<&'static str, usize>,
    /// Every transfer outcome, in the order results arrived.
    pub outcomes: Vec<(CandidateItem, TransferOutcome)>,
}

impl RunSummary {
    /// Records the final outcome of one item.
    pub fn record(&mut self, item: CandidateItem, outcome: TransferOutcome) {
        match &outcome {
            TransferOutcome::Success { .. } => self.transfers_succeeded += 1,
            TransferOutcome::Skipped { .. } => self.transfers_skipped += 1,
            TransferOutcome::Failed { reason } => {
                *self.failures_by_reason.entry(reason.tag()).or_default() += 1;
            }
        }
        self.outcomes.push((item, outcome));
    }

    /// Total failed transfers across all reasons.
    #[must_use]
    pub fn transfers_failed(&self) -> usize {
        self.failures_by_reason.values().sum()
    }

    /// True when every discovered item was either filtered out or given
    /// exactly one outcome.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.items_discovered == self.items_below_min_duration + self.outcomes.len()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages visited ({} fetch failures, {} extraction failures); \
             {} items discovered, {} below minimum duration; \
             {} transferred, {} skipped, {} failed",
            self.pages_visited,
            self.page_failures,
            self.extraction_failures,
            self.items_discovered,
            self.items_below_min_duration,
            self.transfers_succeeded,
            self.transfers_skipped,
            self.transfers_failed(),
        )?;
        if !self.failures_by_reason.is_empty() {
            let reasons: Vec<String> = self
                .failures_by_reason
                .iter()
                .map(|(tag, count)| format!("{tag}={count}"))
                .collect();
            write!(f, " [{}]", reasons.join(", "))?;
        }
        Ok(())
    }
}
