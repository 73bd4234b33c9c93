//! Crawl frontier: pending pages, dedup, depth and page-count caps.
//!
//! The frontier hands out each page at most once per run and never a page
//! the [`ProgressStore`] already records as visited. Visits are written
//! through to the store while the frontier lock is held, so the in-memory
//! and durable views of the visited set cannot diverge.

mod fetch;
mod page;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};
use url::Url;

use crate::progress::ProgressStore;

pub use fetch::{HttpPageFetcher, PageContent, PageFetchError, PageFetcher};
pub use page::PageRef;

#[derive(Debug, Default)]
struct FrontierState {
    pending: VecDeque<PageRef>,
    /// Keys of every page ever enqueued this run (pending or dispatched).
    seen: HashSet<String>,
    dispatched: usize,
}

/// Thread-safe crawl frontier.
#[derive(Debug)]
pub struct Frontier {
    state: Mutex<FrontierState>,
    store: Arc<ProgressStore>,
    max_depth: u32,
    max_pages: usize,
}

impl Frontier {
    /// Creates an empty frontier bound to `store`.
    #[must_use]
    pub fn new(store: Arc<ProgressStore>, max_depth: u32, max_pages: usize) -> Self {
        Self {
            state: Mutex::new(FrontierState::default()),
            store,
            max_depth,
            max_pages,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `page` unless it is too deep, already seen this run, or already
    /// visited in a previous run. Returns true if the page was queued.
    pub fn enqueue(&self, page: PageRef) -> bool {
        if page.depth() > self.max_depth {
            trace!(page = %page, max_depth = self.max_depth, "page beyond max depth");
            return false;
        }
        let mut state = self.lock();
        if state.seen.contains(page.key()) || self.store.is_visited(page.key()) {
            return false;
        }
        state.seen.insert(page.key().to_string());
        debug!(page = %page, "page enqueued");
        state.pending.push_back(page);
        true
    }

    /// Enqueues a link found on `parent`, one level deeper.
    pub fn enqueue_discovered(&self, url: Url, parent: &PageRef) -> bool {
        self.enqueue(PageRef::new(url, parent.depth().saturating_add(1)))
    }

    /// Removes up to `limit` pending pages in FIFO order, bounded by the
    /// remaining page budget. Returned pages are never handed out again.
    pub fn next_batch(&self, limit: usize) -> Vec<PageRef> {
        let mut state = self.lock();
        let budget = self.max_pages.saturating_sub(state.dispatched);
        let take = limit.min(budget).min(state.pending.len());
        let batch: Vec<PageRef> = state.pending.drain(..take).collect();
        state.dispatched += batch.len();
        batch
    }

    /// Records `page` as visited in the progress store.
    pub fn mark_visited(&self, page: &PageRef) {
        let _state = self.lock();
        self.store.mark_visited(page.key());
    }

    /// Pages waiting to be dispatched.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Pages handed out so far this run.
    #[must_use]
    pub fn dispatched_count(&self) -> usize {
        self.lock().dispatched
    }

    /// True when nothing is pending or the page budget is spent.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() || state.dispatched >= self.max_pages
    }
}
