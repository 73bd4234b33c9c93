//! Crawl-and-harvest orchestration.
//!
//! A run moves through [`RunPhase`]s: seeds are enqueued, page batches are
//! fetched and extracted, items are filtered by estimated duration and handed
//! to the [`TransferCoordinator`] on spawned tasks so discovery keeps going
//! while transfers run. Once the frontier is drained every batch is awaited
//! and the progress record is flushed.

mod summary;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{StreamExt, stream};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{ConfigError, CrawlConfig};
use crate::coordinator::{CoordinatorError, Transfer, TransferCoordinator};
use crate::download::{DownloadError, HttpClient, RateLimiter, TransferEngine};
use crate::extract::{CandidateExtractor, HtmlExtractor};
use crate::frontier::{Frontier, HttpPageFetcher, PageFetcher, PageRef};
use crate::item::{CandidateItem, FailureReason, SkipReason, TransferOutcome};
use crate::progress::{ProgressError, ProgressStore};

pub use summary::RunSummary;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Enqueueing seed pages.
    Seeding,
    /// Fetching a page batch and extracting from it.
    Discovering,
    /// Applying the minimum-duration filter and per-run dedup.
    Filtering,
    /// Handing a filtered batch to the coordinator.
    Transferring,
    /// Waiting for outstanding transfers, then persisting progress.
    Flushing,
    /// The run finished.
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Seeding => "seeding",
            Self::Discovering => "discovering",
            Self::Filtering => "filtering",
            Self::Transferring => "transferring",
            Self::Flushing => "flushing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Failures while wiring a pipeline from configuration.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[source] ConfigError),

    /// An HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] DownloadError),

    /// The transfer pool could not be created.
    #[error("failed to create transfer pool: {0}")]
    Coordinator(#[source] CoordinatorError),
}

type BatchHandle = JoinHandle<Vec<(CandidateItem, TransferOutcome)>>;

/// Drives frontier, extractor, filter and coordinator for one run.
pub struct Pipeline {
    store: Arc<ProgressStore>,
    frontier: Arc<Frontier>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn CandidateExtractor>,
    coordinator: Arc<TransferCoordinator>,
    cancel: Arc<AtomicBool>,
    min_duration_secs: u64,
    crawl_concurrency: usize,
    phase: Mutex<RunPhase>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("frontier", &self.frontier)
            .field("coordinator", &self.coordinator)
            .field("min_duration_secs", &self.min_duration_secs)
            .field("crawl_concurrency", &self.crawl_concurrency)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Assembles a pipeline from explicit collaborators.
    #[must_use]
    pub fn new(
        config: &CrawlConfig,
        store: Arc<ProgressStore>,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn CandidateExtractor>,
        coordinator: Arc<TransferCoordinator>,
    ) -> Self {
        let frontier = Arc::new(Frontier::new(
            Arc::clone(&store),
            config.max_depth,
            config.max_pages,
        ));
        Self {
            store,
            frontier,
            fetcher,
            extractor,
            coordinator,
            cancel: Arc::new(AtomicBool::new(false)),
            min_duration_secs: config.min_duration_secs,
            crawl_concurrency: config.crawl_concurrency.max(1),
            phase: Mutex::new(RunPhase::Seeding),
        }
    }

    /// Builds the default HTTP fetcher, HTML extractor and transfer engine
    /// from `config`, all sharing `cancel`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the configuration is invalid or a client
    /// cannot be built.
    pub fn from_config(
        config: &CrawlConfig,
        store: Arc<ProgressStore>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;

        let page_client = HttpClient::for_pages(&config.user_agent, config.page_timeout)
            .map_err(PipelineError::Client)?;
        let rate_limiter = Arc::new(RateLimiter::new(config.page_delay, config.page_jitter));
        let fetcher = Arc::new(HttpPageFetcher::new(page_client, rate_limiter));

        let engine = TransferEngine::from_config(config, Arc::clone(&store), Arc::clone(&cancel))
            .map_err(PipelineError::Client)?;
        let engine: Arc<dyn Transfer> = Arc::new(engine);
        let coordinator = TransferCoordinator::new(config.transfer_concurrency, engine)
            .map_err(PipelineError::Coordinator)?
            .with_cancel_flag(Arc::clone(&cancel));

        Ok(Self::new(
            config,
            store,
            fetcher,
            Arc::new(HtmlExtractor::new()),
            Arc::new(coordinator),
        )
        .with_cancel_flag(cancel))
    }

    /// Shares the run's cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, phase: RunPhase) {
        let mut current = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != phase {
            debug!(from = %*current, to = %phase, "run phase");
            *current = phase;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Crawls from `seeds` until the frontier is drained, the page budget is
    /// spent or the run is cancelled, then waits for every transfer and
    /// persists progress.
    ///
    /// Page, extraction and transfer failures are tallied in the summary.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] if the final progress flush fails.
    #[instrument(skip(self, seeds), fields(seeds = seeds.len()))]
    pub async fn run(&self, seeds: Vec<Url>) -> Result<RunSummary, ProgressError> {
        let mut summary = RunSummary::default();
        let mut dispatched: HashSet<String> = HashSet::new();
        let mut batches: Vec<(Vec<CandidateItem>, BatchHandle)> = Vec::new();

        self.enter(RunPhase::Seeding);
        self.store.set_min_duration(self.min_duration_secs);
        for seed in seeds {
            let page = PageRef::new(seed, 0);
            if !self.frontier.enqueue(page.clone()) {
                info!(seed = %page, "seed already queued or visited, skipping");
            }
        }

        loop {
            if self.is_cancelled() {
                info!("run cancelled, discovery stopped");
                break;
            }
            let pages = self.frontier.next_batch(self.crawl_concurrency);
            if pages.is_empty() {
                break;
            }

            self.enter(RunPhase::Discovering);
            let found = self.discover(pages, &mut summary).await;
            summary.items_discovered += found.len();

            self.enter(RunPhase::Filtering);
            let mut batch = Vec::new();
            for item in found {
                if item.estimated_duration_secs < self.min_duration_secs {
                    debug!(
                        locator = %item.locator,
                        estimated_duration_secs = item.estimated_duration_secs,
                        "below minimum duration"
                    );
                    summary.items_below_min_duration += 1;
                } else if !dispatched.insert(item.locator_key().to_string()) {
                    summary.record(item, TransferOutcome::skipped(SkipReason::Duplicate));
                } else {
                    batch.push(item);
                }
            }

            if !batch.is_empty() {
                self.enter(RunPhase::Transferring);
                info!(items = batch.len(), "dispatching transfer batch");
                let coordinator = Arc::clone(&self.coordinator);
                let items = batch.clone();
                let handle = tokio::spawn(async move { coordinator.run(items).await });
                batches.push((batch, handle));
            }
        }

        self.enter(RunPhase::Flushing);
        for (items, handle) in batches {
            match handle.await {
                Ok(results) => {
                    for (item, outcome) in results {
                        summary.record(item, outcome);
                    }
                }
                Err(error) => {
                    warn!(error = %error, items = items.len(), "transfer batch aborted");
                    for item in items {
                        summary.record(
                            item,
                            TransferOutcome::failed(FailureReason::Network {
                                detail: "transfer batch aborted".to_string(),
                            }),
                        );
                    }
                }
            }
        }
        self.store.flush().await?;

        self.enter(RunPhase::Done);
        info!(
            pages_visited = summary.pages_visited,
            items_discovered = summary.items_discovered,
            transfers_succeeded = summary.transfers_succeeded,
            transfers_skipped = summary.transfers_skipped,
            transfers_failed = summary.transfers_failed(),
            "run complete"
        );
        Ok(summary)
    }

    /// Fetches `pages` concurrently, extracts them and enqueues their links.
    /// Every page is marked visited, fetched or not.
    async fn discover(&self, pages: Vec<PageRef>, summary: &mut RunSummary) -> Vec<CandidateItem> {
        let fetched: Vec<_> = stream::iter(pages)
            .map(|page| {
                let fetcher = Arc::clone(&self.fetcher);
                async move {
                    let result = fetcher.fetch_page(&page).await;
                    (page, result)
                }
            })
            .buffer_unordered(self.crawl_concurrency)
            .collect()
            .await;

        let mut items = Vec::new();
        for (page, result) in fetched {
            self.frontier.mark_visited(&page);
            summary.pages_visited += 1;

            let content = match result {
                Ok(content) => content,
                Err(error) => {
                    warn!(page = %page, error = %error, "page fetch failed");
                    summary.page_failures += 1;
                    continue;
                }
            };

            match self.extractor.extract(&page, &content) {
                Ok(extraction) => {
                    let mut queued = 0usize;
                    for link in extraction.links {
                        if self.frontier.enqueue_discovered(link, &page) {
                            queued += 1;
                        }
                    }
                    debug!(
                        page = %page,
                        items = extraction.items.len(),
                        links_queued = queued,
                        "page processed"
                    );
                    items.extend(extraction.items);
                }
                Err(error) => {
                    warn!(page = %page, error = %error, "extraction failed");
                    summary.extraction_failures += 1;
                }
            }
        }
        items
    }
}
