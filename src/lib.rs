//! Harvester Core Library
//!
//! Crawls linked web pages, discovers media references and transfers the
//! qualifying ones to local storage with resumable, retrying, bounded
//! transfers. Progress survives restarts through a JSON progress file.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`progress`] - Durable record of visited pages, completed locators and attempt counters
//! - [`frontier`] - Pending pages, dedup, depth and page-count caps, page fetching
//! - [`download`] - Resumable transfer engine, retry policy, HTTP plumbing
//! - [`coordinator`] - Bounded fan-out of transfers with per-item outcomes
//! - [`extract`] - Candidate extraction from fetched pages
//! - [`pipeline`] - Orchestration of one crawl-and-harvest run
//! - [`config`] - Run configuration and the optional config file

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordinator;
pub mod download;
pub mod extract;
pub mod frontier;
pub mod item;
pub mod pipeline;
pub mod progress;
pub mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, CrawlConfig, FileConfig};
pub use coordinator::{CoordinatorError, Transfer, TransferCoordinator};
pub use download::{
    DownloadError, FailureType, HttpClient, RateLimiter, RetryDecision, RetryPolicy,
    TransferEngine, TransferState, classify_error,
};
pub use extract::{CandidateExtractor, Extraction, ExtractionError, HtmlExtractor};
pub use frontier::{Frontier, HttpPageFetcher, PageContent, PageFetchError, PageFetcher, PageRef};
pub use item::{CandidateItem, FailureReason, SkipReason, TransferOutcome};
pub use pipeline::{Pipeline, PipelineError, RunPhase, RunSummary};
pub use progress::{PROGRESS_FILE_NAME, ProgressError, ProgressRecord, ProgressStore};
