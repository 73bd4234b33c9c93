//! Resumable media transfers and the HTTP plumbing shared with page fetches.
//!
//! # Features
//!
//! - Byte-range resume from deterministic per-locator working files
//! - Chunked, flushed writes so a working file never overstates progress
//! - Size verification against `Content-Range` / `Content-Length`
//! - Linear-backoff retries with attempt counts persisted across runs
//! - Per-host politeness delays for page fetches
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use std::time::Duration;
//! use harvester_core::download::{HttpClient, RetryPolicy, TransferEngine};
//! use harvester_core::progress::ProgressStore;
//! use harvester_core::CandidateItem;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(ProgressStore::load(Path::new("./download_progress.json")).await?);
//! let client = HttpClient::for_transfers("harvester", Duration::from_secs(30), Duration::from_secs(60))?;
//! let engine = TransferEngine::new(client, store, RetryPolicy::default(), "./videos");
//! let item = CandidateItem::new(
//!     Url::parse("https://cdn.example.com/clip.mp4")?,
//!     "Clip",
//!     600,
//!     Url::parse("https://example.com/")?,
//! );
//! println!("{:?}", engine.transfer(&item).await);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod engine;
mod error;
pub mod filename;
pub mod rate_limiter;
mod retry;
mod task;

pub use client::{HttpClient, MediaResponse, ResumePlan};
pub use engine::TransferEngine;
pub use error::DownloadError;
pub use rate_limiter::{RateLimiter, extract_domain};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy,
    classify_error,
};
pub use task::{TransferState, TransferTask};

// No module-local Result aliases: use `Result<T, DownloadError>` explicitly.
