//! Run configuration passed explicitly to every pipeline collaborator.
//!
//! [`CrawlConfig`] is built once (defaults, then an optional JSON
//! [`FileConfig`], then CLI flags) and is immutable for the rest of the run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CHUNK_SIZE, PAGE_TIMEOUT_SECS, READ_TIMEOUT_SECS,
};
use crate::download::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::user_agent::default_user_agent;

/// Default minimum estimated duration for an item to be transferred (5 minutes).
pub const DEFAULT_MIN_DURATION_SECS: u64 = 300;

/// Default maximum crawl depth below a seed page.
pub const DEFAULT_MAX_DEPTH: u32 = 2;

/// Default maximum pages visited per run.
pub const DEFAULT_MAX_PAGES: usize = 20;

/// Default number of pages fetched concurrently.
pub const DEFAULT_CRAWL_CONCURRENCY: usize = 3;

/// Default number of concurrent media transfers.
///
/// Smaller than the crawl pool: transfers are bandwidth and disk bound.
pub const DEFAULT_TRANSFER_CONCURRENCY: usize = 2;

/// Default fixed delay between page requests to the same host.
pub const DEFAULT_PAGE_DELAY_MS: u64 = 1000;

/// Default random jitter added on top of the page delay.
pub const DEFAULT_PAGE_JITTER_MS: u64 = 2000;

const MAX_CONCURRENCY: usize = 100;
const MAX_ATTEMPTS_LIMIT: u32 = 20;
const MIN_CHUNK_SIZE: usize = 1024;
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Errors raised while building or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value falls outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Offending field name.
        field: &'static str,
        /// Rendered offending value.
        value: String,
        /// Human-readable accepted range.
        expected: &'static str,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`FileConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Immutable settings for one crawl-and-harvest run.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Directory receiving working files, final files and the progress file.
    pub output_dir: PathBuf,
    /// Items with a shorter estimated duration are not transferred.
    pub min_duration_secs: u64,
    /// Pages deeper than this below a seed are not enqueued.
    pub max_depth: u32,
    /// Maximum pages dispatched for crawling in one run.
    pub max_pages: usize,
    /// Page-fetch pool size.
    pub crawl_concurrency: usize,
    /// Transfer pool size.
    pub transfer_concurrency: usize,
    /// Maximum attempts per locator, counted across runs.
    pub max_attempts: u32,
    /// Linear backoff unit: attempt N waits N times this.
    pub retry_base_delay: Duration,
    /// Total timeout for one page fetch.
    pub page_timeout: Duration,
    /// Connect timeout for media transfers.
    pub transfer_connect_timeout: Duration,
    /// Per-read timeout for media transfers.
    pub transfer_read_timeout: Duration,
    /// Fixed delay between page requests to one host.
    pub page_delay: Duration,
    /// Upper bound of the random jitter added to `page_delay`.
    pub page_jitter: Duration,
    /// Write granularity for working files.
    pub chunk_size: usize,
    /// Persist progress after every successful transfer, not only at run end.
    pub flush_after_each_transfer: bool,
    /// User-Agent sent with every request.
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
            max_depth: DEFAULT_MAX_DEPTH,
            max_pages: DEFAULT_MAX_PAGES,
            crawl_concurrency: DEFAULT_CRAWL_CONCURRENCY,
            transfer_concurrency: DEFAULT_TRANSFER_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_BASE_DELAY,
            page_timeout: Duration::from_secs(PAGE_TIMEOUT_SECS),
            transfer_connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            transfer_read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            page_jitter: Duration::from_millis(DEFAULT_PAGE_JITTER_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            flush_after_each_transfer: true,
            user_agent: default_user_agent(),
        }
    }
}

impl CrawlConfig {
    /// Validates every field against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pages == 0 {
            return Err(ConfigError::out_of_range(
                "max_pages",
                self.max_pages,
                ">= 1",
            ));
        }
        if !(1..=MAX_CONCURRENCY).contains(&self.crawl_concurrency) {
            return Err(ConfigError::out_of_range(
                "crawl_concurrency",
                self.crawl_concurrency,
                "1..=100",
            ));
        }
        if !(1..=MAX_CONCURRENCY).contains(&self.transfer_concurrency) {
            return Err(ConfigError::out_of_range(
                "transfer_concurrency",
                self.transfer_concurrency,
                "1..=100",
            ));
        }
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.max_attempts) {
            return Err(ConfigError::out_of_range(
                "max_attempts",
                self.max_attempts,
                "1..=20",
            ));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(ConfigError::out_of_range(
                "chunk_size",
                self.chunk_size,
                "1024..=16777216",
            ));
        }
        validate_timeout("page_timeout", self.page_timeout)?;
        validate_timeout("transfer_connect_timeout", self.transfer_connect_timeout)?;
        validate_timeout("transfer_read_timeout", self.transfer_read_timeout)?;
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::out_of_range(
                "user_agent",
                "\"\"",
                "non-empty string",
            ));
        }
        Ok(())
    }

    /// Path of the persisted progress file inside the output directory.
    #[must_use]
    pub fn progress_path(&self) -> PathBuf {
        self.output_dir.join(crate::progress::PROGRESS_FILE_NAME)
    }
}

fn validate_timeout(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() || value.as_secs() > MAX_TIMEOUT_SECS {
        return Err(ConfigError::out_of_range(
            field,
            format!("{}s", value.as_secs_f64()),
            "1..=3600 seconds",
        ));
    }
    Ok(())
}

/// JSON-backed defaults. Every field is optional; explicit CLI flags win.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub min_duration_secs: Option<u64>,
    pub max_depth: Option<u32>,
    pub max_pages: Option<usize>,
    pub crawl_concurrency: Option<usize>,
    pub transfer_concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub retry_base_delay_secs: Option<u64>,
    pub page_timeout_secs: Option<u64>,
    pub transfer_read_timeout_secs: Option<u64>,
    pub page_delay_ms: Option<u64>,
    pub page_jitter_ms: Option<u64>,
    pub flush_after_each_transfer: Option<bool>,
    pub user_agent: Option<String>,
}

impl FileConfig {
    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlays the values present in this file onto `config`.
    pub fn apply_to(&self, config: &mut CrawlConfig) {
        if let Some(output_dir) = &self.output_dir {
            config.output_dir.clone_from(output_dir);
        }
        if let Some(value) = self.min_duration_secs {
            config.min_duration_secs = value;
        }
        if let Some(value) = self.max_depth {
            config.max_depth = value;
        }
        if let Some(value) = self.max_pages {
            config.max_pages = value;
        }
        if let Some(value) = self.crawl_concurrency {
            config.crawl_concurrency = value;
        }
        if let Some(value) = self.transfer_concurrency {
            config.transfer_concurrency = value;
        }
        if let Some(value) = self.max_attempts {
            config.max_attempts = value;
        }
        if let Some(value) = self.retry_base_delay_secs {
            config.retry_base_delay = Duration::from_secs(value);
        }
        if let Some(value) = self.page_timeout_secs {
            config.page_timeout = Duration::from_secs(value);
        }
        if let Some(value) = self.transfer_read_timeout_secs {
            config.transfer_read_timeout = Duration::from_secs(value);
        }
        if let Some(value) = self.page_delay_ms {
            config.page_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.page_jitter_ms {
            config.page_jitter = Duration::from_millis(value);
        }
        if let Some(value) = self.flush_after_each_transfer {
            config.flush_after_each_transfer = value;
        }
        if let Some(value) = &self.user_agent {
            config.user_agent.clone_from(value);
        }
    }
}
