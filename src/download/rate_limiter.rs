//! Per-host politeness delays for page fetches.
//!
//! The [`RateLimiter`] enforces a minimum, randomly jittered gap between
//! requests to the same host. Requests to different hosts proceed in parallel
//! without waiting for each other.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use harvester_core::download::RateLimiter;
//!
//! # async fn example() {
//! // 1s between requests to one host, plus up to 2s of jitter
//! let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1), Duration::from_secs(2)));
//!
//! // First request proceeds immediately
//! limiter.acquire("https://example.com/page1").await;
//!
//! // Second request to same host waits
//! limiter.acquire("https://example.com/page2").await;
//!
//! // Request to a different host proceeds immediately
//! limiter.acquire("https://other.com/page").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::CUMULATIVE_DELAY_WARNING_THRESHOLD;

/// Per-host rate limiter, shared across page-fetch tasks through `Arc`.
///
/// Uses `DashMap` for concurrent access to per-host state and
/// `tokio::sync::Mutex` for the read-update of the last request time.
#[derive(Debug)]
pub struct RateLimiter {
    /// Fixed minimum gap between requests to one host.
    base_delay: Duration,

    /// Upper bound of the random extra gap.
    jitter: Duration,

    /// Whether delays are disabled.
    disabled: bool,

    /// Per-host state. Values are `Arc` so the map shard lock is released
    /// before awaiting on the inner mutex.
    domains: DashMap<String, Arc<DomainState>>,
}

#[derive(Debug)]
struct DomainState {
    /// `None` until the first request; the first request is immediate.
    last_request: Mutex<Option<Instant>>,

    /// Total delay applied to this host, in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

impl DomainState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a limiter with a fixed per-host gap plus up to `jitter` extra.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = base_delay.as_millis(), jitter_ms = jitter.as_millis()))]
    pub fn new(base_delay: Duration, jitter: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            base_delay,
            jitter,
            disabled: base_delay.is_zero() && jitter.is_zero(),
            domains: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            disabled: true,
            domains: DashMap::new(),
        }
    }

    /// Returns whether delays are disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the fixed per-host gap.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Picks the gap required before the next request to a host.
    #[allow(clippy::cast_possible_truncation)]
    fn next_gap(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base_delay;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.base_delay + Duration::from_millis(jitter_ms)
    }

    /// Waits until a request to `url`'s host is allowed, then records it.
    ///
    /// The first request to any host proceeds immediately.
    #[instrument(skip(self), fields(domain))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let domain = extract_domain(url);
        tracing::Span::current().record("domain", &domain);

        let state = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(DomainState::new()))
            .clone();

        let mut last_request_guard = state.last_request.lock().await;

        if let Some(last_request) = *last_request_guard {
            let gap = self.next_gap();
            let elapsed = last_request.elapsed();

            if elapsed < gap {
                let delay = gap.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    domain = %domain,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying politeness delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        domain = %domain,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive politeness delay - many pages queued for one host"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        } else {
            debug!(domain = %domain, "first request to host - no delay");
        }

        *last_request_guard = Some(Instant::now());
    }
}

/// Extracts the lowercase host from a URL.
///
/// Returns "unknown" for malformed URLs, so every request is still
/// delayed even if the URL cannot be parsed.
///
/// ```
/// use harvester_core::download::extract_domain;
///
/// assert_eq!(extract_domain("https://example.com/path"), "example.com");
/// assert_eq!(extract_domain("http://Example.COM/Path"), "example.com");
/// assert_eq!(extract_domain("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}
