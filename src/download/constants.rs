//! Constants for the download module (timeouts, chunking, politeness).

use std::time::Duration;

/// Default HTTP connect timeout for media transfers (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-read timeout for media transfers (60 seconds of silence).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Default total timeout for a single page fetch (10 seconds).
pub const PAGE_TIMEOUT_SECS: u64 = 10;

/// Default write granularity for working files (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Suffix of in-progress working files.
pub const WORKING_FILE_SUFFIX: &str = "part";

/// Extension used when the locator path carries no recognised media extension.
pub const DEFAULT_MEDIA_EXTENSION: &str = "mp4";

/// Warning threshold for cumulative politeness delay per host (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);
