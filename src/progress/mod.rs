//! Durable crawl progress: visited pages, completed locators, attempt counters.
//!
//! The [`ProgressStore`] is the only writer of durable state. Callers share
//! it through `Arc`; every mutation goes through a short `std::sync::Mutex`
//! critical section that never spans an `.await`. [`ProgressStore::flush`]
//! snapshots the record and writes it atomically (temp file, fsync, rename),
//! so a crash mid-flush leaves the previous file intact.
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::progress::ProgressStore;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ProgressStore::load(Path::new("./download_progress.json")).await?;
//! if !store.is_completed("https://cdn.example.com/clip.mp4") {
//!     // transfer it
//! }
//! store.flush().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod record;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, instrument, warn};

pub use error::ProgressError;
pub use record::ProgressRecord;
use record::ProgressFile;

/// File name of the progress record inside the output directory.
pub const PROGRESS_FILE_NAME: &str = "download_progress.json";

/// Suffix of the temporary file written before the atomic rename.
const TEMP_SUFFIX: &str = "tmp";

/// Mutex-guarded progress record bound to its file.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    record: Mutex<ProgressRecord>,
    /// Serializes flushes so two snapshots never race on the temp file.
    flush_lock: tokio::sync::Mutex<()>,
}

impl ProgressStore {
    /// Loads the record at `path`. A missing file is an empty record.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Read`] if the file exists but cannot be read,
    /// or [`ProgressError::Corrupted`] if it is not a valid record.
    #[instrument(fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, ProgressError> {
        let record = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let file: ProgressFile = serde_json::from_slice(&bytes)
                    .map_err(|e| ProgressError::corrupted(path, e))?;
                let mut record = ProgressRecord::from(file);
                let repaired = record.repair_counters();
                if repaired > 0 {
                    warn!(repaired, "completed locators without attempt counters");
                }
                info!(
                    completed = record.completed_locators.len(),
                    visited = record.visited_pages.len(),
                    "loaded progress record"
                );
                record
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no progress file, starting fresh");
                ProgressRecord::default()
            }
            Err(e) => return Err(ProgressError::read(path, e)),
        };

        Ok(Self::with_record(path, record))
    }

    /// Creates a store around an existing record without touching disk.
    #[must_use]
    pub fn with_record(path: impl Into<PathBuf>, record: ProgressRecord) -> Self {
        Self {
            path: path.into(),
            record: Mutex::new(record),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Path the record is flushed to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ProgressRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if `locator` was fully received and verified.
    #[must_use]
    pub fn is_completed(&self, locator: &str) -> bool {
        self.lock().completed_locators.contains(locator)
    }

    /// Returns true if `page` was already crawled.
    #[must_use]
    pub fn is_visited(&self, page: &str) -> bool {
        self.lock().visited_pages.contains(page)
    }

    /// Records `page` as crawled. Returns false if it already was.
    pub fn mark_visited(&self, page: &str) -> bool {
        self.lock().visited_pages.insert(page.to_string())
    }

    /// Records `locator` as complete.
    pub fn mark_completed(&self, locator: &str) {
        let mut record = self.lock();
        let counter = record.attempt_counters.entry(locator.to_string()).or_insert(0);
        if *counter == 0 {
            *counter = 1;
        }
        record.completed_locators.insert(locator.to_string());
    }

    /// Attempts recorded for `locator`.
    #[must_use]
    pub fn attempt_count(&self, locator: &str) -> u32 {
        self.lock()
            .attempt_counters
            .get(locator)
            .copied()
            .unwrap_or(0)
    }

    /// Reserves the next attempt for `locator` if fewer than `max_attempts`
    /// were recorded, returning its 1-indexed number. Returns `None` once the
    /// budget is spent; the counter is never pushed past `max_attempts`.
    pub fn begin_attempt(&self, locator: &str, max_attempts: u32) -> Option<u32> {
        let mut record = self.lock();
        let counter = record.attempt_counters.entry(locator.to_string()).or_insert(0);
        if *counter >= max_attempts {
            return None;
        }
        *counter += 1;
        Some(*counter)
    }

    /// Returns an attempt reserved by [`Self::begin_attempt`] that ended
    /// without a failure, such as a cancelled transfer. Saturates at zero and
    /// drops the counter entry once nothing is left.
    pub fn release_attempt(&self, locator: &str) {
        let mut record = self.lock();
        let Some(counter) = record.attempt_counters.get_mut(locator) else {
            return;
        };
        *counter = counter.saturating_sub(1);
        let remaining = *counter;
        if remaining == 0 && !record.completed_locators.contains(locator) {
            record.attempt_counters.remove(locator);
        }
    }

    /// Forgets every visited page. Returns how many were cleared.
    pub fn reset_visited(&self) -> usize {
        let mut record = self.lock();
        let cleared = record.visited_pages.len();
        record.visited_pages.clear();
        cleared
    }

    /// Stores the minimum duration in effect for this run.
    pub fn set_min_duration(&self, secs: u64) {
        self.lock().min_duration_secs = secs;
    }

    /// Copy of the current record.
    #[must_use]
    pub fn snapshot(&self) -> ProgressRecord {
        self.lock().clone()
    }

    /// Writes the current record to disk atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Serialize`] or [`ProgressError::Write`].
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn flush(&self) -> Result<(), ProgressError> {
        let _flush_guard = self.flush_lock.lock().await;

        let file = ProgressFile::from(&self.snapshot());
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|source| ProgressError::Serialize { source })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProgressError::write(parent, e))?;
        }

        let temp_path = self.temp_path();
        let mut temp = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| ProgressError::write(&temp_path, e))?;
        tokio::io::AsyncWriteExt::write_all(&mut temp, &json)
            .await
            .map_err(|e| ProgressError::write(&temp_path, e))?;
        temp.sync_all()
            .await
            .map_err(|e| ProgressError::write(&temp_path, e))?;
        drop(temp);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| ProgressError::write(&self.path, e))?;

        debug!(bytes = json.len(), "progress flushed");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| PROGRESS_FILE_NAME.into());
        name.push(".");
        name.push(TEMP_SUFFIX);
        self.path.with_file_name(name)
    }
}
