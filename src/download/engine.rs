//! Transfer engine: one item from locator to verified local file.
//!
//! Each call to [`TransferEngine::transfer`] owns exactly one
//! [`TransferTask`] and drives it through the retry state machine:
//!
//! 1. Skip locators the [`ProgressStore`] already records as complete.
//! 2. Reserve an attempt with the store; stop once the budget is spent,
//!    including attempts made in earlier runs. A cancelled attempt is handed
//!    back, so interruptions never use up the budget.
//! 3. Resume from the working file's size with a `Range` request, or
//!    restart from zero when the server does not honour it.
//! 4. Stream in fixed-size chunks, verify the size against the declared
//!    total and rename the working file into place.
//! 5. On a transient failure wait `attempt x base delay` and go again.
//!
//! Working files survive transient failures so progress compounds across
//! attempts and runs; they are deleted only when retries are exhausted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tracing::{debug, info, instrument, warn};

use super::client::{MediaResponse, ResumePlan, stream_to_file};
use super::constants::DEFAULT_CHUNK_SIZE;
use super::filename::{TransferPaths, resolve_unique_path};
use super::retry::{RetryPolicy, classify_error};
use super::task::{TransferState, TransferTask};
use super::{DownloadError, HttpClient};
use crate::config::CrawlConfig;
use crate::coordinator::Transfer;
use crate::item::{CandidateItem, FailureReason, SkipReason, TransferOutcome};
use crate::progress::ProgressStore;

/// How often a retry backoff checks the cancellation flag.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Resumable, retrying transfer of single items.
///
/// Cheap to share behind `Arc`; all mutable state lives in the
/// [`ProgressStore`] and in the per-call [`TransferTask`].
#[derive(Debug)]
pub struct TransferEngine {
    client: HttpClient,
    store: Arc<ProgressStore>,
    policy: RetryPolicy,
    output_dir: PathBuf,
    chunk_size: usize,
    flush_after_each: bool,
    cancel: Arc<AtomicBool>,
}

impl TransferEngine {
    /// Creates an engine writing into `output_dir`.
    #[must_use]
    pub fn new(
        client: HttpClient,
        store: Arc<ProgressStore>,
        policy: RetryPolicy,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            store,
            policy,
            output_dir: output_dir.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            flush_after_each: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds an engine and its transfer client from run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the HTTP client cannot be built.
    pub fn from_config(
        config: &CrawlConfig,
        store: Arc<ProgressStore>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, DownloadError> {
        let client = HttpClient::for_transfers(
            &config.user_agent,
            config.transfer_connect_timeout,
            config.transfer_read_timeout,
        )?;
        let policy = RetryPolicy::new(config.max_attempts, config.retry_base_delay);
        Ok(Self::new(client, store, policy, &config.output_dir)
            .with_chunk_size(config.chunk_size)
            .with_flush_after_each(config.flush_after_each_transfer)
            .with_cancel_flag(cancel))
    }

    /// Sets the write granularity for working files.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Persists progress after every successful transfer when enabled.
    #[must_use]
    pub fn with_flush_after_each(mut self, enabled: bool) -> Self {
        self.flush_after_each = enabled;
        self
    }

    /// Shares the run's cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Transfers one item, returning its final outcome.
    ///
    /// Never returns an error: every failure is folded into
    /// [`TransferOutcome::Failed`] with a [`FailureReason`].
    #[instrument(skip(self, item), fields(locator = %item.locator, title = %item.title))]
    pub async fn transfer(&self, item: &CandidateItem) -> TransferOutcome {
        let locator = item.locator_key();
        if self.store.is_completed(locator) {
            debug!("locator already completed");
            return TransferOutcome::skipped(SkipReason::AlreadyCompleted);
        }
        if !matches!(item.locator.scheme(), "http" | "https") {
            let error = DownloadError::invalid_url(locator);
            return TransferOutcome::failed(FailureReason::from(&error));
        }

        let paths = TransferPaths::derive(&self.output_dir, &item.title, &item.locator);
        let mut task = TransferTask::new(item.clone(), self.store.attempt_count(locator));
        let mut last_failure: Option<FailureReason> = None;

        loop {
            if self.is_cancelled() {
                return if last_failure.is_some() {
                    TransferOutcome::failed(FailureReason::Cancelled)
                } else {
                    TransferOutcome::skipped(SkipReason::Cancelled)
                };
            }

            let Some(attempt) = self.store.begin_attempt(locator, self.policy.max_attempts())
            else {
                task.record_exhausted();
                warn!(
                    attempts = task.attempt_count,
                    "attempt budget already spent for locator"
                );
                discard_working_file(&paths.working).await;
                return TransferOutcome::failed(FailureReason::ExhaustedRetries {
                    attempts: task.attempt_count,
                    last: last_failure.map(Box::new),
                });
            };
            task.begin_attempt(attempt);
            debug!(attempt, max_attempts = self.policy.max_attempts(), "attempting transfer");

            let error = match self.attempt(&mut task, &paths).await {
                Ok(outcome) => {
                    task.record_success();
                    return outcome;
                }
                Err(error) => error,
            };

            let reason = FailureReason::from(&error);
            if matches!(error, DownloadError::Cancelled { .. }) {
                self.store.release_attempt(locator);
                info!(
                    bytes_confirmed = task.bytes_confirmed,
                    "transfer cancelled, working file kept for resume"
                );
                return TransferOutcome::failed(reason);
            }

            match task.record_failure(classify_error(&error), &self.policy) {
                TransferState::Retrying { attempt, delay } => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying transfer"
                    );
                    last_failure = Some(reason);
                    if self.sleep_unless_cancelled(delay).await {
                        return TransferOutcome::failed(FailureReason::Cancelled);
                    }
                }
                TransferState::Exhausted { attempts } => {
                    warn!(attempts, error = %error, "transfer failed after all attempts");
                    discard_working_file(&paths.working).await;
                    return TransferOutcome::failed(FailureReason::ExhaustedRetries {
                        attempts,
                        last: Some(Box::new(reason)),
                    });
                }
                // Abandoned: permanent failure, working file kept.
                _ => {
                    warn!(error = %error, "transfer failed permanently");
                    return TransferOutcome::failed(reason);
                }
            }
        }
    }

    /// One attempt: open, stream, verify, rename, record.
    async fn attempt(
        &self,
        task: &mut TransferTask,
        paths: &TransferPaths,
    ) -> Result<TransferOutcome, DownloadError> {
        let locator = task.item.locator.clone();
        let existing = working_file_len(&paths.working).await?;
        task.confirm_bytes(existing);

        let media = match self.client.open_media(&locator, existing).await {
            Ok(media) => media,
            Err(error) => {
                if discards_working_file(&error) {
                    debug!(error = %error, "discarding working file");
                    discard_working_file(&paths.working).await;
                    task.confirm_bytes(0);
                }
                return Err(error);
            }
        };
        let MediaResponse {
            response,
            plan,
            declared_total,
        } = media;

        let (mut file, offset) = match plan {
            ResumePlan::Append { offset } => {
                debug!(offset, "resuming working file");
                let file = OpenOptions::new()
                    .append(true)
                    .open(&paths.working)
                    .await
                    .map_err(|e| DownloadError::io(&paths.working, e))?;
                (file, offset)
            }
            ResumePlan::Restart => {
                let file = File::create(&paths.working)
                    .await
                    .map_err(|e| DownloadError::io(&paths.working, e))?;
                (file, 0)
            }
        };
        task.confirm_bytes(offset);

        let mut confirmed = offset;
        let streamed = stream_to_file(
            &mut file,
            response,
            locator.as_str(),
            &paths.working,
            self.chunk_size,
            &self.cancel,
            |bytes| confirmed += bytes,
        )
        .await;
        drop(file);
        task.confirm_bytes(confirmed);
        streamed?;

        let actual = working_file_len(&paths.working).await?;
        if let Some(expected) = declared_total
            && expected != actual
        {
            if actual > expected {
                discard_working_file(&paths.working).await;
            }
            return Err(DownloadError::size_mismatch(&paths.working, expected, actual));
        }

        let final_path = resolve_unique_path(&paths.final_path);
        tokio::fs::rename(&paths.working, &final_path)
            .await
            .map_err(|e| DownloadError::io(&final_path, e))?;

        self.store.mark_completed(locator.as_str());
        if self.flush_after_each
            && let Err(error) = self.store.flush().await
        {
            warn!(error = %error, "intermediate progress flush failed");
        }

        info!(
            path = %final_path.display(),
            bytes = actual,
            attempt = task.attempt_count,
            resumed = offset > 0,
            "transfer complete"
        );

        Ok(TransferOutcome::Success {
            path: final_path,
            bytes: actual,
        })
    }

    /// Sleeps for `delay`, returning true early if the run is cancelled.
    async fn sleep_unless_cancelled(&self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep((deadline - now).min(CANCEL_POLL_INTERVAL)).await;
        }
    }
}

#[async_trait]
impl Transfer for TransferEngine {
    async fn transfer(&self, item: &CandidateItem) -> TransferOutcome {
        TransferEngine::transfer(self, item).await
    }
}

/// 416 and misaligned 206 replies mean the working file cannot be resumed.
fn discards_working_file(error: &DownloadError) -> bool {
    matches!(
        error,
        DownloadError::HttpStatus { status: 416, .. } | DownloadError::UnexpectedRange { .. }
    )
}

async fn working_file_len(path: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::io(path, e)),
    }
}

async fn discard_working_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "working file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove working file"),
    }
}
