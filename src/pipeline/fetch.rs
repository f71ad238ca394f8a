//! Downloads a remote file into a local scratch path with bounded retries.

use crate::core::config;
use crate::core::retry::{retry, RetryConfig, Retryable};
use crate::core::AppError;
use crate::pipeline::error::PipelineError;
use crate::pipeline::progress::{ProgressEvent, ProgressSender};
use crate::pipeline::transport::MediaSource;
use futures_util::StreamExt;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Why a single download attempt failed.
#[derive(Debug, Error)]
pub enum FetchAttemptError {
    #[error("source error: {0}")]
    Source(#[from] AppError),

    #[error("write error: {0}")]
    Write(#[from] std::io::Error),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl Retryable for FetchAttemptError {
    // Local write failures (missing dir, no permission, disk full) do not heal between attempts.
    fn is_retryable(&self) -> bool {
        match self {
            FetchAttemptError::Source(_) | FetchAttemptError::Timeout(_) => true,
            FetchAttemptError::Write(e) => e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub retry: RetryConfig,
    /// Write buffer capacity
    pub chunk_size: usize,
    /// Emit progress at least this often...
    pub progress_interval: Duration,
    /// ...or after this many new bytes, whichever comes first
    pub progress_bytes: u64,
    pub attempt_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            chunk_size: config::fetch::CHUNK_SIZE_BYTES,
            progress_interval: config::fetch::progress_interval(),
            progress_bytes: config::fetch::PROGRESS_BYTES,
            attempt_timeout: Duration::from_secs(900),
        }
    }
}

impl FetchConfig {
    pub fn from_env() -> Self {
        Self {
            retry: RetryConfig::new()
                .max_attempts(*config::fetch::MAX_ATTEMPTS)
                .backoff_unit(config::fetch::backoff_unit()),
            attempt_timeout: config::fetch::attempt_timeout(),
            ..Self::default()
        }
    }
}

/// Result of a successful download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchedFile {
    pub bytes: u64,
    pub attempts: u32,
}

/// Decides when a download progress event is due.
struct DownloadThrottle {
    interval: Duration,
    bytes: u64,
    last_at: Instant,
    last_bytes: u64,
}

impl DownloadThrottle {
    fn new(interval: Duration, bytes: u64, now: Instant) -> Self {
        Self {
            interval,
            bytes,
            last_at: now,
            last_bytes: 0,
        }
    }

    fn should_emit(&mut self, total: u64, now: Instant) -> bool {
        if total <= self.last_bytes {
            return false;
        }
        let due = total - self.last_bytes >= self.bytes || now.duration_since(self.last_at) >= self.interval;
        if due {
            self.last_at = now;
            self.last_bytes = total;
        }
        due
    }
}

fn download_percent(received: u64, expected: u64) -> u8 {
    if expected == 0 {
        return 0;
    }
    (received.saturating_mul(100) / expected).min(100) as u8
}

fn rate(received: u64, started: Instant) -> Option<f64> {
    let secs = started.elapsed().as_secs_f64();
    (secs > 0.0).then(|| received as f64 / secs)
}

async fn remove_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => log::debug!("Removed partial download {}", dest.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove partial download {}: {}", dest.display(), e),
    }
}

/// Streams a [`MediaSource`] into a file, retrying failed attempts with linear backoff.
pub struct RetryingFetcher {
    source: Arc<dyn MediaSource>,
    config: FetchConfig,
}

impl RetryingFetcher {
    pub fn new(source: Arc<dyn MediaSource>, config: FetchConfig) -> Self {
        Self { source, config }
    }

    /// Downloads `source_ref` into `dest`.
    ///
    /// `size_hint` is the size the sender declared (0 if unknown); it drives the
    /// percentage and a mismatch with the received size is only logged. Every failed
    /// attempt removes the partial file before the next one starts. Download percents
    /// never go backwards across attempts: a retry stays silent until it passes the
    /// highest percent already shown.
    pub async fn fetch(
        &self,
        source_ref: &str,
        size_hint: u64,
        dest: &Path,
        progress: &ProgressSender,
    ) -> Result<FetchedFile, PipelineError> {
        let shown = AtomicU8::new(0);
        let outcome = retry(&self.config.retry, |attempt| {
            self.attempt(source_ref, size_hint, dest, progress, &shown, attempt)
        })
        .await;

        match outcome.result {
            Ok(bytes) => {
                log::info!(
                    "✅ Downloaded {} bytes in {:?} ({} attempt(s))",
                    bytes,
                    outcome.total_duration,
                    outcome.attempts
                );
                Ok(FetchedFile {
                    bytes,
                    attempts: outcome.attempts,
                })
            }
            Err(e) => {
                remove_partial(dest).await;
                Err(PipelineError::Fetch {
                    attempts: outcome.attempts,
                    reason: e.into_inner().to_string(),
                })
            }
        }
    }

    async fn attempt(
        &self,
        source_ref: &str,
        size_hint: u64,
        dest: &Path,
        progress: &ProgressSender,
        shown: &AtomicU8,
        attempt: u32,
    ) -> Result<u64, FetchAttemptError> {
        log::info!(
            "⬇️ Download attempt {}/{} for {}",
            attempt,
            self.config.retry.max_attempts,
            source_ref
        );

        let result = match tokio::time::timeout(
            self.config.attempt_timeout,
            self.stream_to_file(source_ref, size_hint, dest, progress, shown),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchAttemptError::Timeout(self.config.attempt_timeout)),
        };

        if result.is_err() {
            remove_partial(dest).await;
        }
        result
    }

    async fn stream_to_file(
        &self,
        source_ref: &str,
        size_hint: u64,
        dest: &Path,
        progress: &ProgressSender,
        shown: &AtomicU8,
    ) -> Result<u64, FetchAttemptError> {
        let mut stream = self.source.open(source_ref).await?;

        let file = tokio::fs::File::create(dest).await?;
        let mut writer = BufWriter::with_capacity(self.config.chunk_size, file);

        let started = Instant::now();
        let mut throttle = DownloadThrottle::new(self.config.progress_interval, self.config.progress_bytes, started);
        let mut received: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if throttle.should_emit(received, Instant::now()) {
                let percent = download_percent(received, size_hint);
                log::debug!("Download progress: {}% ({} bytes)", percent, received);
                if percent >= shown.fetch_max(percent, Ordering::Relaxed) {
                    let _ = progress.send(ProgressEvent::download(percent, rate(received, started)));
                }
            }
        }

        writer.flush().await?;
        writer.get_mut().sync_all().await?;

        if size_hint > 0 && received != size_hint {
            log::warn!(
                "Downloaded size {} differs from declared size {} for {}",
                received,
                size_hint,
                source_ref
            );
        }

        shown.store(100, Ordering::Relaxed);
        let _ = progress.send(ProgressEvent::download(100, rate(received, started)));
        Ok(received)
    }
}
