//! Bounded retries with linear backoff.
//!
//! The wait before attempt `n` grows as `(n - 1) * unit`, optionally capped and
//! jittered. Errors decide for themselves whether another attempt makes sense.

use crate::core::metrics;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Why [`retry`] stopped without a value.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {max_attempts} attempts")]
    MaxAttemptsExhausted { max_attempts: u32, last_error: E },

    #[error("attempt {attempt} failed with a permanent error")]
    Permanent { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// The error from the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxAttemptsExhausted { last_error, .. } => last_error,
            RetryError::Permanent { error, .. } => error,
        }
    }
}

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Backoff unit; the wait after failed attempt `n` is `n * backoff_unit`
    pub backoff_unit: Duration,
    /// Upper bound for a single wait
    pub max_delay: Duration,
    /// Adds up to 25% random extra to each wait
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            add_jitter: false,
        }
    }
}

impl RetryConfig {
    /// Three attempts, 5 s unit, no jitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamped to at least one.
    #[must_use]
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    #[must_use]
    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.add_jitter = true;
        self
    }

    /// Delay to wait before attempt number `attempt` (1-based).
    ///
    /// The first attempt never waits; attempt `n` waits `(n - 1) * backoff_unit`.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1);
        let base = self.backoff_unit.saturating_mul(steps).min(self.max_delay);

        if self.add_jitter && !base.is_zero() {
            let jitter = rand::random::<f64>() * 0.25 * base.as_secs_f64();
            base + Duration::from_secs_f64(jitter)
        } else {
            base
        }
    }
}

/// Outcome of [`retry`] with bookkeeping about the run.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    pub result: Result<T, RetryError<E>>,
    pub attempts: u32,
    /// Wall time including backoff sleeps
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// True when every attempt failed with a retryable error.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.result, Err(RetryError::MaxAttemptsExhausted { .. }))
    }
}

/// Lets an error veto further attempts.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
                | ErrorKind::UnexpectedEof
                | ErrorKind::BrokenPipe
        )
    }
}

/// Runs `operation` until it succeeds, fails permanently or the attempt budget is spent.
///
/// `operation` is called with the 1-based attempt number. Every retry bumps
/// `TASK_RETRIES_TOTAL` labelled with the attempt that failed.
pub async fn retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let start = std::time::Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) if !e.is_retryable() => {
                log::warn!("attempt {}/{}: permanent failure: {}", attempt, max_attempts, e);
                return RetryResult {
                    result: Err(RetryError::Permanent { attempt, error: e }),
                    attempts: attempt,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) if attempt < max_attempts => {
                metrics::TASK_RETRIES_TOTAL
                    .with_label_values(&[&attempt.to_string()])
                    .inc();

                let delay = config.delay_before_attempt(attempt + 1);
                log::warn!(
                    "attempt {}/{} failed, next try in {:?}: {}",
                    attempt,
                    max_attempts,
                    delay,
                    e
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!("attempt {}/{} failed, no attempts left: {}", attempt, max_attempts, e);
                return RetryResult {
                    result: Err(RetryError::MaxAttemptsExhausted {
                        max_attempts,
                        last_error: e,
                    }),
                    attempts: attempt,
                    total_duration: start.elapsed(),
                };
            }
        }
    }
}
