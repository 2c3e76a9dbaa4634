//! Retry controller: wraps delivery of one source with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::{ClassificationTable, Reaction};
use crate::config::RetryConfig;
use crate::error::FetchError;

/// Doubling backoff state for retries against a single source.
///
/// The next delay is a pure function of how many retries have happened, so
/// the schedule is testable without real sleeps.
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
    cap: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            delay: config.initial_delay(),
            cap: config.max_retry_delay(),
            jitter: config.use_jitter,
        }
    }

    /// The delay to sleep before the next retry, or `None` once the delay
    /// has reached the cap and the source should be abandoned instead.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.delay >= self.cap {
            return None;
        }
        let current = self.delay;
        self.delay = self.delay.checked_mul(2).unwrap_or(self.cap).min(self.cap);
        Some(self.apply_jitter(current))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        // Up to 25% on top; the doubling progression itself stays untouched.
        let extra = delay.as_millis() as f64 * 0.25 * rand::random::<f64>();
        delay + Duration::from_millis(extra as u64)
    }
}

/// Outcome of delivering one source.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The engine reported success; stop trying further sources.
    Succeeded,
    /// This source is a lost cause; the caller moves to the next candidate.
    Abandoned,
    /// Crash-classified failure; aborts the whole episode task.
    Fatal(FetchError),
    /// Cancellation observed mid-attempt.
    Cancelled,
}

/// Drives repeated attempts of one fetch operation according to the
/// classification table and backoff configuration.
pub struct RetryController<'a> {
    config: &'a RetryConfig,
    table: &'a ClassificationTable,
    token: &'a CancellationToken,
}

impl<'a> RetryController<'a> {
    pub fn new(
        config: &'a RetryConfig,
        table: &'a ClassificationTable,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            config,
            table,
            token,
        }
    }

    /// Attempt `operation` until it succeeds, the source is abandoned, or a
    /// crash-classified failure surfaces.
    ///
    /// An engine exit code of zero is success. A non-zero exit code with no
    /// raised failure is logged as fatal-class but abandons only this
    /// source; the episode it belongs to is then not marked successful
    /// unless a later candidate delivers.
    pub async fn deliver<F, Fut>(&self, source: &str, mut operation: F) -> AttemptOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<i32, FetchError>>,
    {
        let mut backoff = Backoff::new(self.config);

        loop {
            if self.token.is_cancelled() {
                return AttemptOutcome::Cancelled;
            }

            let result = operation().await;

            if self.token.is_cancelled() {
                return AttemptOutcome::Cancelled;
            }

            let err = match result {
                Ok(0) => return AttemptOutcome::Succeeded,
                Ok(code) => {
                    error!(source, code, "fetch engine exited with non-zero status");
                    return AttemptOutcome::Abandoned;
                }
                Err(err) => err,
            };

            let message = err.to_string();
            match self.table.classify(&message) {
                Some(Reaction::Continue) => {
                    info!(source, error = %message, "source failed, trying next candidate");
                    return AttemptOutcome::Abandoned;
                }
                Some(Reaction::Crash) => {
                    return AttemptOutcome::Fatal(err);
                }
                Some(Reaction::Retry) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            source,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "retrying source after transient failure"
                        );
                        tokio::select! {
                            _ = self.token.cancelled() => return AttemptOutcome::Cancelled,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        debug!(source, "retry delay cap reached, abandoning source");
                        return AttemptOutcome::Abandoned;
                    }
                },
                None => {
                    warn!(
                        source,
                        error = %message,
                        "no classification rule for engine failure, abandoning source"
                    );
                    return AttemptOutcome::Abandoned;
                }
            }
        }
    }
}
