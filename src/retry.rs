//! Retry logic with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::Error;

/// Parameters for exponential backoff.
#[derive(Debug, Clone)]
pub struct BackoffParams {
    /// Delay before the first retry
    pub initial: Duration,
    /// Growth factor applied to each following delay
    pub factor: u32,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Total attempts, including the first (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Give up instead of sleeping past this much elapsed time (None = unlimited)
    pub deadline: Option<Duration>,
}

impl Default for BackoffParams {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            factor: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: None,
            deadline: None,
        }
    }
}

impl BackoffParams {
    /// Params for the startup token exchange: a few quick attempts.
    pub fn for_exchange() -> Self {
        Self {
            initial: Duration::from_millis(250),
            factor: 2,
            max_delay: Duration::from_secs(5),
            max_attempts: Some(5),
            deadline: Some(Duration::from_secs(30)),
        }
    }

    /// Delay after `failures` consecutive failures (1-based).
    fn delay_after(&self, failures: u32) -> Duration {
        let growth = self.factor.saturating_pow(failures.saturating_sub(1));
        self.initial.saturating_mul(growth).min(self.max_delay)
    }
}

/// Retry a function with exponential backoff.
///
/// Returns the first success, or the last error once the error is not
/// retriable or the attempt/time budget is spent.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    mut f: F,
    can_retry: R,
    params: &BackoffParams,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut failures = 0u32;

    loop {
        let error = match f().await {
            Ok(value) => {
                if failures > 0 {
                    debug!("Succeeded after {} failed attempt(s)", failures);
                }
                return Ok(value);
            }
            Err(e) => e,
        };
        failures += 1;

        let exhausted = params.max_attempts.is_some_and(|max| failures >= max);
        if exhausted || !can_retry(&error) {
            return Err(error);
        }

        let delay = params.delay_after(failures);
        if params
            .deadline
            .is_some_and(|deadline| started.elapsed() + delay > deadline)
        {
            return Err(error);
        }

        debug!("Attempt {} failed ({}), retrying in {:?}", failures, error, delay);
        sleep(delay).await;
    }
}

/// Retry with the default retriable error check.
pub async fn retry_transient<F, Fut, T>(f: F, params: &BackoffParams) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    retry_with_backoff(f, |e: &Error| e.is_retriable(), params).await
}
