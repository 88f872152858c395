// src/go.rs

use crate::constants::{
    CHAIN_CALL_ATTEMPT_TIMEOUT_MS, CHAIN_CALL_RETRIES, RANDOM_BACKOFF_MAX_MS,
    TOTAL_TIMEOUT_HEADROOM_DEFAULT_MS,
};
use log::warn;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_retry::strategy::{jitter, FixedInterval};
use tokio_retry::Retry;

/// Retry and timeout budget for one fallible network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoOptions {
    /// Extra attempts after the first one
    pub retries: usize,
    pub attempt_timeout: Duration,
    pub total_timeout: Duration,
    /// Upper bound of the random pause between attempts
    pub max_random_delay: Duration,
}

impl Default for GoOptions {
    fn default() -> Self {
        Self {
            retries: CHAIN_CALL_RETRIES,
            attempt_timeout: Duration::from_millis(CHAIN_CALL_ATTEMPT_TIMEOUT_MS),
            total_timeout: Duration::from_millis(CHAIN_CALL_ATTEMPT_TIMEOUT_MS * (CHAIN_CALL_RETRIES as u64 + 1)),
            max_random_delay: Duration::from_millis(RANDOM_BACKOFF_MAX_MS),
        }
    }
}

impl GoOptions {
    /// Options for a call made `start.elapsed()` into a cycle that must finish within `total`.
    ///
    /// The budget is what is left of `total` minus a fixed headroom; once exhausted,
    /// [`go`] fails immediately with [`GoError::Timeout`].
    pub fn for_cycle(start: Instant, total: Duration) -> Self {
        let remaining = total
            .saturating_sub(start.elapsed())
            .saturating_sub(Duration::from_millis(TOTAL_TIMEOUT_HEADROOM_DEFAULT_MS));
        let defaults = Self::default();
        Self {
            attempt_timeout: defaults.attempt_timeout.min(remaining),
            total_timeout: remaining,
            ..defaults
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GoError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("operation failed after {attempts} attempt(s): {last_error:#}")]
    Failed {
        attempts: usize,
        last_error: anyhow::Error,
    },
}

/// Success carries the data, failure carries why; callers decide what to skip.
pub type GoResult<T> = Result<T, GoError>;

/// Runs `operation` under `options`, retrying failed or timed out attempts.
///
/// Failures never escape as panics; every failed attempt is logged.
pub async fn go<T, F, Fut>(options: GoOptions, mut operation: F) -> GoResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    if options.total_timeout.is_zero() {
        return Err(GoError::Timeout(options.total_timeout));
    }

    let attempt_timeout = options.attempt_timeout;
    let strategy = FixedInterval::from_millis(options.max_random_delay.as_millis() as u64)
        .map(jitter)
        .take(options.retries);

    let mut attempts = 0usize;
    let outcome = tokio::time::timeout(
        options.total_timeout,
        Retry::spawn(strategy, || {
            attempts += 1;
            let attempt = attempts;
            let call = operation();
            async move {
                match tokio::time::timeout(attempt_timeout, call).await {
                    Ok(Ok(data)) => Ok(data),
                    Ok(Err(e)) => {
                        warn!("Attempt {} failed. Error: {:#}", attempt, e);
                        Err(e)
                    }
                    Err(_) => {
                        warn!("Attempt {} timed out after {:?}", attempt, attempt_timeout);
                        Err(anyhow::anyhow!("attempt timed out after {:?}", attempt_timeout))
                    }
                }
            }
        }),
    )
    .await;

    match outcome {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(last_error)) => Err(GoError::Failed {
            attempts,
            last_error,
        }),
        Err(_) => Err(GoError::Timeout(options.total_timeout)),
    }
}
