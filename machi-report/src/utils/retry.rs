//! Upstream retry logic
//!
//! Exponential backoff for transient upstream failures. Each attempt runs
//! under a fixed deadline; a deadline miss counts as a retryable timeout.
//!
//! **Backoff Strategy:**
//! - Initial delay: 200ms (configurable)
//! - Max delay: 5000ms (configurable)
//! - Multiplier: 2.0 (exponential)
//!
//! Only errors reporting `is_retryable()` are retried. 4xx responses and
//! selector misses propagate on the first attempt.

use crate::error::{FetchError, UpstreamError};
use machi_common::config::PipelineConfig;
use std::future::Future;
use std::time::{Duration, Instant};

/// Attempt ceiling, backoff bounds and per-attempt deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            deadline: config.upstream_deadline(),
        }
    }

    /// Backoff before attempt `attempt + 1`, for `attempt >= 1`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// ceiling is reached
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "estat population 13104")
/// * `policy` - Attempt ceiling, backoff and deadline
/// * `operation` - Async closure performing one upstream call
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    retry_after_turn(operation_name, policy, || std::future::ready(()), operation).await
}

/// Like [`retry_with_backoff`], awaiting `wait_turn` before every attempt
///
/// The wait (typically a rate-limiter permit) runs outside the per-attempt
/// deadline, so queueing behind the quota never reads as an upstream timeout.
pub async fn retry_after_turn<W, WFut, F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut wait_turn: W,
    mut operation: F,
) -> Result<T, FetchError>
where
    W: FnMut() -> WFut,
    WFut: Future<Output = ()>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying upstream call");
        }

        wait_turn().await;

        let outcome = match tokio::time::timeout(policy.deadline, operation()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Upstream(UpstreamError::retryable(format!(
                "timed out after {} ms",
                policy.deadline.as_millis()
            )))),
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Upstream call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if attempt >= policy.max_attempts {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                error = %err,
                "Upstream call failed: retries exhausted"
            );
            return Err(err);
        }

        let backoff = policy.backoff_for(attempt);
        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Upstream call failed, will retry after backoff"
        );
        tokio::time::sleep(backoff).await;
    }
}
