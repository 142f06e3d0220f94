//! Bounded retry with exponential backoff and jitter.
//!
//! [`retry`] is deliberately ignorant of what it retries: the per-file upload
//! and the per-batch commit both go through it with the same policy type.
//! Every attempt and every backoff sleep race the shared cancellation token.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How often and how patiently a failing operation is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Each delay is drawn from `delay * (1 ± randomization_factor)`.
    pub randomization_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            randomization_factor: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            randomization_factor: 0.0,
        }
    }

    /// Delay schedule for one retried operation. It never runs out on its own;
    /// `max_attempts` bounds the loop.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_delay_ms))
            .with_multiplier(self.multiplier.max(1.0))
            .with_randomization_factor(self.randomization_factor.clamp(0.0, 1.0))
            .with_max_interval(Duration::from_millis(self.max_delay_ms))
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Why [`retry`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; `source` is the error of the last one.
    Exhausted { attempts: u32, source: E },
    /// The cancellation token fired before an attempt could succeed.
    Cancelled,
}

/// Run `op` until it succeeds, the attempt budget is spent, or `cancel` fires.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.backoff();
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = op() => outcome,
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                source: err,
            });
        }

        let delay = backoff
            .next_backoff()
            .unwrap_or_else(|| Duration::from_millis(policy.max_delay_ms));
        warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, backing off"
        );

        if cancel
            .run_until_cancelled(tokio::time::sleep(delay))
            .await
            .is_none()
        {
            return Err(RetryError::Cancelled);
        }
    }
}
