//! Bounded retries with exponential backoff and server-dictated rate-limit waits.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use ferry_common::error::FerryError;
use ferry_config::SyncConfig;

/// How an error wants to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Upstream asked us to come back after this long. Does not use up the retry budget.
    RateLimited(Duration),
    /// Timeout, connection failure, transient server or store error.
    Transient,
    /// Retrying cannot help.
    Permanent,
}

pub trait Retryable {
    fn disposition(&self) -> RetryDisposition;
}

impl Retryable for FerryError {
    fn disposition(&self) -> RetryDisposition {
        if self.is_retryable() {
            RetryDisposition::Transient
        } else {
            RetryDisposition::Permanent
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_rate_limit_waits: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_backoff,
            max_delay: config.max_backoff,
            max_rate_limit_waits: config.max_rate_limit_waits,
        }
    }

    /// Delay before the next attempt after `failures` consecutive transient
    /// failures: `min(initial_delay * 2^failures, max_delay)`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the retry budget
/// runs out. On exhaustion the last error is returned unchanged.
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut failures: u32 = 0;
    let mut rate_limit_waits: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        match err.disposition() {
            RetryDisposition::Permanent => {
                tracing::warn!(operation = label, error = %err, "permanent failure, not retrying");
                return Err(err);
            }
            RetryDisposition::RateLimited(wait) => {
                if rate_limit_waits >= policy.max_rate_limit_waits {
                    tracing::warn!(
                        operation = label,
                        rate_limit_waits,
                        "rate-limit wait ceiling reached, giving up"
                    );
                    return Err(err);
                }
                rate_limit_waits += 1;
                tracing::warn!(
                    operation = label,
                    wait_ms = wait.as_millis() as u64,
                    rate_limit_waits,
                    "rate-limited, waiting resume-after"
                );
                tokio::time::sleep(wait).await;
            }
            RetryDisposition::Transient => {
                if failures >= policy.max_retries {
                    tracing::warn!(
                        operation = label,
                        attempts = failures + 1,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                }
                failures += 1;
                let delay = policy.backoff(failures);
                tracing::warn!(
                    operation = label,
                    attempt = failures,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
