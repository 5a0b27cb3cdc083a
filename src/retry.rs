//! Bounded retry with exponential backoff and jitter.
//!
//! The [`Retrier`] wraps any single-shot operation.  Only
//! [`ErrorClass::Transient`] failures are retried; not-found and
//! permanent errors come back after one attempt.  Writes follow the
//! configured [`WritePolicy`] so a PUT or DELETE whose delivery is
//! unknown is not silently applied twice.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{RetryConfig, WritePolicy};
use crate::errors::{ErrorClass, StorageError};
use crate::metrics;

/// Whether an operation is safe to repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// GET / LIST: repeating has no side effect.
    Read,
    /// PUT / DELETE: repeating may apply the change twice.
    Write,
}

/// Retry loop driven by a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    /// Create a retrier for `config`.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// `min_period * 2^retry`, capped at `max_period`, then jittered into
    /// the upper half of that value.
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let capped = self
            .config
            .min_period
            .saturating_mul(factor)
            .min(self.config.max_period);

        let nanos = u64::try_from(capped.as_nanos()).unwrap_or(u64::MAX);
        if nanos < 2 {
            return capped;
        }
        let jittered = rand::thread_rng().gen_range(nanos / 2..=nanos);
        Duration::from_nanos(jittered)
    }

    /// Whether `err` may be retried for an operation of `kind`.
    pub fn is_retryable(&self, kind: OperationKind, err: &StorageError) -> bool {
        if err.class() != ErrorClass::Transient {
            return false;
        }
        match kind {
            OperationKind::Read => true,
            OperationKind::Write => match self.config.write_policy {
                WritePolicy::Never => false,
                WritePolicy::Unambiguous => !err.is_ambiguous(),
                WritePolicy::Always => true,
            },
        }
    }

    /// Run `operation` until it succeeds, fails for good, or the retry
    /// budget is spent. Returns the last error in the latter cases.
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &'static str,
        kind: OperationKind,
        mut operation: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut retries = 0u32;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_retryable(kind, &err) {
                debug!(
                    operation = operation_name,
                    class = %err.class(),
                    error = %err,
                    "Not retrying"
                );
                return Err(err);
            }

            if retries >= self.config.max_retries {
                warn!(
                    operation = operation_name,
                    attempts = retries + 1,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }

            let backoff = self.backoff_duration(retries);
            warn!(
                operation = operation_name,
                attempt = retries + 1,
                error = %err,
                backoff_ms = backoff.as_millis() as u64,
                "Retryable error, backing off"
            );
            metrics::record_retry(operation_name);
            sleep(backoff).await;
            retries += 1;
        }
    }
}

// -- Tests --------------------------------------------------------------------
