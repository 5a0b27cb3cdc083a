//! Request hedging for reads.
//!
//! A hedged call issues a primary attempt and, every `at` while nothing
//! has succeeded, one more parallel attempt, up to `up_to` extra rounds.
//! The first success wins.  Attempts run as tasks in a per-call
//! [`JoinSet`]; when the call returns (or the caller drops it) the set is
//! dropped and every losing attempt is aborted.
//!
//! Hedge issuance is capped client-wide by a [`HedgeLimiter`].  A denied
//! hedge is skipped for that round, never queued.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

use crate::config::HedgingConfig;
use crate::errors::{ErrorClass, StorageError};
use crate::metrics;

/// Grants or denies permission to issue one hedge.
pub trait HedgeLimiter: Send + Sync + 'static {
    /// Take one permit if available. Must not block.
    fn try_acquire(&self) -> bool;
}

/// Token-bucket limiter (GCRA) refilling `per_second` permits per second,
/// with a burst of the same size.
pub struct GovernorLimiter {
    inner: DefaultDirectRateLimiter,
}

impl GovernorLimiter {
    /// Allow `per_second` hedges per second.
    pub fn per_second(per_second: NonZeroU32) -> Self {
        Self {
            inner: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }
}

impl HedgeLimiter for GovernorLimiter {
    fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }
}

/// Limiter that always grants.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl HedgeLimiter for Unlimited {
    fn try_acquire(&self) -> bool {
        true
    }
}

/// Build the limiter described by `config` (`max_per_second == 0` is unlimited).
pub fn limiter_for(config: &HedgingConfig) -> Arc<dyn HedgeLimiter> {
    match NonZeroU32::new(config.max_per_second) {
        Some(rate) => Arc::new(GovernorLimiter::per_second(rate)),
        None => Arc::new(Unlimited),
    }
}

/// Races duplicate attempts of one read.
#[derive(Clone)]
pub struct HedgingDispatcher {
    config: HedgingConfig,
    limiter: Arc<dyn HedgeLimiter>,
}

impl HedgingDispatcher {
    /// Dispatcher with the limiter described by `config`.
    pub fn new(config: HedgingConfig) -> Self {
        let limiter = limiter_for(&config);
        Self::with_limiter(config, limiter)
    }

    /// Dispatcher sharing an existing limiter.
    pub fn with_limiter(config: HedgingConfig, limiter: Arc<dyn HedgeLimiter>) -> Self {
        Self { config, limiter }
    }

    /// The policy in use.
    pub fn config(&self) -> &HedgingConfig {
        &self.config
    }

    /// Run `attempt` hedged. With hedging disabled it runs exactly once,
    /// inline.
    ///
    /// A `NotFound` or `Permanent` failure from any attempt is a definitive
    /// answer and returns at once.  When every attempt has failed
    /// transiently and no rounds remain, the last error is returned.
    pub async fn dispatch<T, F, Fut>(&self, key: &str, attempt: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>> + Send + 'static,
        T: Send + 'static,
    {
        if !self.config.enabled() {
            return attempt().await;
        }

        let mut attempts = JoinSet::new();
        attempts.spawn(attempt());

        let mut rounds = 0u32;
        let mut last_err: Option<StorageError> = None;

        let timer = tokio::time::sleep(self.config.at);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                joined = attempts.join_next(), if !attempts.is_empty() => {
                    let outcome = match joined {
                        Some(Ok(outcome)) => outcome,
                        Some(Err(join_err)) => Err(StorageError::Aborted(join_err.to_string())),
                        None => break,
                    };

                    let err = match outcome {
                        Ok(value) => return Ok(value),
                        Err(err) => err,
                    };

                    if err.class() != ErrorClass::Transient {
                        return Err(err);
                    }

                    debug!(key, error = %err, pending = attempts.len(), "Hedged attempt failed");
                    last_err = Some(err);

                    if attempts.is_empty() {
                        if rounds >= self.config.up_to {
                            break;
                        }
                        rounds += 1;
                        self.try_hedge(&mut attempts, &attempt, key, rounds);
                        timer.as_mut().reset(Instant::now() + self.config.at);
                    }
                }
                () = &mut timer, if rounds < self.config.up_to => {
                    rounds += 1;
                    self.try_hedge(&mut attempts, &attempt, key, rounds);
                    timer.as_mut().reset(Instant::now() + self.config.at);
                }
                else => break,
            }
        }

        Err(last_err
            .unwrap_or_else(|| StorageError::Aborted("no hedged attempt completed".to_string())))
    }

    fn try_hedge<T, F, Fut>(
        &self,
        attempts: &mut JoinSet<Result<T, StorageError>>,
        attempt: &F,
        key: &str,
        round: u32,
    ) where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.limiter.try_acquire() {
            attempts.spawn(attempt());
            metrics::record_hedge(true);
            debug!(key, round, in_flight = attempts.len(), "Issued hedge");
        } else {
            metrics::record_hedge(false);
            debug!(key, round, "Hedge skipped by rate limiter");
        }
    }
}

// -- Tests --------------------------------------------------------------------
