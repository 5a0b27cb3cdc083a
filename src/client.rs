//! Resilient object storage client.
//!
//! [`ObjectClient`] is the caller-facing facade.  Control flow per
//! operation:
//!
//!   GET:          hedging -> retrier -> backend
//!   PUT/DELETE:   retrier (write policy) -> backend
//!   LIST:         listing aggregator -> retrier (per page) -> backend
//!
//! The client is `Send + Sync` and meant to be shared behind an `Arc`.
//! Its only mutable shared state is the hedge rate limiter.

use bytes::Bytes;
use garde::Validate;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::errors::{self, StorageError};
use crate::hedging::{HedgeLimiter, HedgingDispatcher};
use crate::listing::{collect_pages, ListingResult};
use crate::metrics;
use crate::retry::{OperationKind, Retrier};
use crate::storage::aws::S3Backend;
use crate::storage::backend::{FetchedObject, ObjectBackend};
use crate::transport::SharedExecutor;

/// Facade adding hedging, retries and listing aggregation to a backend.
#[derive(Clone)]
pub struct ObjectClient {
    backend: Arc<dyn ObjectBackend>,
    retrier: Retrier,
    hedging: HedgingDispatcher,
    list_max_pages: usize,
}

impl ObjectClient {
    /// Validate `config` and build a client talking to S3 over the network.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        validate(config)?;
        let backend = S3Backend::new(config)?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Validate `config` and build an S3 client whose requests end at
    /// `base` rather than the network.
    pub fn with_base_executor(
        config: &StorageConfig,
        base: SharedExecutor,
    ) -> Result<Self, StorageError> {
        validate(config)?;
        let backend = S3Backend::with_base_executor(config, base)?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Build a client over an arbitrary backend, using the retry, hedging
    /// and listing settings from `config`.
    pub fn with_backend(config: &StorageConfig, backend: Arc<dyn ObjectBackend>) -> Self {
        info!(
            max_retries = config.backoff_config.max_retries,
            write_policy = ?config.backoff_config.write_policy,
            hedge_at = ?config.hedging.at,
            hedge_up_to = config.hedging.up_to,
            hedge_max_per_second = config.hedging.max_per_second,
            "Object client initialized"
        );

        Self {
            backend,
            retrier: Retrier::new(config.backoff_config.clone()),
            hedging: HedgingDispatcher::new(config.hedging.clone()),
            list_max_pages: config.list_max_pages,
        }
    }

    /// Replace the hedge rate limiter.
    pub fn with_limiter(mut self, limiter: Arc<dyn HedgeLimiter>) -> Self {
        self.hedging = HedgingDispatcher::with_limiter(self.hedging.config().clone(), limiter);
        self
    }

    /// Read the object at `key`, hedging slow attempts.
    pub async fn get_object(&self, key: &str) -> Result<FetchedObject, StorageError> {
        let started = Instant::now();

        let backend = self.backend.clone();
        let retrier = self.retrier.clone();
        let owned_key = key.to_string();
        let result = self
            .hedging
            .dispatch(key, move || {
                let backend = backend.clone();
                let retrier = retrier.clone();
                let key = owned_key.clone();
                async move {
                    retrier
                        .run("get", OperationKind::Read, || backend.get(&key))
                        .await
                }
            })
            .await;

        finish("get", key, started, result)
    }

    /// Write `data` to `key` in the primary bucket.
    pub async fn put_object(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let started = Instant::now();
        let result = self
            .retrier
            .run("put", OperationKind::Write, || self.backend.put(key, data.clone()))
            .await;
        finish("put", key, started, result)
    }

    /// Delete the object at `key` from the primary bucket.
    pub async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let started = Instant::now();
        let result = self
            .retrier
            .run("delete", OperationKind::Write, || self.backend.delete(key))
            .await;
        finish("delete", key, started, result)
    }

    /// List everything under `prefix`, grouping on `delimiter` (empty = flat).
    pub async fn list(&self, prefix: &str, delimiter: &str) -> Result<ListingResult, StorageError> {
        let started = Instant::now();
        let result = collect_pages(self.list_max_pages, |token: Option<String>| async move {
            self.retrier
                .run("list", OperationKind::Read, || {
                    self.backend.list_page(prefix, delimiter, token.as_deref())
                })
                .await
        })
        .await;
        finish("list", prefix, started, result)
    }

    /// Whether `err` means the object does not exist.
    pub fn is_object_not_found_err(&self, err: Option<&StorageError>) -> bool {
        errors::is_object_not_found_err(err)
    }
}

fn validate(config: &StorageConfig) -> Result<(), StorageError> {
    config
        .validate()
        .map_err(|e| StorageError::Config(e.to_string()))
}

fn finish<T>(
    operation: &'static str,
    key: &str,
    started: Instant,
    result: Result<T, StorageError>,
) -> Result<T, StorageError> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => err.class().as_str(),
    };
    metrics::record_operation(operation, started, outcome);
    debug!(
        operation,
        key,
        outcome,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Operation finished"
    );
    result
}

// -- Tests --------------------------------------------------------------------
