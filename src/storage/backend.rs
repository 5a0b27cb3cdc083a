//! Abstract object storage backend trait.
//!
//! Every storage backend must implement [`ObjectBackend`].  Each method
//! is a single attempt: retries, hedging and pagination are layered on
//! top by the client, so implementations must not retry on their own.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

use crate::errors::StorageError;

/// Future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// An object's bytes as returned by `get`.
#[derive(Debug, Clone)]
pub struct FetchedObject {
    /// Raw bytes of the object.
    pub data: Bytes,
    /// Size reported by the backend (content length).
    pub size: u64,
}

/// Listing entry for a single object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects on this page, in backend order.
    pub objects: Vec<ObjectMeta>,
    /// Common prefixes on this page. May repeat prefixes seen on earlier pages.
    pub common_prefixes: Vec<String>,
    /// Cursor for the next page.
    pub next_continuation_token: Option<String>,
    /// Whether more pages follow.
    pub is_truncated: bool,
}

/// Async object storage contract.
pub trait ObjectBackend: Send + Sync + 'static {
    /// Read the full object at `key`.
    fn get(&self, key: &str) -> BackendFuture<'_, FetchedObject>;

    /// Write `data` to `key`, replacing any existing object.
    fn put(&self, key: &str, data: Bytes) -> BackendFuture<'_, ()>;

    /// Delete the object at `key`.
    fn delete(&self, key: &str) -> BackendFuture<'_, ()>;

    /// Fetch one listing page under `prefix`, grouping on `delimiter`
    /// (empty = flat). `continuation` is the token from the previous page.
    fn list_page(
        &self,
        prefix: &str,
        delimiter: &str,
        continuation: Option<&str>,
    ) -> BackendFuture<'_, ListPage>;
}
