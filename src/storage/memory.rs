//! In-memory storage backend.
//!
//! Objects are held in a `tokio::sync::RwLock<BTreeMap<...>>` so listings
//! come back in key order.  Pages are cut by raw key count, the way some
//! S3-compatible stores do it: when the keys under one common prefix
//! straddle a page boundary, that prefix is reported on both pages.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;

use super::backend::{BackendFuture, FetchedObject, ListPage, ObjectBackend, ObjectMeta};
use crate::errors::StorageError;

/// Default number of keys scanned per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

/// In-memory storage backend.
pub struct MemoryBackend {
    /// key -> object.
    objects: tokio::sync::RwLock<BTreeMap<String, StoredObject>>,
    /// Keys scanned per listing page.
    page_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend with the default page size.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty backend that scans `page_size` keys per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: tokio::sync::RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the backend holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl ObjectBackend for MemoryBackend {
    fn get(&self, key: &str) -> BackendFuture<'_, FetchedObject> {
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            let stored = objects
                .get(&key)
                .ok_or_else(|| StorageError::no_such_key(&key))?;
            Ok(FetchedObject {
                size: stored.data.len() as u64,
                data: stored.data.clone(),
            })
        })
    }

    fn put(&self, key: &str, data: Bytes) -> BackendFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            objects.insert(
                key,
                StoredObject {
                    data,
                    last_modified: Utc::now(),
                },
            );
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BackendFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            // Idempotent, like S3: deleting a missing key is not an error.
            self.objects.write().await.remove(&key);
            Ok(())
        })
    }

    fn list_page(
        &self,
        prefix: &str,
        delimiter: &str,
        continuation: Option<&str>,
    ) -> BackendFuture<'_, ListPage> {
        let prefix = prefix.to_string();
        let delimiter = delimiter.to_string();
        let continuation = continuation.map(str::to_string);
        Box::pin(async move {
            let objects = self.objects.read().await;

            let start = match continuation {
                Some(ref token) => Bound::Excluded(token.clone()),
                None => Bound::Included(prefix.clone()),
            };

            let mut page = ListPage::default();
            let mut scanned = 0usize;

            let mut range = objects
                .range((start, Bound::Unbounded))
                .take_while(|(key, _)| key.starts_with(&prefix))
                .peekable();

            while let Some((key, stored)) = range.next() {
                scanned += 1;

                let rest = &key[prefix.len()..];
                let grouped = if delimiter.is_empty() {
                    None
                } else {
                    rest.find(&delimiter)
                        .map(|idx| format!("{prefix}{}", &rest[..idx + delimiter.len()]))
                };

                match grouped {
                    Some(common) => {
                        if page.common_prefixes.last() != Some(&common) {
                            page.common_prefixes.push(common);
                        }
                    }
                    None => page.objects.push(ObjectMeta {
                        key: key.clone(),
                        size: stored.data.len() as u64,
                        last_modified: Some(stored.last_modified),
                    }),
                }

                if scanned == self.page_size {
                    if range.peek().is_some() {
                        page.is_truncated = true;
                        page.next_continuation_token = Some(key.clone());
                    }
                    break;
                }
            }

            Ok(page)
        })
    }
}

// -- Tests -------------------------------------------------------------------
