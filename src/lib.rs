//! bucketline library -- resilient client for S3-compatible object storage.
//!
//! This crate wraps a remote object store with hedged reads, bounded
//! retries, a small error taxonomy and de-duplicated listings.  The
//! [`client::ObjectClient`] facade is the entry point; storage backends,
//! transport middleware and the individual policies are exposed for
//! callers that want to compose them differently.

pub mod client;
pub mod config;
pub mod errors;
pub mod hedging;
pub mod listing;
pub mod metrics;
pub mod retry;
pub mod secret;
pub mod storage;
pub mod transport;

pub use client::ObjectClient;
pub use errors::{classify, is_object_not_found_err, ErrorClass, StorageError};
pub use listing::ListingResult;
pub use secret::Secret;
