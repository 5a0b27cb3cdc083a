//! Object storage backends.
//!
//! The [`backend::ObjectBackend`] trait abstracts over where objects
//! live.  Implementations are an S3 backend over `aws-sdk-s3` and an
//! in-memory backend for tests and dry runs.

pub mod aws;
pub mod backend;
pub mod memory;
