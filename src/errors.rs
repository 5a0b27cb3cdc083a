//! Storage error types and the error taxonomy.
//!
//! Every backend failure is normalised into a [`StorageError`].  The
//! [`ErrorClass`] derived from it drives retry and hedging decisions:
//! `NotFound` is an expected answer, `Transient` is worth retrying and
//! `Permanent` will not change on retry.

use std::fmt;
use thiserror::Error;

/// Backend codes meaning "the named key does not exist".
const NOT_FOUND_CODES: &[&str] = &["NoSuchKey", "NotFound"];

/// Backend codes for throttling and server-side trouble.
const TRANSIENT_CODES: &[&str] = &[
    "InternalError",
    "ServiceUnavailable",
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottled",
    "RequestThrottledException",
    "TooManyRequests",
    "RequestLimitExceeded",
    "RequestTimeout",
    "RequestTimeoutException",
    "BandwidthLimitExceeded",
];

/// Errors returned by storage backends and the client facade.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend answered with an error response.
    #[error("{code}: {message}")]
    Service {
        /// Backend error code, e.g. `NoSuchKey`. May be empty.
        code: String,
        /// Human readable message from the backend.
        message: String,
        /// HTTP status of the response, when known.
        status: Option<u16>,
    },

    /// The request or response did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure (reset, refused, DNS, TLS, ...).
    #[error("network error: {0}")]
    Network(String),

    /// A response arrived but could not be read or parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built; nothing was sent.
    #[error("request construction failed: {0}")]
    Construction(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A listing kept paginating past the configured page cap.
    #[error("listing did not finish within {0} pages")]
    TooManyPages(usize),

    /// An attempt task panicked or was aborted unexpectedly.
    #[error("attempt aborted: {0}")]
    Aborted(String),
}

impl StorageError {
    /// Build a service error from a code, message and optional HTTP status.
    pub fn service(code: impl Into<String>, message: impl Into<String>, status: Option<u16>) -> Self {
        StorageError::Service {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// The canonical "key does not exist" error.
    pub fn no_such_key(key: &str) -> Self {
        Self::service(
            "NoSuchKey",
            format!("The specified key does not exist: {key}"),
            Some(404),
        )
    }

    /// Backend error code, if this is a service error.
    pub fn code(&self) -> Option<&str> {
        match self {
            StorageError::Service { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            StorageError::Service { code, status, .. } => classify_service(code, *status),
            StorageError::Timeout(_)
            | StorageError::Network(_)
            | StorageError::InvalidResponse(_) => ErrorClass::Transient,
            StorageError::Construction(_)
            | StorageError::Config(_)
            | StorageError::TooManyPages(_)
            | StorageError::Aborted(_) => ErrorClass::Permanent,
        }
    }

    /// True when the request may have reached the backend even though no
    /// answer came back, so its side effect may or may not have happened.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            StorageError::Timeout(_) | StorageError::Network(_) | StorageError::InvalidResponse(_)
        )
    }
}

fn classify_service(code: &str, status: Option<u16>) -> ErrorClass {
    if NOT_FOUND_CODES.contains(&code) {
        return ErrorClass::NotFound;
    }
    if TRANSIENT_CODES.contains(&code) {
        return ErrorClass::Transient;
    }
    match status {
        Some(429) | Some(500..=599) => ErrorClass::Transient,
        // HEAD responses carry no body, hence no code.
        Some(404) if code.is_empty() => ErrorClass::NotFound,
        _ => ErrorClass::Permanent,
    }
}

/// Coarse error taxonomy used for retry and hedging decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The key does not exist. Expected, never retried.
    NotFound,
    /// Network trouble, timeouts, throttling, server errors. Retried.
    Transient,
    /// Anything else. Surfaced immediately.
    Permanent,
}

impl ErrorClass {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a backend error. Never call this on success.
pub fn classify(err: &StorageError) -> ErrorClass {
    err.class()
}

/// Whether `err` means the requested object does not exist.
/// `None` (no error) is never a not-found error.
pub fn is_object_not_found_err(err: Option<&StorageError>) -> bool {
    err.is_some_and(|e| classify(e) == ErrorClass::NotFound)
}

// -- Tests --------------------------------------------------------------------
