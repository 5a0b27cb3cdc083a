//! Outbound HTTP execution and transport middleware.
//!
//! Every request the S3 backend sends goes through a [`SharedExecutor`].
//! The base executor talks to the network via `reqwest`; a
//! [`MiddlewareChain`] of user decorators wraps it at client construction
//! so callers can inspect or rewrite requests (e.g. inject headers).
//!
//! Decorators must forward to the executor they wrap.  One that never
//! forwards replaces the network entirely, which is what tests do.

use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Outbound request with a fully buffered body.
pub type HttpRequest = http::Request<Bytes>;

/// Inbound response with a fully buffered body.
pub type HttpResponse = http::Response<Bytes>;

/// Future returned by [`RequestExecutor::execute`].
pub type ExecuteFuture =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'static>>;

/// Failures below the HTTP layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request or response timed out.
    #[error("transport timeout: {0}")]
    Timeout(String),

    /// The connection could not be established or was dropped.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request could not be sent as given (bad URI, unbuffered body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Performs one HTTP exchange.
pub trait RequestExecutor: Send + Sync + 'static {
    /// Send `request` and return the buffered response.
    fn execute(&self, request: HttpRequest) -> ExecuteFuture;
}

/// Shared handle to an executor.
pub type SharedExecutor = Arc<dyn RequestExecutor>;

/// Wraps one executor in another.
pub type Decorator = Arc<dyn Fn(SharedExecutor) -> SharedExecutor + Send + Sync>;

/// Build a [`Decorator`] from a closure.
pub fn decorator<F>(f: F) -> Decorator
where
    F: Fn(SharedExecutor) -> SharedExecutor + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Adapt an async closure into an executor.
pub fn executor_fn<F, Fut>(f: F) -> SharedExecutor
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, TransportError>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}

struct FnExecutor<F>(F);

impl<F, Fut> RequestExecutor for FnExecutor<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, TransportError>> + Send + 'static,
{
    fn execute(&self, request: HttpRequest) -> ExecuteFuture {
        Box::pin((self.0)(request))
    }
}

/// Ordered list of decorators.
///
/// The first registered decorator is the outermost: it sees the request
/// first on the way out and the response last on the way back.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    decorators: Vec<Decorator>,
}

impl MiddlewareChain {
    /// An empty chain (identity).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decorator; it will sit inside every decorator added before it.
    pub fn push(&mut self, decorator: Decorator) {
        self.decorators.push(decorator);
    }

    /// Number of registered decorators.
    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    /// Whether no decorators are registered.
    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }

    /// Compose every decorator around `base`.
    pub fn wrap(&self, base: SharedExecutor) -> SharedExecutor {
        self.decorators
            .iter()
            .rev()
            .fold(base, |next, decorate| decorate(next))
    }
}

impl FromIterator<Decorator> for MiddlewareChain {
    fn from_iter<I: IntoIterator<Item = Decorator>>(iter: I) -> Self {
        Self {
            decorators: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("decorators", &self.decorators.len())
            .finish()
    }
}

// -- Network executor ---------------------------------------------------------

/// Base executor backed by a `reqwest` client.
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    /// Build the executor. `insecure` disables TLS certificate checks.
    pub fn new(insecure: bool) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| TransportError::Other(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap the executor for sharing.
    pub fn shared(self) -> SharedExecutor {
        Arc::new(self)
    }
}

impl RequestExecutor for ReqwestExecutor {
    fn execute(&self, request: HttpRequest) -> ExecuteFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let (parts, body) = request.into_parts();

            let response = client
                .request(parts.method, parts.uri.to_string())
                .headers(parts.headers)
                .body(body)
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(map_reqwest_error)?;

            let mut out = http::Response::new(body);
            *out.status_mut() = status;
            *out.headers_mut() = headers;
            Ok(out)
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        TransportError::Connect(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

// -- Tests --------------------------------------------------------------------
