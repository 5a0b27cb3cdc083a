//! S3 storage backend.
//!
//! Talks to AWS S3 or any S3-compatible store through `aws-sdk-s3`.  The
//! SDK's HTTP layer is replaced by [`ExecutorHttpClient`], which hands
//! every signed request to our [`SharedExecutor`] chain (user middleware
//! around a `reqwest` base executor).  SDK retries are disabled; the
//! client facade owns retry and hedging.
//!
//! Bucket mapping:
//!   GET:         each configured bucket in order until one has the key
//!   PUT/DELETE:  primary (first) bucket
//!   LIST:        every bucket in turn; the cursor is `{bucket_index}|{token}`

use aws_sdk_s3::config::retry::RetryConfig as SdkRetryConfig;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation,
    ResponseChecksumValidation,
};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_smithy_runtime_api::client::http::{
    HttpClient, HttpConnector, HttpConnectorFuture, HttpConnectorSettings, SharedHttpClient,
    SharedHttpConnector,
};
use aws_smithy_runtime_api::client::orchestrator::HttpRequest as SdkHttpRequest;
use aws_smithy_runtime_api::client::result::ConnectorError;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_runtime_api::http::{Response as SdkHttpResponse, StatusCode};
use aws_smithy_types::body::SdkBody;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info};

use super::backend::{BackendFuture, FetchedObject, ListPage, ObjectBackend, ObjectMeta};
use crate::config::StorageConfig;
use crate::errors::{ErrorClass, StorageError};
use crate::transport::{HttpRequest, ReqwestExecutor, SharedExecutor, TransportError};

/// Name attached to the static credentials handed to the SDK.
const CREDENTIALS_SOURCE: &str = "bucketline-config";

/// Backend that forwards operations to one or more S3 buckets.
pub struct S3Backend {
    /// AWS S3 SDK client.
    client: Client,
    /// Buckets in priority order; the first one receives writes.
    buckets: Vec<String>,
}

impl S3Backend {
    /// Build a backend for `config` on top of the network executor.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let base = ReqwestExecutor::new(config.insecure)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .shared();
        Self::with_base_executor(config, base)
    }

    /// Build a backend that sends requests through `base` instead of the
    /// network. The configured middleware still wraps it.
    pub fn with_base_executor(
        config: &StorageConfig,
        base: SharedExecutor,
    ) -> Result<Self, StorageError> {
        if config.bucket_names.is_empty() {
            return Err(StorageError::Config("no bucket names configured".into()));
        }

        let executor = config.middleware.wrap(base);
        let http_client = SharedHttpClient::new(ExecutorHttpClient::new(executor));

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .force_path_style(config.s3_force_path_style)
            .http_client(http_client)
            .retry_config(SdkRetryConfig::disabled())
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired);

        if !config.endpoint.is_empty() {
            builder = builder.endpoint_url(&config.endpoint);
        }

        if !config.access_key_id.is_empty() || !config.secret_access_key.is_empty() {
            let creds = Credentials::new(
                &config.access_key_id,
                config.secret_access_key.reveal(),
                config.session_token.revealed_opt().map(str::to_string),
                None,
                CREDENTIALS_SOURCE,
            );
            builder = builder.credentials_provider(creds);
        }

        let client = Client::from_conf(builder.build());

        info!(
            buckets = ?config.bucket_names,
            endpoint = %config.endpoint,
            region = %config.region,
            middleware = config.middleware.len(),
            "S3 backend initialized"
        );

        Ok(Self {
            client,
            buckets: config.bucket_names.clone(),
        })
    }

    fn primary(&self) -> &str {
        &self.buckets[0]
    }

    async fn get_from(&self, bucket: &str, key: &str) -> Result<FetchedObject, StorageError> {
        debug!(bucket, key, "S3 get_object");

        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let reported = resp.content_length();
        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Network(format!("reading object body: {e}")))?
            .into_bytes();

        let size = reported
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(data.len() as u64);

        Ok(FetchedObject { data, size })
    }

    async fn list_bucket(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        token: Option<String>,
    ) -> Result<ListPage, StorageError> {
        debug!(bucket, prefix, delimiter, token = ?token, "S3 list_objects_v2");

        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter((!delimiter.is_empty()).then(|| delimiter.to_string()))
            .set_continuation_token(token)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let objects = resp
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                Some(ObjectMeta {
                    key: key.to_string(),
                    size: obj.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                    last_modified: obj.last_modified().and_then(|t| {
                        DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())
                    }),
                })
            })
            .collect();

        let common_prefixes = resp
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix().map(str::to_string))
            .collect();

        Ok(ListPage {
            objects,
            common_prefixes,
            next_continuation_token: resp.next_continuation_token().map(str::to_string),
            is_truncated: resp.is_truncated().unwrap_or(false),
        })
    }
}

impl ObjectBackend for S3Backend {
    fn get(&self, key: &str) -> BackendFuture<'_, FetchedObject> {
        let key = key.to_string();
        Box::pin(async move {
            let mut last_err = None;
            for bucket in &self.buckets {
                match self.get_from(bucket, &key).await {
                    Ok(obj) => return Ok(obj),
                    Err(err) if err.class() == ErrorClass::NotFound => {
                        debug!(bucket = %bucket, key = %key, "Object not in bucket, trying next");
                        last_err = Some(err);
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(last_err.unwrap_or_else(|| StorageError::no_such_key(&key)))
        })
    }

    fn put(&self, key: &str, data: Bytes) -> BackendFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            debug!(bucket = self.primary(), key = %key, size = data.len(), "S3 put_object");

            self.client
                .put_object()
                .bucket(self.primary())
                .key(&key)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(map_sdk_error)?;

            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BackendFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            debug!(bucket = self.primary(), key = %key, "S3 delete_object");

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(self.primary())
                .key(&key)
                .send()
                .await
                .map_err(map_sdk_error)?;

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
            let cursor = match continuation {
                Some(ref raw) => ListCursor::decode(raw)?,
                None => ListCursor::default(),
            };
            if cursor.bucket >= self.buckets.len() {
                return Err(StorageError::InvalidResponse(format!(
                    "listing cursor names bucket {} of {}",
                    cursor.bucket,
                    self.buckets.len()
                )));
            }

            let bucket = &self.buckets[cursor.bucket];
            let mut page = self
                .list_bucket(bucket, &prefix, &delimiter, cursor.token)
                .await?;

            page.next_continuation_token = match (page.is_truncated, page.next_continuation_token.take()) {
                (true, Some(token)) => Some(ListCursor::within(cursor.bucket, token).encode()),
                // Leave the inconsistency for the aggregator to report.
                (true, None) => None,
                (false, _) if cursor.bucket + 1 < self.buckets.len() => {
                    page.is_truncated = true;
                    Some(ListCursor::start_of(cursor.bucket + 1).encode())
                }
                (false, _) => None,
            };

            Ok(page)
        })
    }
}

// -- Listing cursor -----------------------------------------------------------

/// Position of a multi-bucket listing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ListCursor {
    /// Index into the configured buckets.
    bucket: usize,
    /// S3 continuation token within that bucket; `None` means its first page.
    token: Option<String>,
}

impl ListCursor {
    fn start_of(bucket: usize) -> Self {
        Self { bucket, token: None }
    }

    fn within(bucket: usize, token: String) -> Self {
        Self {
            bucket,
            token: Some(token),
        }
    }

    fn encode(&self) -> String {
        format!("{}|{}", self.bucket, self.token.as_deref().unwrap_or(""))
    }

    fn decode(raw: &str) -> Result<Self, StorageError> {
        let (index, token) = raw
            .split_once('|')
            .ok_or_else(|| StorageError::InvalidResponse(format!("malformed listing cursor: {raw}")))?;
        let bucket = index
            .parse()
            .map_err(|_| StorageError::InvalidResponse(format!("malformed listing cursor: {raw}")))?;
        Ok(Self {
            bucket,
            token: (!token.is_empty()).then(|| token.to_string()),
        })
    }
}

// -- SDK error mapping --------------------------------------------------------

/// Map an SDK failure onto [`StorageError`], keeping code and status so the
/// error can be classified.
fn map_sdk_error<E>(err: SdkError<E, SdkHttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let context = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            let service_err = ctx.err();
            StorageError::service(
                service_err.code().unwrap_or_default(),
                service_err.message().unwrap_or(context.as_str()),
                Some(status),
            )
        }
        SdkError::TimeoutError(_) => StorageError::Timeout(context),
        SdkError::DispatchFailure(failure) => {
            if failure.is_timeout() {
                StorageError::Timeout(context)
            } else if failure.is_user() {
                StorageError::Construction(context)
            } else {
                StorageError::Network(context)
            }
        }
        SdkError::ResponseError(ctx) => StorageError::InvalidResponse(format!(
            "status {}: {context}",
            ctx.raw().status().as_u16()
        )),
        SdkError::ConstructionFailure(_) => StorageError::Construction(context),
        _ => StorageError::InvalidResponse(context),
    }
}

// -- HTTP bridge --------------------------------------------------------------

/// Smithy HTTP client that sends every SDK request through a
/// [`SharedExecutor`].
#[derive(Clone)]
pub struct ExecutorHttpClient {
    executor: SharedExecutor,
}

impl ExecutorHttpClient {
    /// Wrap `executor` for use by the SDK.
    pub fn new(executor: SharedExecutor) -> Self {
        Self { executor }
    }
}

impl fmt::Debug for ExecutorHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHttpClient").finish_non_exhaustive()
    }
}

impl HttpClient for ExecutorHttpClient {
    fn http_connector(
        &self,
        _settings: &HttpConnectorSettings,
        _components: &RuntimeComponents,
    ) -> SharedHttpConnector {
        SharedHttpConnector::new(self.clone())
    }
}

impl HttpConnector for ExecutorHttpClient {
    fn call(&self, request: SdkHttpRequest) -> HttpConnectorFuture {
        let executor = self.executor.clone();
        HttpConnectorFuture::new(async move {
            let request = to_http_request(&request)?;
            let response = executor
                .execute(request)
                .await
                .map_err(to_connector_error)?;
            to_sdk_response(response)
        })
    }
}

/// Copy an SDK request into an `http` request with a buffered body.
fn to_http_request(request: &SdkHttpRequest) -> Result<HttpRequest, ConnectorError> {
    let body = request.body().bytes().ok_or_else(|| {
        ConnectorError::user(Box::new(TransportError::InvalidRequest(
            "streaming request bodies are not supported".into(),
        )))
    })?;

    let mut builder = http::Request::builder()
        .method(request.method())
        .uri(request.uri());
    for (name, value) in request.headers().iter() {
        builder = builder.header(name, value);
    }

    builder
        .body(Bytes::copy_from_slice(body))
        .map_err(|e| ConnectorError::user(Box::new(TransportError::InvalidRequest(e.to_string()))))
}

/// Convert an executor response back into the SDK's response type.
fn to_sdk_response(response: http::Response<Bytes>) -> Result<SdkHttpResponse, ConnectorError> {
    let (parts, body) = response.into_parts();
    let status = StatusCode::try_from(parts.status.as_u16())
        .map_err(|e| ConnectorError::other(Box::new(e), None))?;

    let mut out = SdkHttpResponse::new(status, SdkBody::from(body));
    for (name, value) in parts.headers.iter() {
        // Headers that are not valid UTF-8 cannot be represented by the SDK.
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.headers_mut()
            .try_append(name.as_str().to_owned(), value.to_owned())
            .map_err(|e| ConnectorError::other(Box::new(e), None))?;
    }
    Ok(out)
}

fn to_connector_error(err: TransportError) -> ConnectorError {
    match err {
        TransportError::Timeout(_) => ConnectorError::timeout(Box::new(err)),
        TransportError::Connect(_) => ConnectorError::io(Box::new(err)),
        TransportError::InvalidRequest(_) => ConnectorError::user(Box::new(err)),
        TransportError::Other(_) => ConnectorError::other(Box::new(err), None),
    }
}

// -- Tests --------------------------------------------------------------------
