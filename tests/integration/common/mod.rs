//! Common utilities for integration tests.
//!
//! [`FakeS3`] is an in-process S3 endpoint speaking just enough of the
//! REST/XML protocol (GetObject, PutObject, DeleteObject, ListObjectsV2)
//! for the SDK to parse its answers.  Each bucket is a `MemoryBackend`,
//! so listings paginate by raw key count and can repeat a common prefix
//! across pages the way some S3-compatible stores do.

use bucketline::config::{RetryConfig, StorageConfig};
use bucketline::storage::backend::ObjectBackend;
use bucketline::storage::memory::MemoryBackend;
use bucketline::transport::{
    executor_fn, HttpRequest, HttpResponse, SharedExecutor, TransportError,
};
use bytes::Bytes;
use chrono::SecondsFormat;
use percent_encoding::percent_decode_str;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Endpoint the test clients are pointed at. Never resolved.
pub const ENDPOINT: &str = "http://fake-s3.local";

/// One request as seen by the fake endpoint.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: http::HeaderMap,
}

/// In-process fake S3 endpoint.
pub struct FakeS3 {
    buckets: HashMap<String, MemoryBackend>,
    requests: Mutex<Vec<RecordedRequest>>,
    injected: Mutex<VecDeque<(u16, &'static str)>>,
}

impl FakeS3 {
    /// A fake with the given buckets, listing `page_size` keys per page.
    pub fn new(buckets: &[&str], page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            buckets: buckets
                .iter()
                .map(|name| (name.to_string(), MemoryBackend::with_page_size(page_size)))
                .collect(),
            requests: Mutex::new(Vec::new()),
            injected: Mutex::new(VecDeque::new()),
        })
    }

    /// Direct access to a bucket's contents.
    pub fn bucket(&self, name: &str) -> &MemoryBackend {
        self.buckets.get(name).expect("unknown bucket")
    }

    /// Answer the next request with an S3 error instead of serving it.
    pub fn inject_error(&self, status: u16, code: &'static str) {
        self.injected.lock().unwrap().push_back((status, code));
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Methods of every request received so far.
    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.method).collect()
    }

    /// Base executor serving requests from this fake.
    pub fn executor(self: &Arc<Self>) -> SharedExecutor {
        let fake = self.clone();
        executor_fn(move |req: HttpRequest| {
            let fake = fake.clone();
            async move { Ok(fake.handle(req).await) }
        })
    }

    async fn handle(&self, req: HttpRequest) -> HttpResponse {
        let path = req.uri().path().to_string();
        let query = parse_query(req.uri().query().unwrap_or(""));
        let method = req.method().as_str().to_string();

        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            query: query.clone(),
            headers: req.headers().clone(),
        });

        if let Some((status, code)) = self.injected.lock().unwrap().pop_front() {
            return error_response(status, code, "injected failure");
        }

        let trimmed = path.trim_start_matches('/');
        let (bucket_name, raw_key) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        let key = decode(raw_key);

        let Some(bucket) = self.buckets.get(bucket_name) else {
            return error_response(404, "NoSuchBucket", "The specified bucket does not exist");
        };

        match (method.as_str(), key.is_empty()) {
            ("GET", false) => match bucket.get(&key).await {
                Ok(obj) => http::Response::builder()
                    .status(200)
                    .header("content-type", "application/octet-stream")
                    .header("content-length", obj.data.len().to_string())
                    .header("etag", "\"fake-etag\"")
                    .header("x-amz-request-id", "fake-request")
                    .body(obj.data)
                    .unwrap(),
                Err(_) => error_response(404, "NoSuchKey", "The specified key does not exist."),
            },
            ("GET", true) => {
                let prefix = query.get("prefix").cloned().unwrap_or_default();
                let delimiter = query.get("delimiter").cloned().unwrap_or_default();
                let token = query.get("continuation-token").cloned();
                let page = bucket
                    .list_page(&prefix, &delimiter, token.as_deref())
                    .await
                    .unwrap();
                xml_response(200, list_result_xml(bucket_name, &prefix, &delimiter, token, page))
            }
            ("PUT", false) => {
                bucket.put(&key, req.into_body()).await.unwrap();
                http::Response::builder()
                    .status(200)
                    .header("etag", "\"fake-etag\"")
                    .header("x-amz-request-id", "fake-request")
                    .body(Bytes::new())
                    .unwrap()
            }
            ("DELETE", false) => {
                bucket.delete(&key).await.unwrap();
                http::Response::builder()
                    .status(204)
                    .header("x-amz-request-id", "fake-request")
                    .body(Bytes::new())
                    .unwrap()
            }
            _ => error_response(405, "MethodNotAllowed", "Unsupported request"),
        }
    }
}

/// Base executor that counts calls, waits `delay`, then fails at the
/// connection level.
pub fn failing_executor(calls: Arc<AtomicUsize>, delay: Duration) -> SharedExecutor {
    executor_fn(move |_req: HttpRequest| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Err(TransportError::Other("foo".into()))
        }
    })
}

/// Storage config pointed at the fake endpoint with static credentials and
/// no retries.
pub fn storage_config(buckets: &[&str]) -> StorageConfig {
    let mut config = StorageConfig::new(buckets.iter().copied())
        .with_endpoint(ENDPOINT)
        .with_credentials("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY")
        .with_retry(
            RetryConfig::no_retries()
                .with_backoff(Duration::from_millis(1), Duration::from_millis(2)),
        );
    config.s3_force_path_style = true;
    config
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(name), decode(value))
        })
        .collect()
}

fn decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_response(status: u16, body: String) -> HttpResponse {
    http::Response::builder()
        .status(status)
        .header("content-type", "application/xml")
        .header("x-amz-request-id", "fake-request")
        .body(Bytes::from(body))
        .unwrap()
}

fn error_response(status: u16, code: &str, message: &str) -> HttpResponse {
    xml_response(
        status,
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Error><Code>{code}</Code><Message>{}</Message>\
             <RequestId>fake-request</RequestId></Error>",
            escape(message)
        ),
    )
}

fn list_result_xml(
    bucket: &str,
    prefix: &str,
    delimiter: &str,
    token: Option<String>,
    page: bucketline::storage::backend::ListPage,
) -> String {
    let mut body = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">",
    );
    body.push_str(&format!(
        "<Name>{}</Name><Prefix>{}</Prefix><KeyCount>{}</KeyCount>\
         <MaxKeys>1000</MaxKeys><IsTruncated>{}</IsTruncated>",
        escape(bucket),
        escape(prefix),
        page.objects.len() + page.common_prefixes.len(),
        page.is_truncated
    ));
    if !delimiter.is_empty() {
        body.push_str(&format!("<Delimiter>{}</Delimiter>", escape(delimiter)));
    }
    if let Some(token) = token {
        body.push_str(&format!("<ContinuationToken>{}</ContinuationToken>", escape(&token)));
    }
    for obj in &page.objects {
        let modified = obj
            .last_modified
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();
        body.push_str(&format!(
            "<Contents><Key>{}</Key><LastModified>{modified}</LastModified>\
             <ETag>&quot;fake-etag&quot;</ETag><Size>{}</Size>\
             <StorageClass>STANDARD</StorageClass></Contents>",
            escape(&obj.key),
            obj.size
        ));
    }
    for common in &page.common_prefixes {
        body.push_str(&format!(
            "<CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>",
            escape(common)
        ));
    }
    if let Some(next) = page.next_continuation_token {
        body.push_str(&format!(
            "<NextContinuationToken>{}</NextContinuationToken>",
            escape(&next)
        ));
    }
    body.push_str("</ListBucketResult>");
    body
}
