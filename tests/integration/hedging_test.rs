//! Hedging and attempt counts observed at the transport layer.

use bucketline::config::HedgingConfig;
use bucketline::transport::{decorator, SharedExecutor};
use bucketline::ObjectClient;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{failing_executor, storage_config};

fn hedged_client(hedging: HedgingConfig, calls: &Arc<AtomicUsize>, delay: Duration) -> ObjectClient {
    let config = storage_config(&["test-bucket"]).with_hedging(hedging);
    ObjectClient::with_base_executor(&config, failing_executor(calls.clone(), delay)).unwrap()
}

#[tokio::test]
async fn test_get_issues_primary_plus_up_to_hedges() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = hedged_client(
        HedgingConfig::new(Duration::from_nanos(20), 3, 0),
        &calls,
        Duration::from_millis(200),
    );

    let err = client.get_object("foo").await.unwrap_err();
    assert!(!client.is_object_not_found_err(Some(&err)));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_get_without_hedging_makes_one_call() {
    for hedging in [
        HedgingConfig::new(Duration::ZERO, 3, 0),
        HedgingConfig::new(Duration::from_nanos(20), 0, 0),
    ] {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = hedged_client(hedging, &calls, Duration::from_millis(50));
        client.get_object("foo").await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_put_delete_list_are_never_hedged() {
    let hedging = HedgingConfig::new(Duration::from_nanos(20), 3, 0);

    let calls = Arc::new(AtomicUsize::new(0));
    let client = hedged_client(hedging.clone(), &calls, Duration::from_millis(50));
    client.put_object("foo", Bytes::from("bar")).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let calls = Arc::new(AtomicUsize::new(0));
    let client = hedged_client(hedging.clone(), &calls, Duration::from_millis(50));
    client.delete_object("foo").await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let calls = Arc::new(AtomicUsize::new(0));
    let client = hedged_client(hedging, &calls, Duration::from_millis(50));
    client.list("foo", "/").await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_non_forwarding_middleware_replaces_network() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let config = storage_config(&["test-bucket"])
        .with_hedging(HedgingConfig::new(Duration::from_nanos(20), 3, 0))
        .with_middleware(decorator(move |_next: SharedExecutor| {
            failing_executor(counted.clone(), Duration::from_millis(200))
        }));

    // Network base executor; never reached.
    let client = ObjectClient::new(&config).unwrap();
    client.get_object("foo").await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_rate_limit_caps_hedges_across_calls() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = hedged_client(
        HedgingConfig::new(Duration::from_millis(1), 3, 1),
        &calls,
        Duration::from_millis(100),
    );

    let (a, b) = tokio::join!(client.get_object("a"), client.get_object("b"));
    assert!(a.is_err() && b.is_err());
    // Two primaries plus the one hedge the limiter grants this second.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_caller_timeout_stops_all_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = hedged_client(
        HedgingConfig::new(Duration::from_millis(10), 2, 0),
        &calls,
        Duration::from_secs(30),
    );

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(Duration::from_millis(100), client.get_object("foo")).await;
    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
