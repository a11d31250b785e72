//! Shutdown Tests - Draining, Cancellation and Connection Housekeeping
//!
//! These tests exercise how work ends:
//! - Orderly shutdown lets in-flight requests finish
//! - Destroying an ORB fails its pending invocations with Cancelled
//! - Request timeouts, stop_listening and idle connection cleanup

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use orb::{ErrorCategory, ObjectReference, Orb};

async fn blob_server(builder: orb::OrbBuilder) -> (Orb, Arc<Blob>, String) {
    let (server, _addr) = listening_orb(builder).await;
    let blob = Blob::new();
    let id = server.root_adapter().activate(blob.clone()).unwrap();
    let locator = server.root_adapter().reference(&id).unwrap().to_corbaloc();
    (server, blob, locator)
}

async fn blob_client(builder: orb::OrbBuilder, locator: &str) -> (Orb, ObjectReference) {
    let client = builder.build();
    let target = client.resolve(locator).await.unwrap();
    (client, target)
}

/// Test: shutdown(true) waits for the servant and delivers its reply
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drain_completes_in_flight_request() {
    init_logging();

    let (server, blob, locator) = blob_server(Orb::builder()).await;
    let (client, target) = blob_client(Orb::builder(), &locator).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { blob_sleep(&client, &target, 300).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    server.shutdown(true).await;
    println!("drained in {:?}", start.elapsed());

    call.await.unwrap().unwrap();
    assert_eq!(blob.completed.load(Ordering::SeqCst), 1);
    assert!(!server.is_running());
    assert!(!server.root_adapter().is_running());
    assert!(server.connections().is_empty());

    // idempotent
    server.shutdown(true).await;
    client.destroy().await;
}

/// Test: destroying the calling ORB cancels its pending invocation
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_cancels_pending_invocation() {
    init_logging();

    let (server, _blob, locator) = blob_server(Orb::builder()).await;
    let (client, target) = blob_client(Orb::builder(), &locator).await;

    let call = {
        let client = client.clone();
        let target = target.clone();
        tokio::spawn(async move { blob_sleep(&client, &target, 5_000).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    client.destroy().await;
    let err = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("pending invocation released")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Cancelled, "got {:?}", err);

    let err = blob_echo(&client, &target, b"late").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Cancelled);

    server.destroy().await;
}

/// Test: the server going away mid-request is a transient failure for the caller
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_abort_is_transient() {
    init_logging();

    let (server, _blob, locator) = blob_server(Orb::builder()).await;
    let (client, target) = blob_client(Orb::builder(), &locator).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { blob_sleep(&client, &target, 5_000).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.destroy().await;
    let err = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("pending invocation released")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transient, "got {:?}", err);
    assert!(err.is_retryable());

    client.destroy().await;
}

/// Test: a request timeout cancels only that invocation
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_timeout() {
    init_logging();

    let (server, blob, locator) = blob_server(Orb::builder()).await;
    let (client, target) = blob_client(
        Orb::builder().request_timeout(Duration::from_millis(200)),
        &locator,
    )
    .await;

    let err = blob_sleep(&client, &target, 1_000).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Cancelled, "got {:?}", err);

    let echoed = blob_echo(&client, &target, b"after timeout").await.unwrap();
    assert_eq!(echoed.as_ref(), b"after timeout");
    assert_eq!(client.connections().len(), 1);

    // the servant is not interrupted
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(blob.completed.load(Ordering::SeqCst), 2);

    client.destroy().await;
    server.destroy().await;
}

/// Test: stop_listening keeps established connections
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_listening() {
    init_logging();

    let (server, _blob, locator) = blob_server(Orb::builder()).await;
    let (client, target) = blob_client(Orb::builder(), &locator).await;
    let advertised = server.endpoint();

    server.stop_listening();
    assert!(!server.is_listening());
    assert_eq!(server.endpoint(), advertised);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(blob_echo(&client, &target, b"still here").await.unwrap().as_ref(), b"still here");

    let newcomer = Orb::with_defaults();
    let err = newcomer.resolve(&locator).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transient, "got {:?}", err);

    newcomer.destroy().await;
    client.destroy().await;
    server.destroy().await;
}

/// Test: idle initiated connections are closed and re-dialled on demand
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_idle_connections() {
    init_logging();

    let (server, _blob, locator) = blob_server(Orb::builder()).await;
    let (client, target) = blob_client(Orb::builder(), &locator).await;
    blob_echo(&client, &target, b"warm").await.unwrap();

    assert_eq!(server.close_idle_connections().await, 0, "accepted connections are not ours to close");
    assert_eq!(client.close_idle_connections().await, 1);
    assert!(client.connections().is_empty());

    blob_echo(&client, &target, b"again").await.unwrap();
    assert_eq!(client.stats().snapshot().connections_opened, 2);

    client.destroy().await;
    server.destroy().await;
}

/// Test: a connection carrying callbacks is never idle
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bidirectional_connection_is_pinned() {
    init_logging();

    let (server, addr, _service) = test_server(Orb::builder()).await;
    let (client, _small, callback) = bidirectional_client();
    let test = resolve_test_service(&client, addr).await;
    test.set_callback(&callback).await.unwrap();

    assert_eq!(client.close_idle_connections().await, 0);
    assert_eq!(client.connections().len(), 1);

    client.destroy().await;
    server.destroy().await;
}
