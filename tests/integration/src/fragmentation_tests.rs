//! Fragmentation Tests - Large Message Transfer
//!
//! These tests exercise GIOP fragmentation between two ORBs:
//! - Requests and replies larger than max_message_size
//! - Many fragmented calls multiplexed on one connection
//! - Values inside fragmented bodies
//! - The receive limit

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use futures::future::join_all;

use common::*;
use orb::{ErrorCategory, Orb};

async fn blob_pair(server: orb::OrbBuilder, client: orb::OrbBuilder) -> (Orb, Orb, orb::ObjectReference, std::sync::Arc<Blob>) {
    let (server, _addr) = listening_orb(server).await;
    let blob = Blob::new();
    let id = server.root_adapter().activate(blob.clone()).unwrap();
    let locator = server.root_adapter().reference(&id).unwrap().to_corbaloc();
    let client = client.build();
    let target = client.resolve(&locator).await.unwrap();
    (server, client, target, blob)
}

/// Test: Large request fragmentation
/// Sends a request far larger than the client's fragment size
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_request_fragmentation() {
    init_logging();

    const REQUEST_SIZE: usize = 100_000;

    let (server, client, target, _blob) =
        blob_pair(Orb::builder(), Orb::builder().max_message_size(4096)).await;

    let payload = pattern(REQUEST_SIZE);
    let mut args = client.marshaller();
    args.put_octets(&payload);

    let start = Instant::now();
    let mut results = client
        .invoke(&target, "checksum", args)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    println!("{} byte request answered in {:?}", REQUEST_SIZE, start.elapsed());

    assert_eq!(results.get_u64().unwrap(), compute_checksum(&payload));

    client.destroy().await;
    server.destroy().await;
}

/// Test: Large response fragmentation
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_response_fragmentation() {
    init_logging();

    const RESPONSE_SIZE: u32 = 250_000;

    let (server, client, target, _blob) =
        blob_pair(Orb::builder().max_message_size(2048), Orb::builder()).await;

    let mut args = client.marshaller();
    args.put_u32(RESPONSE_SIZE);
    let mut results = client
        .invoke(&target, "generate", args)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    let data = results.get_octets().unwrap();

    assert_eq!(data.len(), RESPONSE_SIZE as usize);
    assert_eq!(compute_checksum(&data), compute_checksum(&pattern(RESPONSE_SIZE as usize)));

    client.destroy().await;
    server.destroy().await;
}

/// Test: Fragmented calls under concurrent load
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_fragmentation_under_load() {
    init_logging();

    const NUM_CALLS: usize = 20;
    const PAYLOAD_SIZE: usize = 30_000;

    let (server, client, target, blob) = blob_pair(
        Orb::builder().max_message_size(1024),
        Orb::builder().max_message_size(1024),
    )
    .await;

    let calls: Vec<_> = (0..NUM_CALLS)
        .map(|i| {
            let client = client.clone();
            let target = target.clone();
            async move {
                let mut payload = pattern(PAYLOAD_SIZE).to_vec();
                payload[0] = i as u8;
                let echoed = blob_echo(&client, &target, &payload).await.unwrap();
                assert_eq!(echoed.len(), PAYLOAD_SIZE);
                assert_eq!(compute_checksum(&echoed), compute_checksum(&payload), "call {} corrupted", i);
            }
        })
        .collect();
    tokio::time::timeout(Duration::from_secs(30), join_all(calls))
        .await
        .expect("calls finished");

    assert_eq!(blob.completed.load(Ordering::SeqCst), NUM_CALLS as u64);
    assert_eq!(client.connections().len(), 1);

    client.destroy().await;
    server.destroy().await;
}

/// Test: a value whose encoding spans several fragments
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fragmented_value() {
    init_logging();

    let (server, addr, _service) = test_server(Orb::builder().max_message_size(512)).await;
    let client = Orb::builder().max_message_size(512).build();
    let types = ValueTypes::new().unwrap();
    types.register(&client).unwrap();

    let test = resolve_test_service(&client, addr).await;
    let name = "x".repeat(20_000);
    let point = types.named_point(1.0, 2.0, &name).unwrap();
    let token = test.send_point(&point).await.unwrap();
    assert_eq!(token, format!("NamedPoint(1,2,\"{}\")", name));

    client.destroy().await;
    server.destroy().await;
}

/// Test: a message above the receiver's limit fails the connection, not the process
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_receive_limit() {
    init_logging();

    let (server, client, target, blob) = blob_pair(
        Orb::builder().max_receive_size(64 * 1024),
        Orb::builder().max_message_size(8192),
    )
    .await;

    let err = blob_echo(&client, &target, &pattern(200_000)).await.unwrap_err();
    assert!(
        matches!(err.category(), ErrorCategory::SystemFailure | ErrorCategory::Transient),
        "got {:?}",
        err
    );
    assert_eq!(blob.completed.load(Ordering::SeqCst), 0);

    // a fresh connection still works
    tokio::time::sleep(Duration::from_millis(100)).await;
    let echoed = blob_echo(&client, &target, b"small").await.unwrap();
    assert_eq!(echoed.as_ref(), b"small");

    client.destroy().await;
    server.destroy().await;
}
