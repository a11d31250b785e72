//! Reentrancy Tests - A->B->A Calls on One Connection
//!
//! These tests exercise nested and interleaved calls:
//! - Ping-pong between two ORBs over the client's single connection
//! - Many concurrent invocations sharing one connection
//! - Inbound callbacks interleaved with outbound replies

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use common::*;
use orb::{Orb, PolicySet};

/// Two ORBs with a Bouncer each; the client side lives in a bidirectional adapter
async fn bouncer_pair() -> (Orb, Orb, Arc<Bouncer>, Arc<Bouncer>, orb::ObjectReference, orb::ObjectReference) {
    let (server, _addr) = listening_orb(Orb::builder().name("server")).await;
    let server_bouncer = Bouncer::new();
    let id = server.root_adapter().activate(server_bouncer.clone()).unwrap();
    let server_ref = server.root_adapter().reference(&id).unwrap();
    server_bouncer.set_reference(server_ref.clone());

    let client = Orb::builder().name("client").build();
    let adapter = client
        .create_adapter("bidir", PolicySet::bidirectional())
        .unwrap();
    let client_bouncer = Bouncer::new();
    let id = adapter.activate(client_bouncer.clone()).unwrap();
    let client_ref = adapter.reference(&id).unwrap();
    client_bouncer.set_reference(client_ref.clone());

    let target = client.resolve(&server_ref.to_corbaloc()).await.unwrap();
    (server, client, server_bouncer, client_bouncer, target, client_ref)
}

/// Test: deep ping-pong
/// Each hop is a new request issued while the previous ones wait for replies
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deep_reentrant_calls() {
    init_logging();

    const DEPTH: u32 = 16;

    let (server, client, server_bouncer, client_bouncer, target, client_ref) = bouncer_pair().await;

    let start = Instant::now();
    let hops = tokio::time::timeout(
        Duration::from_secs(10),
        bounce(&client, &target, DEPTH, &client_ref),
    )
    .await
    .expect("no deadlock")
    .unwrap();
    println!("{} hops in {:?}", hops, start.elapsed());

    assert_eq!(hops, DEPTH);
    // even depths, zero included, land on the server
    assert_eq!(server_bouncer.calls.load(Ordering::SeqCst), (DEPTH / 2 + 1) as u64);
    assert_eq!(client_bouncer.calls.load(Ordering::SeqCst), (DEPTH / 2) as u64);
    assert_eq!(server_bouncer.max_depth.load(Ordering::SeqCst), DEPTH / 2);
    assert_eq!(client.connections().len(), 1);
    assert_eq!(server.connections().len(), 1);
    assert_eq!(server.stats().snapshot().connections_opened, 0);

    client.destroy().await;
    server.destroy().await;
}

/// Test: concurrent ping-pong chains multiplexed on one connection
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_reentrant_chains() {
    init_logging();

    const CHAINS: usize = 20;
    const DEPTH: u32 = 5;

    let (server, client, server_bouncer, client_bouncer, target, client_ref) = bouncer_pair().await;

    let calls: Vec<_> = (0..CHAINS)
        .map(|_| bounce(&client, &target, DEPTH, &client_ref))
        .collect();
    let results = tokio::time::timeout(Duration::from_secs(20), join_all(calls))
        .await
        .expect("chains finished");

    for hops in results {
        assert_eq!(hops.unwrap(), DEPTH);
    }
    let total = server_bouncer.calls.load(Ordering::SeqCst) + client_bouncer.calls.load(Ordering::SeqCst);
    assert_eq!(total, CHAINS as u64 * (DEPTH as u64 + 1));
    assert_eq!(client.connections().len(), 1);

    client.destroy().await;
    server.destroy().await;
}

/// Test: replies are matched to their requests under concurrency
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_invocations_share_connection() {
    init_logging();

    const NUM_CALLS: usize = 100;

    let (server, _addr) = listening_orb(Orb::builder()).await;
    let blob = Blob::new();
    let id = server.root_adapter().activate(blob.clone()).unwrap();
    let locator = server.root_adapter().reference(&id).unwrap().to_corbaloc();

    let client = Orb::with_defaults();
    let target = client.resolve(&locator).await.unwrap();

    let calls: Vec<_> = (0..NUM_CALLS)
        .map(|i| {
            let client = client.clone();
            let target = target.clone();
            async move {
                let payload = format!("request-{}", i).into_bytes();
                let echoed = blob_echo(&client, &target, &payload).await.unwrap();
                assert_eq!(echoed.as_ref(), payload.as_slice(), "reply {} mismatched", i);
            }
        })
        .collect();
    join_all(calls).await;

    assert_eq!(blob.completed.load(Ordering::SeqCst), NUM_CALLS as u64);
    assert_eq!(client.connections().len(), 1);
    let stats = client.stats().snapshot();
    assert_eq!(stats.requests_sent, NUM_CALLS as u64);
    assert_eq!(stats.replies_received, NUM_CALLS as u64);

    client.destroy().await;
    server.destroy().await;
}

/// Test: every peek triggers a callback while its own reply is pending
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_callbacks_interleaved_with_replies() {
    init_logging();

    const NUM_PEEKS: usize = 25;

    let (server, addr, _service) = test_server(Orb::builder()).await;
    let (client, small, callback) = bidirectional_client();

    let test = resolve_test_service(&client, addr).await;
    test.set_callback(&callback).await.unwrap();
    test.send_bool(true, false).await.unwrap();

    let peeks: Vec<_> = (0..NUM_PEEKS).map(|_| test.peek()).collect();
    let tokens = tokio::time::timeout(Duration::from_secs(20), join_all(peeks))
        .await
        .expect("peeks finished");

    for token in tokens {
        assert_eq!(token.unwrap(), "sendBool(true,false)");
    }
    assert_eq!(small.messages().len(), NUM_PEEKS);
    assert!(small.messages().iter().all(|m| m == "hello"));

    client.destroy().await;
    server.destroy().await;
}
