//! Bidirectional GIOP Tests - Callbacks Over the Client's Connection
//!
//! These tests exercise BI_DIR_IIOP negotiation end to end:
//! - A client without a listen socket receives callbacks
//! - The server never dials the client
//! - Adapters without the BIDIRECTIONAL policy refuse such calls
//! - Servers configured not to accept bidirectional use fall back to dialling

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::future::join_all;

use common::*;
use orb::{ErrorCategory, Orb, OrbError, PolicySet, SystemExceptionKind};

/// Test: the interop scenario
/// sendBool, then peek with a callback arriving during the wait
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_callback_during_peek() {
    init_logging();

    let (server, addr, service) = test_server(Orb::builder().name("server")).await;
    let (client, small, callback) = bidirectional_client();
    assert!(callback.endpoint().is_synthetic());

    let test = resolve_test_service(&client, addr).await;
    test.set_callback(&callback).await.unwrap();
    test.send_bool(false, true).await.unwrap();

    let token = test.peek().await.unwrap();
    assert_eq!(token, "sendBool(false,true)");
    assert_eq!(small.messages(), vec!["hello".to_string()]);
    assert!(service.callback().is_some());

    let server_stats = server.stats().snapshot();
    assert_eq!(server_stats.connections_opened, 0, "server must not dial the client");
    assert_eq!(server_stats.connections_accepted, 1);
    assert_eq!(server_stats.bidirectional_registrations, 1);

    let client_stats = client.stats().snapshot();
    assert_eq!(client_stats.connections_opened, 1);
    assert_eq!(client.connections().len(), 1);
    assert!(client.connections().list()[0].is_bidirectional());

    client.destroy().await;
    server.destroy().await;
}

/// Test: callbacks reach the servant on the connection the client opened
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_callback_uses_initiated_connection() {
    init_logging();

    let (server, addr, _service) = test_server(Orb::builder()).await;
    let (client, _small, _callback) = bidirectional_client();

    let bouncer = Bouncer::new();
    let adapter = client.adapter("bidir").unwrap();
    let id = adapter.activate(bouncer.clone()).unwrap();
    let client_ref = adapter.reference(&id).unwrap();
    bouncer.set_reference(client_ref.clone());

    let server_bouncer = Bouncer::new();
    let server_id = server.root_adapter().activate(server_bouncer.clone()).unwrap();
    let server_ref = server.root_adapter().reference(&server_id).unwrap();
    server_bouncer.set_reference(server_ref.clone());

    // reach the server through its corbaloc form to exercise resolution
    let _ = client.resolve(&test_service_locator(addr)).await.unwrap();
    let target = client.resolve(&server_ref.to_corbaloc()).await.unwrap();

    let hops = bounce(&client, &target, 1, &client_ref).await.unwrap();
    assert_eq!(hops, 1);
    assert_eq!(bouncer.calls.load(Ordering::SeqCst), 1);

    let connection = bouncer.connections.lock()[0].expect("callback arrived over a connection");
    let conn = client.connections().get(connection).unwrap();
    assert_eq!(conn.role(), orb::ConnectionRole::Initiator);

    client.destroy().await;
    server.destroy().await;
}

/// Test: a servant in a non-bidirectional adapter cannot be called back
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_bidirectional_adapter_rejects_callback() {
    init_logging();

    let (server, addr, _service) = test_server(Orb::builder()).await;
    let (client, _bidir_small, _) = bidirectional_client();

    let small = RecordingSmall::new();
    let id = client
        .root_adapter()
        .activate(GiopSmallServant::new(small.clone()))
        .unwrap();
    let plain_callback = client.root_adapter().reference(&id).unwrap();

    let test = resolve_test_service(&client, addr).await;
    test.set_callback(&plain_callback).await.unwrap();

    let err = test.peek().await.unwrap_err();
    match err {
        OrbError::System(ex) => {
            assert_eq!(ex.kind, SystemExceptionKind::NoPermission);
            assert_eq!(ex.minor, orb::types::minor::BIDIRECTIONAL_REQUIRED);
        }
        other => panic!("expected NO_PERMISSION, got {:?}", other),
    }
    assert!(small.messages().is_empty());
    assert!(client.stats().snapshot().dispatch_failures >= 1);

    client.destroy().await;
    server.destroy().await;
}

/// Test: a server refusing bidirectional use tries to dial the synthetic endpoint
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bidirectional_not_accepted() {
    init_logging();

    let (server, addr, _service) = test_server(Orb::builder().accept_bidirectional(false)).await;
    let (client, small, callback) = bidirectional_client();

    let test = resolve_test_service(&client, addr).await;
    test.set_callback(&callback).await.unwrap();

    let err = test.peek().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transient, "got {:?}", err);
    assert!(small.messages().is_empty());
    assert_eq!(server.stats().snapshot().bidirectional_registrations, 0);

    client.destroy().await;
    server.destroy().await;
}

/// Test: a client with no bidirectional adapter does not offer its connection
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_offer_without_bidirectional_adapter() {
    init_logging();

    let (server, addr, _service) = test_server(Orb::builder()).await;
    let client = Orb::builder().build();
    let _plain = client.create_adapter("plain", PolicySet::new()).unwrap();

    let test = resolve_test_service(&client, addr).await;
    test.send_bool(true, true).await.unwrap();
    assert_eq!(test.peek().await.unwrap(), "sendBool(true,true)");

    assert_eq!(server.stats().snapshot().bidirectional_registrations, 0);
    assert!(!client.connections().list()[0].is_bidirectional());

    client.destroy().await;
    server.destroy().await;
}

/// Test: many clients each get their own callbacks
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_bidirectional_clients() {
    init_logging();

    const NUM_CLIENTS: usize = 8;

    let (server, _addr, _service) = test_server(Orb::builder()).await;
    let server_bouncer = Bouncer::new();
    let server_id = server.root_adapter().activate(server_bouncer.clone()).unwrap();
    let server_ref = server.root_adapter().reference(&server_id).unwrap();
    server_bouncer.set_reference(server_ref.clone());

    let tasks: Vec<_> = (0..NUM_CLIENTS)
        .map(|i| {
            let locator = server_ref.to_corbaloc();
            tokio::spawn(async move {
                let client = Orb::builder().name(format!("client-{}", i)).build();
                let adapter = client
                    .create_adapter("bidir", PolicySet::bidirectional())
                    .unwrap();
                let bouncer = Bouncer::new();
                let id = adapter.activate(bouncer.clone()).unwrap();
                let me = adapter.reference(&id).unwrap();
                bouncer.set_reference(me.clone());

                let target = client.resolve(&locator).await.unwrap();
                let hops = bounce(&client, &target, 3, &me).await.unwrap();
                let calls = bouncer.calls.load(Ordering::SeqCst);
                client.destroy().await;
                (hops, calls)
            })
        })
        .collect();

    let results = tokio::time::timeout(Duration::from_secs(30), join_all(tasks))
        .await
        .expect("clients finished");
    for result in results {
        let (hops, calls) = result.unwrap();
        assert_eq!(hops, 3);
        // depths 2 and 0 land on the client
        assert_eq!(calls, 2);
    }
    assert_eq!(
        server.stats().snapshot().bidirectional_registrations,
        NUM_CLIENTS as u64
    );
    assert_eq!(server.stats().snapshot().connections_opened, 0);

    server.destroy().await;
}
