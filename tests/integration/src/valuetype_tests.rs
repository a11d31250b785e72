//! Value Type Tests - Polymorphic Values Across the Wire
//!
//! These tests exercise value marshalling between two ORBs:
//! - A subtype sent where its base is declared
//! - Shared instances and cycles surviving the trip
//! - Missing factories and unassignable values failing only their request

mod common;

use std::sync::Arc;

use common::*;
use orb::{ErrorCategory, MarshalError, ObjectReference, Orb, OrbError, SystemExceptionKind};

async fn value_echo_server(types: &TestTypes) -> (Orb, ObjectReference) {
    let (server, _addr) = listening_orb(Orb::builder().name("values")).await;
    types.register(&server);
    let id = server.root_adapter().activate(Arc::new(ValueEcho)).unwrap();
    let reference = server.root_adapter().reference(&id).unwrap();
    (server, reference)
}

async fn client_for(types: Option<&TestTypes>, reference: &ObjectReference) -> (Orb, ObjectReference) {
    let client = Orb::builder().name("client").build();
    if let Some(types) = types {
        types.register(&client);
    }
    let target = client.resolve(&reference.to_corbaloc()).await.unwrap();
    (client, target)
}

/// Test: NamedPoint where Point is declared
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subtype_for_declared_base() {
    init_logging();

    let (server, addr, service) = test_server(Orb::builder()).await;
    let client = Orb::with_defaults();
    let types = ValueTypes::new().unwrap();
    types.register(&client).unwrap();

    let test = resolve_test_service(&client, addr).await;
    let named = types.named_point(3.1415, 2.7182, "pi,e").unwrap();
    let token = test.send_point(&named).await.unwrap();
    assert_eq!(token, "NamedPoint(3.1415,2.7182,\"pi,e\")");

    let plain = types.point(1.0, 2.0).unwrap();
    assert_eq!(test.send_point(&plain).await.unwrap(), "Point(1,2)");
    assert_eq!(service.last_token(), "Point(1,2)");

    client.destroy().await;
    server.destroy().await;
}

/// Test: a type the receiver has no factory for
/// The request fails with MARSHAL, the connection stays usable
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_factory_fails_request_only() {
    init_logging();

    let (server, _addr) = listening_orb(Orb::builder()).await;
    let types = ValueTypes::new().unwrap();
    server.register_value_type(&types.point).unwrap();
    let service = TestService::new();
    let id = server
        .root_adapter()
        .activate(GiopTestServant::new(service.clone()))
        .unwrap();
    let locator = server.root_adapter().reference(&id).unwrap().to_corbaloc();

    let client = Orb::with_defaults();
    types.register(&client).unwrap();
    let reference = client.resolve(&locator).await.unwrap();
    let test = GiopTestClient::narrow(&client, &reference).await.unwrap().unwrap();

    let named = types.named_point(1.0, 1.0, "nope").unwrap();
    let err = test.send_point(&named).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Marshalling);
    match err {
        OrbError::Marshalling(MarshalError::Remote(ex)) => {
            assert_eq!(ex.kind, SystemExceptionKind::Marshal);
            assert_eq!(ex.minor, orb::types::minor::NO_VALUE_FACTORY);
        }
        other => panic!("expected remote MARSHAL, got {:?}", other),
    }

    let point = types.point(5.0, 6.0).unwrap();
    assert_eq!(test.send_point(&point).await.unwrap(), "Point(5,6)");
    assert_eq!(client.connections().len(), 1);

    client.destroy().await;
    server.destroy().await;
}

/// Test: one instance referenced twice stays one instance
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_instance_identity() {
    init_logging();

    let types = TestTypes::new();
    let (server, reference) = value_echo_server(&types).await;
    let (client, target) = client_for(Some(&types), &reference).await;

    let p = types.points.point(1.1, 2.1).unwrap();
    let shared = types.boxed(&p, &p);
    let q = types.points.point(1.1, 2.1).unwrap();
    let distinct = types.boxed(&p, &q);

    for (boxed, expected) in [(&shared, true), (&distinct, false)] {
        let mut args = client.marshaller();
        args.write_value(Some(boxed)).unwrap();
        let mut results = client
            .invoke(&target, "sameCorners", args)
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(results.get_bool().unwrap(), expected);
    }

    // and back again through echo
    let mut args = client.marshaller();
    args.write_value(Some(&shared)).unwrap();
    let mut results = client
        .invoke(&target, "echo", args)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    let echoed = results.read_value().unwrap().unwrap();
    assert_eq!(echoed, shared);
    assert!(!echoed.ptr_eq(&shared));
    let echoed = echoed.read();
    let p0 = echoed.get_value("p0").unwrap().unwrap();
    let p1 = echoed.get_value("p1").unwrap().unwrap();
    assert!(p0.ptr_eq(&p1));

    client.destroy().await;
    server.destroy().await;
}

/// Test: a ring of figures survives the trip
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cyclic_graph() {
    init_logging();

    let types = TestTypes::new();
    let (server, reference) = value_echo_server(&types).await;
    let (client, target) = client_for(Some(&types), &reference).await;

    let origin = types.points.point(0.0, 0.0).unwrap();
    let a = types.figure(1, Some(&origin));
    let b = types.figure(2, Some(&origin));
    let c = types.figure(3, None);
    a.write().set("next", b.clone()).unwrap();
    b.write().set("next", c.clone()).unwrap();
    c.write().set("next", a.clone()).unwrap();

    let mut args = client.marshaller();
    args.write_value(Some(&a)).unwrap();
    let mut results = client
        .invoke(&target, "ringLength", args)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(results.get_i32().unwrap(), 3);

    let mut args = client.marshaller();
    args.write_value(Some(&a)).unwrap();
    let mut results = client
        .invoke(&target, "echo", args)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    let echoed = results.read_value().unwrap().unwrap();
    let second = echoed.read().get_value("next").unwrap().unwrap();
    let third = second.read().get_value("next").unwrap().unwrap();
    let back = third.read().get_value("next").unwrap().unwrap();
    assert!(back.ptr_eq(&echoed));
    assert_eq!(third.read().get_long("id").unwrap(), 3);
    assert!(third.read().get_value("origin").unwrap().is_none());
    let first_origin = echoed.read().get_value("origin").unwrap().unwrap();
    let second_origin = second.read().get_value("origin").unwrap().unwrap();
    assert!(first_origin.ptr_eq(&second_origin));
    assert_eq!(echoed, a);

    client.destroy().await;
    server.destroy().await;
}

/// Test: a Figure where a Point is declared
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unassignable_value_rejected() {
    init_logging();

    let types = TestTypes::new();
    let (server, reference) = value_echo_server(&types).await;
    let (client, target) = client_for(Some(&types), &reference).await;

    let figure = types.figure(7, None);
    let mut args = client.marshaller();
    args.write_value(Some(&figure)).unwrap();
    let err = client.invoke(&target, "describe", args).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Marshalling);

    let mut args = client.marshaller();
    args.write_value(Some(&types.points.named_point(1.0, 2.0, "ok").unwrap())).unwrap();
    let mut results = client
        .invoke(&target, "describe", args)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(results.get_string().unwrap(), "NamedPoint(1,2,\"ok\")");

    client.destroy().await;
    server.destroy().await;
}

/// Test: the reply carries a type the caller cannot build
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_type_in_reply() {
    init_logging();

    let types = TestTypes::new();
    let (server, reference) = value_echo_server(&types).await;
    let (client, target) = client_for(None, &reference).await;

    // the client can write values without factories, only reading needs them
    let point = types.points.point(9.0, 9.0).unwrap();
    let mut args = client.marshaller();
    args.write_value(Some(&point)).unwrap();
    let mut results = client
        .invoke(&target, "echo", args)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    let err = results.read_value().unwrap_err();
    assert!(matches!(err, MarshalError::UnknownType(id) if id == POINT_TYPE_ID));

    client.destroy().await;
    server.destroy().await;
}

/// Test: a FigureModel carrying a sequence of mixed figures
/// Repeated elements come back as one instance
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_figure_sequence() {
    init_logging();

    let types = TestTypes::new();
    let (server, reference) = value_echo_server(&types).await;
    let (client, target) = client_for(Some(&types), &reference).await;

    let origin = types.points.point(1.0, 1.0).unwrap();
    let plain = types.figure(1, Some(&origin));
    let labeled = types.labeled_figure(2, "second");
    labeled.write().set("origin", origin.clone()).unwrap();
    let model = types.figure_model(vec![plain.clone(), labeled, plain]);

    let mut args = client.marshaller();
    args.write_value(Some(&model)).unwrap();
    let mut results = client
        .invoke(&target, "echo", args)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    let echoed = results.read_value_as(FIGURE_MODEL_TYPE_ID).unwrap().unwrap();
    assert_eq!(echoed, model);

    let data: Vec<_> = echoed
        .read()
        .get_sequence("data")
        .unwrap()
        .iter()
        .map(|item| item.as_value().unwrap().unwrap().clone())
        .collect();
    assert_eq!(data.len(), 3);
    assert!(data[0].ptr_eq(&data[2]));
    assert_eq!(data[1].type_id(), LABELED_FIGURE_TYPE_ID);
    assert_eq!(data[1].read().get_string("label").unwrap(), "second");
    let first_origin = data[0].read().get_value("origin").unwrap().unwrap();
    let second_origin = data[1].read().get_value("origin").unwrap().unwrap();
    assert!(first_origin.ptr_eq(&second_origin));

    client.destroy().await;
    server.destroy().await;
}

/// Test: values nested past the receiver's limit
/// The request fails with MARSHAL, the connection stays usable
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nesting_limit_fails_request_only() {
    init_logging();

    let types = TestTypes::new();
    let (server, _addr) = listening_orb(Orb::builder().name("values").max_value_depth(8)).await;
    types.register(&server);
    let id = server.root_adapter().activate(Arc::new(ValueEcho)).unwrap();
    let reference = server.root_adapter().reference(&id).unwrap();
    let (client, target) = client_for(Some(&types), &reference).await;

    let mut args = client.marshaller();
    args.write_value(Some(&types.figure_chain(20))).unwrap();
    let err = client.invoke(&target, "ringLength", args).await.unwrap_err();
    match &err {
        OrbError::Marshalling(MarshalError::Remote(ex)) => {
            assert_eq!(ex.kind, SystemExceptionKind::Marshal)
        }
        other => panic!("expected remote MARSHAL, got {:?}", other),
    }

    // the sender enforces its own limit before anything is written
    let strict = Orb::builder().max_value_depth(4).build();
    let mut args = strict.marshaller();
    assert!(matches!(
        args.write_value(Some(&types.figure_chain(5))),
        Err(MarshalError::DepthExceeded(4))
    ));

    let mut args = client.marshaller();
    args.write_value(Some(&types.figure_chain(4))).unwrap();
    let mut results = client
        .invoke(&target, "ringLength", args)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(results.get_i32().unwrap(), 4);
    assert_eq!(client.connections().len(), 1);

    client.destroy().await;
    server.destroy().await;
}
