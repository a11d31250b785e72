//! Shared servants, value types and ORB helpers for the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub use giop_test::{
    describe_point, GiopSmallClient, GiopSmallServant, GiopTestClient, GiopTestServant,
    RecordingSmall, TestService, ValueTypes, NAMED_POINT_TYPE_ID, POINT_TYPE_ID,
    TEST_SERVICE_NAME,
};
use orb::{
    CallContext, ConnectionId, FieldKind, Marshaller, ObjectReference, Orb, OrbBuilder, OrbError,
    Result, Servant, Unmarshaller, ValueInstance, ValueRef, ValueTypeDescriptor,
};

pub const BOX_TYPE_ID: &str = "IDL:Box:1.0";
pub const FIGURE_TYPE_ID: &str = "IDL:Figure:1.0";
pub const LABELED_FIGURE_TYPE_ID: &str = "IDL:LabeledFigure:1.0";
pub const FIGURE_MODEL_TYPE_ID: &str = "IDL:FigureModel:1.0";
pub const BOUNCER_TYPE_ID: &str = "IDL:Bouncer:1.0";
/// Base interface of Bouncer
pub const RELAY_TYPE_ID: &str = "IDL:Relay:1.0";
pub const BLOB_TYPE_ID: &str = "IDL:Blob:1.0";
pub const VALUE_ECHO_TYPE_ID: &str = "IDL:ValueEcho:1.0";

/// Initialize logging for tests
pub fn init_logging() {
    let _ = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_test_writer()
        .try_init();
}

/// ORB listening on an ephemeral loopback port
pub async fn listening_orb(builder: OrbBuilder) -> (Orb, SocketAddr) {
    let orb = builder.build();
    let addr = orb.listen("127.0.0.1:0").await.unwrap();
    (orb, addr)
}

/// Server ORB with the naming service and a bound `TestService`
pub async fn test_server(builder: OrbBuilder) -> (Orb, SocketAddr, Arc<TestService>) {
    let (orb, addr) = listening_orb(builder).await;
    ValueTypes::new().unwrap().register(&orb).unwrap();
    orb.start_naming_service().unwrap();
    let service = TestService::new();
    orb.bind(TEST_SERVICE_NAME, GiopTestServant::new(Arc::clone(&service)))
        .unwrap();
    (orb, addr, service)
}

pub fn test_service_locator(addr: SocketAddr) -> String {
    format!("corbaname::{}:{}#{}", addr.ip(), addr.port(), TEST_SERVICE_NAME)
}

/// Client ORB with a BIDIRECTIONAL adapter holding a recording GIOPSmall
pub fn bidirectional_client() -> (Orb, Arc<RecordingSmall>, ObjectReference) {
    let orb = Orb::builder().name("client").build();
    ValueTypes::new().unwrap().register(&orb).unwrap();
    let adapter = orb
        .create_adapter("bidir", orb::PolicySet::bidirectional())
        .unwrap();
    let small = RecordingSmall::new();
    let id = adapter
        .activate(GiopSmallServant::new(Arc::clone(&small)))
        .unwrap();
    let callback = adapter.reference(&id).unwrap();
    (orb, small, callback)
}

pub async fn resolve_test_service(orb: &Orb, addr: SocketAddr) -> GiopTestClient {
    let reference = orb.resolve(&test_service_locator(addr)).await.unwrap();
    GiopTestClient::narrow(orb, &reference).await.unwrap().unwrap()
}

/// Compute a simple checksum for data verification
pub fn compute_checksum(data: &[u8]) -> u64 {
    let mut sum: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        sum = sum.wrapping_add((byte as u64).wrapping_mul((i as u64) + 1));
    }
    sum
}

/// `size` bytes of a repeating pattern
pub fn pattern(size: usize) -> Bytes {
    let mut data = BytesMut::with_capacity(size);
    for i in 0..size {
        data.put_u8((i % 251) as u8);
    }
    data.freeze()
}

// Value types beyond Point/NamedPoint

/// Descriptors for Point, NamedPoint, Box, the self-referencing Figure,
/// its LabeledFigure subtype and a FigureModel holding a figure sequence
#[derive(Debug, Clone)]
pub struct TestTypes {
    pub points: ValueTypes,
    pub boxed: Arc<ValueTypeDescriptor>,
    pub figure: Arc<ValueTypeDescriptor>,
    pub labeled_figure: Arc<ValueTypeDescriptor>,
    pub figure_model: Arc<ValueTypeDescriptor>,
}

impl TestTypes {
    pub fn new() -> Self {
        let points = ValueTypes::new().unwrap();
        let boxed = ValueTypeDescriptor::builder(BOX_TYPE_ID)
            .field("p0", FieldKind::Value(POINT_TYPE_ID.into()))
            .field("p1", FieldKind::Value(POINT_TYPE_ID.into()))
            .build()
            .unwrap();
        let figure = ValueTypeDescriptor::builder(FIGURE_TYPE_ID)
            .field("id", FieldKind::Long)
            .field("origin", FieldKind::Value(POINT_TYPE_ID.into()))
            .field("next", FieldKind::Value(FIGURE_TYPE_ID.into()))
            .build()
            .unwrap();
        let labeled_figure = ValueTypeDescriptor::builder(LABELED_FIGURE_TYPE_ID)
            .inherits(&figure)
            .field("label", FieldKind::String)
            .build()
            .unwrap();
        let figure_model = ValueTypeDescriptor::builder(FIGURE_MODEL_TYPE_ID)
            .field("data", FieldKind::sequence_of(FieldKind::Value(FIGURE_TYPE_ID.into())))
            .build()
            .unwrap();
        Self {
            points,
            boxed,
            figure,
            labeled_figure,
            figure_model,
        }
    }

    pub fn register(&self, orb: &Orb) {
        self.points.register(orb).unwrap();
        for descriptor in [&self.boxed, &self.figure, &self.labeled_figure, &self.figure_model] {
            orb.register_value_type(descriptor).unwrap();
        }
    }

    pub fn boxed(&self, p0: &ValueRef, p1: &ValueRef) -> ValueRef {
        ValueInstance::new(Arc::clone(&self.boxed))
            .with("p0", p0.clone())
            .unwrap()
            .with("p1", p1.clone())
            .unwrap()
            .into_ref()
    }

    pub fn figure(&self, id: i32, origin: Option<&ValueRef>) -> ValueRef {
        ValueInstance::new(Arc::clone(&self.figure))
            .with("id", id)
            .unwrap()
            .with("origin", origin.cloned())
            .unwrap()
            .into_ref()
    }

    pub fn labeled_figure(&self, id: i32, label: &str) -> ValueRef {
        ValueInstance::new(Arc::clone(&self.labeled_figure))
            .with("id", id)
            .unwrap()
            .with("label", label)
            .unwrap()
            .into_ref()
    }

    pub fn figure_model(&self, data: Vec<ValueRef>) -> ValueRef {
        ValueInstance::new(Arc::clone(&self.figure_model))
            .with("data", data)
            .unwrap()
            .into_ref()
    }

    /// Figures linked through `next`, `len` long, ids from 0
    pub fn figure_chain(&self, len: i32) -> ValueRef {
        let mut head: Option<ValueRef> = None;
        for id in (0..len).rev() {
            let figure = self.figure(id, None);
            figure.write().set("next", head.take()).unwrap();
            head = Some(figure);
        }
        head.unwrap()
    }
}

impl Default for TestTypes {
    fn default() -> Self {
        Self::new()
    }
}

// Servants

/// Calls back and forth with a peer Bouncer until `depth` reaches zero
///
/// `bounce(depth, peer)` returns the number of hops taken below it.
#[derive(Default)]
pub struct Bouncer {
    pub calls: AtomicU64,
    current_depth: AtomicU32,
    pub max_depth: AtomicU32,
    pub connections: Mutex<Vec<Option<ConnectionId>>>,
    self_ref: Mutex<Option<ObjectReference>>,
}

impl Bouncer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reference(&self, reference: ObjectReference) {
        *self.self_ref.lock() = Some(reference);
    }

    fn enter(&self) -> u32 {
        let depth = self.current_depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_depth.fetch_max(depth, Ordering::SeqCst);
        depth
    }

    fn leave(&self) {
        self.current_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Invoke `bounce` on `target`
pub async fn bounce(orb: &Orb, target: &ObjectReference, depth: u32, caller: &ObjectReference) -> Result<u32> {
    let mut args = orb.marshaller();
    args.put_u32(depth);
    args.write_object(Some(caller));
    let mut results = orb.invoke(target, "bounce", args).await?.into_result()?;
    Ok(results.get_u32()?)
}

#[async_trait]
impl Servant for Bouncer {
    fn type_id(&self) -> &str {
        BOUNCER_TYPE_ID
    }

    fn type_ids(&self) -> &[&str] {
        &[BOUNCER_TYPE_ID, RELAY_TYPE_ID]
    }

    async fn invoke(
        &self,
        operation: &str,
        args: &mut Unmarshaller,
        reply: &mut Marshaller,
        ctx: &CallContext,
    ) -> Result<()> {
        match operation {
            "bounce" => {
                let depth = args.get_u32()?;
                let peer = args.read_object()?;
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.connections.lock().push(ctx.connection);

                let hops = match (depth, peer) {
                    (0, _) | (_, None) => 0,
                    (depth, Some(peer)) => {
                        let me = self.self_ref.lock().clone().ok_or_else(|| {
                            OrbError::Adapter("bouncer has no reference".into())
                        })?;
                        self.enter();
                        let below = bounce(&ctx.orb, &peer, depth - 1, &me).await;
                        self.leave();
                        below? + 1
                    }
                };
                reply.put_u32(hops);
                Ok(())
            }
            other => Err(OrbError::UnknownOperation(other.to_string())),
        }
    }
}

/// Octet payloads for fragmentation and shutdown tests
#[derive(Default)]
pub struct Blob {
    pub completed: AtomicU64,
}

impl Blob {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Servant for Blob {
    fn type_id(&self) -> &str {
        BLOB_TYPE_ID
    }

    async fn invoke(
        &self,
        operation: &str,
        args: &mut Unmarshaller,
        reply: &mut Marshaller,
        _ctx: &CallContext,
    ) -> Result<()> {
        match operation {
            "echo" => {
                let data = args.get_octets()?;
                reply.put_octets(&data);
            }
            "generate" => {
                let size = args.get_u32()? as usize;
                reply.put_octets(&pattern(size));
            }
            "checksum" => {
                let data = args.get_octets()?;
                reply.put_u64(compute_checksum(&data));
            }
            "sleep" => {
                let millis = args.get_u32()?;
                tokio::time::sleep(Duration::from_millis(millis as u64)).await;
            }
            other => return Err(OrbError::UnknownOperation(other.to_string())),
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub async fn blob_echo(orb: &Orb, target: &ObjectReference, data: &[u8]) -> Result<Bytes> {
    let mut args = orb.marshaller();
    args.put_octets(data);
    let mut results = orb.invoke(target, "echo", args).await?.into_result()?;
    Ok(results.get_octets()?)
}

pub async fn blob_sleep(orb: &Orb, target: &ObjectReference, millis: u32) -> Result<()> {
    let mut args = orb.marshaller();
    args.put_u32(millis);
    orb.invoke(target, "sleep", args).await?.into_result()?;
    Ok(())
}

/// Value type operations
///
/// - `echo(value) -> value`
/// - `sameCorners(Box) -> boolean`: whether both corners are one instance
/// - `ringLength(Figure) -> long`: figures until `next` returns to the start
/// - `describe(Point) -> string`
#[derive(Default)]
pub struct ValueEcho;

#[async_trait]
impl Servant for ValueEcho {
    fn type_id(&self) -> &str {
        VALUE_ECHO_TYPE_ID
    }

    async fn invoke(
        &self,
        operation: &str,
        args: &mut Unmarshaller,
        reply: &mut Marshaller,
        _ctx: &CallContext,
    ) -> Result<()> {
        match operation {
            "echo" => {
                let value = args.read_value()?;
                reply.write_value(value.as_ref())?;
            }
            "sameCorners" => {
                let boxed = args
                    .read_value_as(BOX_TYPE_ID)?
                    .ok_or_else(|| OrbError::Adapter("null box".into()))?;
                let boxed = boxed.read();
                let same = match (boxed.get_value("p0")?, boxed.get_value("p1")?) {
                    (Some(p0), Some(p1)) => p0.ptr_eq(&p1),
                    _ => false,
                };
                reply.put_bool(same);
            }
            "ringLength" => {
                let start = args
                    .read_value_as(FIGURE_TYPE_ID)?
                    .ok_or_else(|| OrbError::Adapter("null figure".into()))?;
                let mut length = 1;
                let mut current = start.read().get_value("next")?;
                while let Some(figure) = current {
                    if figure.ptr_eq(&start) {
                        break;
                    }
                    length += 1;
                    current = figure.read().get_value("next")?;
                }
                reply.put_i32(length);
            }
            "describe" => {
                let point = args
                    .read_value_as(POINT_TYPE_ID)?
                    .ok_or_else(|| OrbError::Adapter("null point".into()))?;
                reply.put_string(&describe_point(&point)?);
            }
            other => return Err(OrbError::UnknownOperation(other.to_string())),
        }
        Ok(())
    }
}
