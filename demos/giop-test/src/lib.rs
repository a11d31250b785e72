//! GIOPTest interfaces and value types
//!
//! Hand-written stubs for the interop test scenario:
//!
//! ```text
//! interface GIOPSmall { void call(in string msg); };
//! valuetype Point { public double x; public double y; };
//! valuetype NamedPoint : Point { public string name; };
//! interface GIOPTest {
//!     void sendBool(in boolean v0, in boolean v1);
//!     string peek();
//!     void setCallback(in GIOPSmall callback);
//!     string sendPoint(in Point p);
//! };
//! ```
//!
//! Each interface gets a `<Name>Server` trait, a servant wrapper that
//! decodes requests for it, and a `<Name>Client` proxy.

use std::sync::Arc;

use async_trait::async_trait;
use orb::{
    CallContext, FieldKind, Marshaller, ObjectReference, Orb, OrbError, Result, Servant,
    Unmarshaller, ValueRef, ValueTypeDescriptor,
};
use parking_lot::Mutex;
use tracing::info;

pub const GIOP_TEST_TYPE_ID: &str = "IDL:GIOPTest:1.0";
pub const GIOP_SMALL_TYPE_ID: &str = "IDL:GIOPSmall:1.0";
pub const POINT_TYPE_ID: &str = "IDL:Point:1.0";
pub const NAMED_POINT_TYPE_ID: &str = "IDL:NamedPoint:1.0";

/// Name the test server binds its `GIOPTest` object under
pub const TEST_SERVICE_NAME: &str = "TestService";

/// Descriptors of the demo value types
#[derive(Debug, Clone)]
pub struct ValueTypes {
    pub point: Arc<ValueTypeDescriptor>,
    pub named_point: Arc<ValueTypeDescriptor>,
}

impl ValueTypes {
    pub fn new() -> Result<Self> {
        let point = ValueTypeDescriptor::builder(POINT_TYPE_ID)
            .field("x", FieldKind::Double)
            .field("y", FieldKind::Double)
            .build()?;
        let named_point = ValueTypeDescriptor::builder(NAMED_POINT_TYPE_ID)
            .inherits(&point)
            .field("name", FieldKind::String)
            .build()?;
        Ok(Self { point, named_point })
    }

    /// Register factories for every type with `orb`
    pub fn register(&self, orb: &Orb) -> Result<()> {
        orb.register_value_type(&self.point)?;
        orb.register_value_type(&self.named_point)?;
        Ok(())
    }

    pub fn point(&self, x: f64, y: f64) -> Result<ValueRef> {
        let point = orb::ValueInstance::new(Arc::clone(&self.point))
            .with("x", x)?
            .with("y", y)?;
        Ok(point.into_ref())
    }

    pub fn named_point(&self, x: f64, y: f64, name: &str) -> Result<ValueRef> {
        let point = orb::ValueInstance::new(Arc::clone(&self.named_point))
            .with("x", x)?
            .with("y", y)?
            .with("name", name)?;
        Ok(point.into_ref())
    }
}

/// `Point(x,y)` or `NamedPoint(x,y,"name")`
pub fn describe_point(point: &ValueRef) -> Result<String> {
    let point = point.read();
    let x = point.get_double("x")?;
    let y = point.get_double("y")?;
    if point.descriptor().is_a(NAMED_POINT_TYPE_ID) {
        Ok(format!("NamedPoint({},{},\"{}\")", x, y, point.get_string("name")?))
    } else {
        Ok(format!("Point({},{})", x, y))
    }
}

// GIOPSmall

/// Server trait for GIOPSmall
#[async_trait]
pub trait GiopSmallServer: Send + Sync + 'static {
    async fn call(&self, msg: String, ctx: &CallContext) -> Result<()>;
}

/// Servant dispatching GIOPSmall requests to an implementation
pub struct GiopSmallServant<T>(Arc<T>);

impl<T: GiopSmallServer> GiopSmallServant<T> {
    pub fn new(implementation: Arc<T>) -> Arc<Self> {
        Arc::new(Self(implementation))
    }
}

#[async_trait]
impl<T: GiopSmallServer> Servant for GiopSmallServant<T> {
    fn type_id(&self) -> &str {
        GIOP_SMALL_TYPE_ID
    }

    async fn invoke(
        &self,
        operation: &str,
        args: &mut Unmarshaller,
        _reply: &mut Marshaller,
        ctx: &CallContext,
    ) -> Result<()> {
        match operation {
            "call" => {
                let msg = args.get_string()?;
                self.0.call(msg, ctx).await
            }
            other => Err(OrbError::UnknownOperation(other.to_string())),
        }
    }
}

/// Client proxy for GIOPSmall
#[derive(Debug, Clone)]
pub struct GiopSmallClient {
    orb: Orb,
    reference: ObjectReference,
}

impl GiopSmallClient {
    pub fn new(orb: Orb, reference: ObjectReference) -> Self {
        Self { orb, reference }
    }

    pub fn reference(&self) -> &ObjectReference {
        &self.reference
    }

    pub async fn call(&self, msg: &str) -> Result<()> {
        let mut args = self.orb.marshaller();
        args.put_string(msg);
        self.orb
            .invoke(&self.reference, "call", args)
            .await?
            .into_result()?;
        Ok(())
    }
}

// GIOPTest

/// Server trait for GIOPTest
#[async_trait]
pub trait GiopTestServer: Send + Sync + 'static {
    async fn send_bool(&self, v0: bool, v1: bool, ctx: &CallContext) -> Result<()>;

    async fn peek(&self, ctx: &CallContext) -> Result<String>;

    async fn set_callback(&self, callback: Option<GiopSmallClient>, ctx: &CallContext) -> Result<()>;

    async fn send_point(&self, point: Option<ValueRef>, ctx: &CallContext) -> Result<String>;

    /// Oneway; the caller never sees its outcome
    async fn oneway_method(&self, ctx: &CallContext) -> Result<()>;
}

/// Servant dispatching GIOPTest requests to an implementation
pub struct GiopTestServant<T>(Arc<T>);

impl<T: GiopTestServer> GiopTestServant<T> {
    pub fn new(implementation: Arc<T>) -> Arc<Self> {
        Arc::new(Self(implementation))
    }
}

#[async_trait]
impl<T: GiopTestServer> Servant for GiopTestServant<T> {
    fn type_id(&self) -> &str {
        GIOP_TEST_TYPE_ID
    }

    async fn invoke(
        &self,
        operation: &str,
        args: &mut Unmarshaller,
        reply: &mut Marshaller,
        ctx: &CallContext,
    ) -> Result<()> {
        match operation {
            "sendBool" => {
                let v0 = args.get_bool()?;
                let v1 = args.get_bool()?;
                self.0.send_bool(v0, v1, ctx).await
            }
            "peek" => {
                let token = self.0.peek(ctx).await?;
                reply.put_string(&token);
                Ok(())
            }
            "setCallback" => {
                let callback = args
                    .read_object()?
                    .map(|reference| GiopSmallClient::new(ctx.orb.clone(), reference));
                self.0.set_callback(callback, ctx).await
            }
            "sendPoint" => {
                let point = args.read_value_as(POINT_TYPE_ID)?;
                let token = self.0.send_point(point, ctx).await?;
                reply.put_string(&token);
                Ok(())
            }
            "onewayMethod" => self.0.oneway_method(ctx).await,
            other => Err(OrbError::UnknownOperation(other.to_string())),
        }
    }
}

/// Client proxy for GIOPTest
#[derive(Debug, Clone)]
pub struct GiopTestClient {
    orb: Orb,
    reference: ObjectReference,
}

impl GiopTestClient {
    /// Proxy for `reference` if the object is a GIOPTest
    pub async fn narrow(orb: &Orb, reference: &ObjectReference) -> Result<Option<Self>> {
        Ok(orb
            .narrow(reference, GIOP_TEST_TYPE_ID)
            .await?
            .map(|reference| Self {
                orb: orb.clone(),
                reference,
            }))
    }

    pub fn reference(&self) -> &ObjectReference {
        &self.reference
    }

    /// Two-way, so a `peek` issued after it returns sees its token.
    /// Inbound requests are dispatched concurrently and a oneway request
    /// carries no such ordering; [`oneway_method`](Self::oneway_method)
    /// is the fire-and-forget operation.
    pub async fn send_bool(&self, v0: bool, v1: bool) -> Result<()> {
        let mut args = self.orb.marshaller();
        args.put_bool(v0);
        args.put_bool(v1);
        self.orb
            .invoke(&self.reference, "sendBool", args)
            .await?
            .into_result()?;
        Ok(())
    }

    pub async fn peek(&self) -> Result<String> {
        let mut results = self
            .orb
            .invoke(&self.reference, "peek", self.orb.marshaller())
            .await?
            .into_result()?;
        Ok(results.get_string()?)
    }

    pub async fn set_callback(&self, callback: &ObjectReference) -> Result<()> {
        let mut args = self.orb.marshaller();
        args.write_object(Some(callback));
        self.orb
            .invoke(&self.reference, "setCallback", args)
            .await?
            .into_result()?;
        Ok(())
    }

    pub async fn oneway_method(&self) -> Result<()> {
        self.orb
            .invoke_oneway(&self.reference, "onewayMethod", self.orb.marshaller())
            .await
    }

    pub async fn send_point(&self, point: &ValueRef) -> Result<String> {
        let mut args = self.orb.marshaller();
        args.write_value(Some(point))?;
        let mut results = self
            .orb
            .invoke(&self.reference, "sendPoint", args)
            .await?
            .into_result()?;
        Ok(results.get_string()?)
    }
}

/// GIOPTest implementation used by the test server
///
/// `peek` returns the last recorded token and, when a callback is set,
/// calls it with `"hello"` before answering.
#[derive(Debug)]
pub struct TestService {
    last_token: Mutex<String>,
    callback: Mutex<Option<GiopSmallClient>>,
}

impl TestService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            last_token: Mutex::new(String::new()),
            callback: Mutex::new(None),
        })
    }

    pub fn last_token(&self) -> String {
        self.last_token.lock().clone()
    }

    pub fn callback(&self) -> Option<GiopSmallClient> {
        self.callback.lock().clone()
    }

    fn record(&self, token: String) -> String {
        *self.last_token.lock() = token.clone();
        token
    }
}

#[async_trait]
impl GiopTestServer for TestService {
    async fn send_bool(&self, v0: bool, v1: bool, _ctx: &CallContext) -> Result<()> {
        info!("sendBool({}, {})", v0, v1);
        self.record(format!("sendBool({},{})", v0, v1));
        Ok(())
    }

    async fn peek(&self, _ctx: &CallContext) -> Result<String> {
        let callback = self.callback();
        if let Some(callback) = callback {
            callback.call("hello").await?;
        }
        Ok(self.last_token())
    }

    async fn set_callback(&self, callback: Option<GiopSmallClient>, _ctx: &CallContext) -> Result<()> {
        match &callback {
            Some(callback) => info!("Callback set to {}", callback.reference()),
            None => info!("Callback cleared"),
        }
        *self.callback.lock() = callback;
        Ok(())
    }

    async fn send_point(&self, point: Option<ValueRef>, _ctx: &CallContext) -> Result<String> {
        let token = match point {
            Some(point) => describe_point(&point)?,
            None => "null".to_string(),
        };
        info!("sendPoint({})", token);
        Ok(self.record(token))
    }

    async fn oneway_method(&self, _ctx: &CallContext) -> Result<()> {
        info!("onewayMethod()");
        self.record("onewayMethod".to_string());
        Ok(())
    }
}

/// GIOPSmall implementation that records every message it receives
#[derive(Debug, Default)]
pub struct RecordingSmall {
    messages: Mutex<Vec<String>>,
}

impl RecordingSmall {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl GiopSmallServer for RecordingSmall {
    async fn call(&self, msg: String, ctx: &CallContext) -> Result<()> {
        info!("GIOPSmall::call({:?}) on connection {:?}", msg, ctx.connection);
        self.messages.lock().push(msg);
        Ok(())
    }
}
