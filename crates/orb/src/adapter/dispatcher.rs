//! Inbound request routing

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use cdr::ByteOrder;
use giop::{LocateStatus, ReplyStatus};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::object_adapter::{ActivationId, ObjectAdapter, ROOT_ADAPTER};
use super::{CallContext, Servant};
use crate::connection::ConnectionId;
use crate::marshal::Marshaller;
use crate::orb::Orb;
use crate::types::{minor, CompletionStatus, OrbError, Result, SystemException, SystemExceptionKind};

/// How a request reached the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Invoked through a local reference, no connection involved
    Collocated,
    /// Arrived on a connection the peer opened to us
    Accepted,
    /// Arrived on a connection this ORB opened
    Initiated,
}

/// A decoded request ready for dispatch
#[derive(Debug)]
pub(crate) struct InboundRequest {
    pub object_key: Bytes,
    pub operation: String,
    pub body: Bytes,
    pub byte_order: ByteOrder,
    pub origin: Origin,
    pub connection: Option<ConnectionId>,
}

/// All adapters of one ORB, by name
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<ObjectAdapter>>>,
}

type Route = (Arc<ObjectAdapter>, ActivationId, Arc<dyn Servant>);

impl AdapterRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, adapter: Arc<ObjectAdapter>) -> Result<()> {
        let mut adapters = self.adapters.write();
        if adapters.contains_key(adapter.name()) {
            return Err(OrbError::Adapter(format!("adapter {} already exists", adapter.name())));
        }
        adapters.insert(adapter.name().to_string(), adapter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ObjectAdapter>> {
        self.adapters.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.adapters.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether any adapter accepts calls over connections we initiate
    pub fn any_bidirectional(&self) -> bool {
        self.adapters
            .read()
            .values()
            .any(|a| a.is_running() && a.is_bidirectional())
    }

    fn route(&self, key: &[u8]) -> Result<Route> {
        let key_str = String::from_utf8_lossy(key);
        let (adapter_name, id) = match key_str.split_once('/') {
            Some((adapter, id)) => (adapter, id),
            None => (ROOT_ADAPTER, key_str.as_ref()),
        };
        let unknown = || OrbError::UnknownActivationId(key_str.to_string());

        let adapter = self.get(adapter_name).ok_or_else(unknown)?;
        let id = ActivationId::from(id);
        let servant = adapter.servant(&id).ok_or_else(unknown)?;
        Ok((adapter, id, servant))
    }

    pub(crate) fn locate(&self, key: &[u8]) -> LocateStatus {
        match self.route(key) {
            Ok(_) => LocateStatus::ObjectHere,
            Err(_) => LocateStatus::UnknownObject,
        }
    }

    /// Dispatch a request and encode the reply status and body
    pub(crate) async fn dispatch(&self, orb: &Orb, request: InboundRequest) -> (ReplyStatus, Bytes) {
        let stats = orb.stats();
        stats.requests_dispatched.fetch_add(1, Ordering::Relaxed);

        let mut reply = orb.marshaller();
        if request.operation == "_non_existent" {
            reply.put_bool(self.route(&request.object_key).is_err());
            return (ReplyStatus::NoException, reply.into_bytes());
        }

        match self.invoke(orb, &request, &mut reply).await {
            Ok(()) => (ReplyStatus::NoException, reply.into_bytes()),
            Err(OrbError::Application(ex)) => {
                debug!(
                    "{} on {} raised {}",
                    request.operation,
                    String::from_utf8_lossy(&request.object_key),
                    ex.id
                );
                let mut reply = orb.marshaller();
                ex.encode(&mut reply);
                (ReplyStatus::UserException, reply.into_bytes())
            }
            Err(e) => {
                stats.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Dispatch of {} on {} failed: {}",
                    request.operation,
                    String::from_utf8_lossy(&request.object_key),
                    e
                );
                let mut reply = orb.marshaller();
                e.to_system_exception().encode(&mut reply);
                (ReplyStatus::SystemException, reply.into_bytes())
            }
        }
    }

    async fn invoke(&self, orb: &Orb, request: &InboundRequest, reply: &mut Marshaller) -> Result<()> {
        let (adapter, id, servant) = self.route(&request.object_key)?;
        if !adapter.accepts(request.origin) {
            return Err(OrbError::System(SystemException::new(
                SystemExceptionKind::NoPermission,
                minor::BIDIRECTIONAL_REQUIRED,
                CompletionStatus::No,
            )));
        }

        let mut args = orb.unmarshaller(request.body.clone(), request.byte_order);

        if request.operation == "_is_a" {
            let type_id = args.get_string()?;
            reply.put_bool(servant.is_a(&type_id));
            return Ok(());
        }

        debug!(
            "Dispatching {} to {} in {}",
            request.operation,
            id,
            adapter.name()
        );
        let ctx = CallContext {
            orb: orb.clone(),
            connection: request.connection,
            adapter: adapter.name().to_string(),
            activation_id: id,
        };
        servant.invoke(&request.operation, &mut args, reply, &ctx).await
    }

    pub(crate) fn shutdown(&self) {
        for adapter in self.adapters.read().values() {
            adapter.shutdown();
        }
    }
}
