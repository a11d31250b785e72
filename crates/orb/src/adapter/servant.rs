//! Servant trait

use async_trait::async_trait;

use super::ActivationId;
use crate::connection::ConnectionId;
use crate::marshal::{Marshaller, Unmarshaller};
use crate::orb::Orb;
use crate::types::{Result, OBJECT_TYPE_ID};

/// Context of one inbound call
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Broker that received the call; use it to call back into the caller
    pub orb: Orb,
    /// Connection the request arrived on, `None` for collocated calls
    pub connection: Option<ConnectionId>,
    pub adapter: String,
    pub activation_id: ActivationId,
}

/// Implementation object behind an activation id
///
/// `invoke` reads the arguments of `operation` from `args` and writes the
/// results to `reply`. Unknown operations return
/// [`OrbError::UnknownOperation`](crate::OrbError::UnknownOperation);
/// domain failures return [`OrbError::Application`](crate::OrbError::Application).
#[async_trait]
pub trait Servant: Send + Sync + 'static {
    /// Most derived interface implemented
    fn type_id(&self) -> &str;

    /// Every interface implemented, most derived first
    ///
    /// Servants of a derived interface list its bases here so that
    /// references narrow to them. Empty means `type_id` alone.
    fn type_ids(&self) -> &[&str] {
        &[]
    }

    /// Backs the `_is_a` built-in operation
    fn is_a(&self, type_id: &str) -> bool {
        type_id == self.type_id()
            || type_id == OBJECT_TYPE_ID
            || self.type_ids().iter().any(|id| *id == type_id)
    }

    async fn invoke(
        &self,
        operation: &str,
        args: &mut Unmarshaller,
        reply: &mut Marshaller,
        ctx: &CallContext,
    ) -> Result<()>;
}
