//! Object adapter: activation table and policies

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use super::dispatcher::Origin;
use super::Servant;
use crate::types::{Endpoint, ObjectReference, OrbError, Result};

/// Name of the adapter every ORB creates
pub const ROOT_ADAPTER: &str = "RootPOA";

/// Adapter policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Accept calls arriving on connections this ORB initiated
    Bidirectional,
}

/// Immutable set of adapter policies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    policies: Vec<Policy>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, policy: Policy) -> Self {
        if !self.policies.contains(&policy) {
            self.policies.push(policy);
        }
        self
    }

    pub fn bidirectional() -> Self {
        Self::new().with(Policy::Bidirectional)
    }

    pub fn contains(&self, policy: Policy) -> bool {
        self.policies.contains(&policy)
    }
}

/// Opaque token naming a servant within its adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivationId(pub String);

impl ActivationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActivationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Maps activation ids to servants
pub struct ObjectAdapter {
    name: String,
    policies: PolicySet,
    servants: RwLock<HashMap<ActivationId, Arc<dyn Servant>>>,
    next_id: AtomicU64,
    /// Shared with the ORB; changes when it starts or stops listening
    endpoint: Arc<RwLock<Endpoint>>,
    running: AtomicBool,
}

impl ObjectAdapter {
    pub(crate) fn new(name: impl Into<String>, policies: PolicySet, endpoint: Arc<RwLock<Endpoint>>) -> Self {
        Self {
            name: name.into(),
            policies,
            servants: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            endpoint,
            running: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn is_bidirectional(&self) -> bool {
        self.policies.contains(Policy::Bidirectional)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Activate a servant under a fresh id
    pub fn activate(&self, servant: Arc<dyn Servant>) -> Result<ActivationId> {
        loop {
            let id = ActivationId(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
            match self.insert(id, Arc::clone(&servant)) {
                // an explicit id may already hold this number
                Err(OrbError::Adapter(_)) if self.is_running() => continue,
                other => return other,
            }
        }
    }

    /// Activate a servant under a caller-chosen id
    pub fn activate_with_id(&self, id: impl Into<String>, servant: Arc<dyn Servant>) -> Result<ActivationId> {
        let id = ActivationId(id.into());
        if id.0.is_empty() || id.0.contains('/') {
            return Err(OrbError::Adapter(format!("invalid activation id {:?}", id.0)));
        }
        self.insert(id, servant)
    }

    fn insert(&self, id: ActivationId, servant: Arc<dyn Servant>) -> Result<ActivationId> {
        if !self.is_running() {
            return Err(OrbError::Cancelled(format!("adapter {} is shut down", self.name)));
        }
        let mut servants = self.servants.write();
        if servants.contains_key(&id) {
            return Err(OrbError::Adapter(format!("{} already active in {}", id, self.name)));
        }
        debug!("Activating {} ({}) in {}", id, servant.type_id(), self.name);
        servants.insert(id.clone(), servant);
        Ok(id)
    }

    pub fn deactivate(&self, id: &ActivationId) -> Result<()> {
        match self.servants.write().remove(id) {
            Some(_) => {
                debug!("Deactivated {} in {}", id, self.name);
                Ok(())
            }
            None => Err(OrbError::UnknownActivationId(self.key_string(id))),
        }
    }

    pub fn servant(&self, id: &ActivationId) -> Option<Arc<dyn Servant>> {
        self.servants.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.servants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servants.read().is_empty()
    }

    fn key_string(&self, id: &ActivationId) -> String {
        if self.name == ROOT_ADAPTER {
            id.0.clone()
        } else {
            format!("{}/{}", self.name, id)
        }
    }

    pub fn object_key(&self, id: &ActivationId) -> Bytes {
        Bytes::from(self.key_string(id))
    }

    /// Local reference to an active servant
    pub fn reference(&self, id: &ActivationId) -> Result<ObjectReference> {
        let servant = self
            .servant(id)
            .ok_or_else(|| OrbError::UnknownActivationId(self.key_string(id)))?;
        Ok(ObjectReference::local(
            servant.type_id(),
            self.endpoint.read().clone(),
            self.object_key(id),
        ))
    }

    /// Whether a request arriving this way may reach this adapter
    pub(crate) fn accepts(&self, origin: Origin) -> bool {
        match origin {
            Origin::Collocated | Origin::Accepted => true,
            Origin::Initiated => self.is_bidirectional(),
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.servants.write().clear();
    }
}

impl fmt::Debug for ObjectAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectAdapter")
            .field("name", &self.name)
            .field("policies", &self.policies)
            .field("servants", &self.len())
            .finish()
    }
}
