//! Value factory registry
//!
//! Maps repository ids to factories producing blank instances for the
//! unmarshaller to populate. Each ORB owns one registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::descriptor::ValueTypeDescriptor;
use super::instance::ValueInstance;
use crate::types::MarshalError;

/// Produces blank instances of one value type
pub trait ValueFactory: Send + Sync {
    fn create_for_unmarshal(&self) -> ValueInstance;
}

impl<F> ValueFactory for F
where
    F: Fn() -> ValueInstance + Send + Sync,
{
    fn create_for_unmarshal(&self) -> ValueInstance {
        self()
    }
}

/// Factory creating zero-initialized instances of a descriptor
#[derive(Debug, Clone)]
pub struct DescriptorFactory(pub Arc<ValueTypeDescriptor>);

impl ValueFactory for DescriptorFactory {
    fn create_for_unmarshal(&self) -> ValueInstance {
        ValueInstance::new(Arc::clone(&self.0))
    }
}

/// What to do when a type id is already registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationPolicy {
    #[default]
    Reject,
    Override,
}

/// Thread-safe map from type id to factory
#[derive(Default)]
pub struct ValueFactoryRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ValueFactory>>>,
}

impl ValueFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, failing if `type_id` already has one
    pub fn register<F>(&self, type_id: impl Into<String>, factory: F) -> Result<(), MarshalError>
    where
        F: ValueFactory + 'static,
    {
        self.register_with(type_id, factory, RegistrationPolicy::Reject)
            .map(|_| ())
    }

    /// Register a factory; returns the one it replaced under
    /// [`RegistrationPolicy::Override`]
    pub fn register_with<F>(
        &self,
        type_id: impl Into<String>,
        factory: F,
        policy: RegistrationPolicy,
    ) -> Result<Option<Arc<dyn ValueFactory>>, MarshalError>
    where
        F: ValueFactory + 'static,
    {
        let type_id = type_id.into();
        let mut factories = self.factories.write();
        if policy == RegistrationPolicy::Reject && factories.contains_key(&type_id) {
            return Err(MarshalError::DuplicateRegistration(type_id));
        }
        debug!("Registering value factory for {}", type_id);
        Ok(factories.insert(type_id, Arc::new(factory)))
    }

    /// Register a [`DescriptorFactory`] under the descriptor's own id
    pub fn register_descriptor(&self, descriptor: &Arc<ValueTypeDescriptor>) -> Result<(), MarshalError> {
        self.register(
            descriptor.type_id().to_string(),
            DescriptorFactory(Arc::clone(descriptor)),
        )
    }

    pub fn unregister(&self, type_id: &str) -> bool {
        self.factories.write().remove(type_id).is_some()
    }

    pub fn lookup(&self, type_id: &str) -> Option<Arc<dyn ValueFactory>> {
        self.factories.read().get(type_id).cloned()
    }

    /// Create a blank instance of `type_id`
    pub fn create(&self, type_id: &str) -> Result<ValueInstance, MarshalError> {
        let factory = self
            .lookup(type_id)
            .ok_or_else(|| MarshalError::UnknownType(type_id.to_string()))?;
        let instance = factory.create_for_unmarshal();
        if instance.type_id() != type_id {
            return Err(MarshalError::FactoryMismatch {
                expected: type_id.to_string(),
                actual: instance.type_id().to_string(),
            });
        }
        Ok(instance)
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.factories.read().contains_key(type_id)
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl std::fmt::Debug for ValueFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factories = self.factories.read();
        let mut ids: Vec<_> = factories.keys().collect();
        ids.sort();
        f.debug_struct("ValueFactoryRegistry").field("types", &ids).finish()
    }
}
