//! Reference resolution and narrowing

use bytes::Bytes;
use tracing::debug;

use crate::naming::{Name, NamingContextClient, NAMING_CONTEXT_TYPE_ID};
use crate::orb::Orb;
use crate::types::{IiopAddress, Locality, Locator, ObjectReference, OrbError, Result, OBJECT_TYPE_ID};

impl Orb {
    /// Resolve a `corbaloc:`, `corbaname:` or `IOR:` string
    pub async fn resolve(&self, locator: &str) -> Result<ObjectReference> {
        let locator = Locator::parse(locator)?;
        self.resolve_locator(&locator).await
    }

    pub async fn resolve_locator(&self, locator: &Locator) -> Result<ObjectReference> {
        self.ensure_running()?;
        match locator {
            Locator::Direct {
                addresses,
                object_key,
            } => self.reference_at(addresses, object_key, OBJECT_TYPE_ID).await,
            Locator::Named {
                addresses,
                naming_key,
                name,
            } => {
                let context = self
                    .reference_at(addresses, naming_key, NAMING_CONTEXT_TYPE_ID)
                    .await?;
                if name.is_empty() {
                    return Ok(context);
                }
                let name: Name = name.parse()?;
                NamingContextClient::new(self.clone(), context)
                    .resolve(&name)
                    .await
            }
            Locator::Ior(reference) => Ok(self.localize(reference.clone())),
        }
    }

    /// First address that is this ORB or accepts a connection
    async fn reference_at(&self, addresses: &[IiopAddress], key: &Bytes, type_id: &str) -> Result<ObjectReference> {
        let own = self.endpoint();
        let mut last_error = None;

        for address in addresses {
            if address.endpoint == own {
                return Ok(ObjectReference::local(type_id, own, key.clone()));
            }
            match self.connections().connect(self, &address.endpoint).await {
                Ok(_) => return Ok(ObjectReference::new(type_id, address.endpoint.clone(), key.clone())),
                Err(e) => {
                    debug!("{} not usable: {}", address.endpoint, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| OrbError::InvalidLocator("no addresses".into())))
    }

    fn localize(&self, reference: ObjectReference) -> ObjectReference {
        if reference.endpoint() == &self.endpoint() {
            reference.with_locality(Locality::Local)
        } else {
            reference
        }
    }

    /// Re-tag `reference` as `type_id` if the object implements it
    ///
    /// Returns `None`, not an error, when it does not.
    pub async fn narrow(&self, reference: &ObjectReference, type_id: &str) -> Result<Option<ObjectReference>> {
        if type_id == OBJECT_TYPE_ID {
            return Ok(Some(reference.clone()));
        }
        if reference.type_id() == type_id {
            return Ok(Some(reference.narrowed(type_id)));
        }

        let mut args = self.marshaller();
        args.put_string(type_id);
        let mut results = self.invoke(reference, "_is_a", args).await?.into_result()?;
        if results.get_bool()? {
            Ok(Some(reference.narrowed(type_id)))
        } else {
            debug!("{} is not a {}", reference, type_id);
            Ok(None)
        }
    }

    /// Whether the target's ORB no longer has the object
    pub async fn non_existent(&self, reference: &ObjectReference) -> Result<bool> {
        let mut results = self
            .invoke(reference, "_non_existent", self.marshaller())
            .await?
            .into_result()?;
        Ok(results.get_bool()?)
    }

    /// Stringified IOR of `reference`
    pub fn object_to_string(&self, reference: &ObjectReference) -> String {
        reference.to_ior_string()
    }

    /// Inverse of [`object_to_string`](Self::object_to_string); accepts any locator
    pub async fn string_to_object(&self, s: &str) -> Result<ObjectReference> {
        self.resolve(s).await
    }
}
