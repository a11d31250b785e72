//! Naming service
//!
//! A flat naming context: compound names are keys in one table, not
//! paths through nested contexts. The context is an ordinary servant
//! (`IDL:omg.org/CosNaming/NamingContext:1.0`) so remote ORBs reach it
//! through `corbaname:` locators.
//!
//! Wire forms:
//!
//! ```text
//! Name          sequence<{ id: string, kind: string }>
//! bind          (Name, Object) -> void      raises AlreadyBound, InvalidName
//! rebind        (Name, Object) -> void      raises InvalidName
//! resolve       (Name) -> Object            raises NotFound, InvalidName
//! unbind        (Name) -> void              raises NotFound, InvalidName
//! list          () -> sequence<{ Name, Object }>
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cdr::{CdrDecoder, CdrEncoder};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::adapter::{CallContext, Servant};
use crate::marshal::{Marshaller, Unmarshaller};
use crate::orb::Orb;
use crate::types::{MarshalError, ObjectReference, OrbError, Result, UserException};

pub const NAMING_CONTEXT_TYPE_ID: &str = "IDL:omg.org/CosNaming/NamingContext:1.0";

/// Object key of the naming context started by [`Orb::start_naming_service`]
pub const NAMING_SERVICE_KEY: &str = "NameService";

pub const NOT_FOUND_EXCEPTION_ID: &str = "IDL:omg.org/CosNaming/NamingContext/NotFound:1.0";
pub const ALREADY_BOUND_EXCEPTION_ID: &str = "IDL:omg.org/CosNaming/NamingContext/AlreadyBound:1.0";
pub const INVALID_NAME_EXCEPTION_ID: &str = "IDL:omg.org/CosNaming/NamingContext/InvalidName:1.0";

/// One `id.kind` component of a name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameComponent {
    pub id: String,
    pub kind: String,
}

impl NameComponent {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

/// Compound name in stringified form `a.kind/b/c.kind`
///
/// `\` escapes `.`, `/` and itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(pub Vec<NameComponent>);

impl Name {
    pub fn components(&self) -> &[NameComponent] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self, enc: &mut CdrEncoder) {
        enc.put_u32(self.0.len() as u32);
        for component in &self.0 {
            enc.put_string(&component.id);
            enc.put_string(&component.kind);
        }
    }

    pub fn decode(dec: &mut CdrDecoder) -> std::result::Result<Self, MarshalError> {
        let count = dec.get_u32()? as usize;
        // each component is at least two 5-byte strings
        if count > dec.remaining() / 10 {
            return Err(MarshalError::Cdr(cdr::CdrError::BufferUnderflow {
                needed: count * 10,
                have: dec.remaining(),
            }));
        }
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            let id = dec.get_string()?;
            let kind = dec.get_string()?;
            components.push(NameComponent { id, kind });
        }
        Ok(Name(components))
    }
}

fn escape(s: &str, out: &mut String) {
    for c in s.chars() {
        if matches!(c, '.' | '/' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            escape(&component.id, &mut out);
            if !component.kind.is_empty() {
                out.push('.');
                escape(&component.kind, &mut out);
            }
        }
        f.write_str(&out)
    }
}

impl FromStr for Name {
    type Err = OrbError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| OrbError::InvalidLocator(format!("{}: {:?}", reason, s));
        if s.is_empty() {
            return Err(invalid("empty name"));
        }

        let mut components = Vec::new();
        let mut id = String::new();
        let mut kind: Option<String> = None;
        let mut chars = s.chars();

        loop {
            let c = chars.next();
            match c {
                Some('\\') => {
                    let escaped = chars.next().ok_or_else(|| invalid("trailing escape"))?;
                    kind.as_mut().unwrap_or(&mut id).push(escaped);
                }
                Some('.') if kind.is_none() => kind = Some(String::new()),
                Some('.') => return Err(invalid("more than one '.' in a component")),
                Some('/') | None => {
                    let kind = kind.take().unwrap_or_default();
                    if id.is_empty() && kind.is_empty() {
                        return Err(invalid("empty name component"));
                    }
                    components.push(NameComponent {
                        id: std::mem::take(&mut id),
                        kind,
                    });
                    if c.is_none() {
                        break;
                    }
                }
                Some(other) => kind.as_mut().unwrap_or(&mut id).push(other),
            }
        }
        Ok(Name(components))
    }
}

fn name_error(id: &str, name: &Name) -> OrbError {
    OrbError::Application(UserException::new(id, name.to_string()))
}

/// In-memory naming context servant
#[derive(Debug, Default)]
pub struct NamingContext {
    bindings: RwLock<BTreeMap<Name, ObjectReference>>,
}

impl NamingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, name: Name, object: ObjectReference) -> Result<()> {
        if name.is_empty() {
            return Err(name_error(INVALID_NAME_EXCEPTION_ID, &name));
        }
        let mut bindings = self.bindings.write();
        if bindings.contains_key(&name) {
            return Err(name_error(ALREADY_BOUND_EXCEPTION_ID, &name));
        }
        debug!("Binding {} to {}", name, object);
        bindings.insert(name, object);
        Ok(())
    }

    pub fn rebind(&self, name: Name, object: ObjectReference) -> Result<()> {
        if name.is_empty() {
            return Err(name_error(INVALID_NAME_EXCEPTION_ID, &name));
        }
        debug!("Rebinding {} to {}", name, object);
        self.bindings.write().insert(name, object);
        Ok(())
    }

    pub fn resolve(&self, name: &Name) -> Result<ObjectReference> {
        self.bindings
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| name_error(NOT_FOUND_EXCEPTION_ID, name))
    }

    pub fn unbind(&self, name: &Name) -> Result<()> {
        self.bindings
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| name_error(NOT_FOUND_EXCEPTION_ID, name))
    }

    pub fn list(&self) -> Vec<(Name, ObjectReference)> {
        self.bindings
            .read()
            .iter()
            .map(|(name, object)| (name.clone(), object.clone()))
            .collect()
    }
}

fn read_object(args: &mut Unmarshaller) -> Result<ObjectReference> {
    args.read_object()?
        .ok_or_else(|| OrbError::Marshalling(MarshalError::InvalidObjectReference("nil object".into())))
}

#[async_trait]
impl Servant for NamingContext {
    fn type_id(&self) -> &str {
        NAMING_CONTEXT_TYPE_ID
    }

    async fn invoke(
        &self,
        operation: &str,
        args: &mut Unmarshaller,
        reply: &mut Marshaller,
        _ctx: &CallContext,
    ) -> Result<()> {
        match operation {
            "bind" => {
                let name = Name::decode(args)?;
                self.bind(name, read_object(args)?)
            }
            "rebind" => {
                let name = Name::decode(args)?;
                self.rebind(name, read_object(args)?)
            }
            "resolve" => {
                let object = self.resolve(&Name::decode(args)?)?;
                reply.write_object(Some(&object));
                Ok(())
            }
            "unbind" => self.unbind(&Name::decode(args)?),
            "list" => {
                let bindings = self.list();
                reply.put_u32(bindings.len() as u32);
                for (name, object) in &bindings {
                    name.encode(reply);
                    reply.write_object(Some(object));
                }
                Ok(())
            }
            other => Err(OrbError::UnknownOperation(other.to_string())),
        }
    }
}

/// Client side of a (possibly remote) naming context
#[derive(Debug, Clone)]
pub struct NamingContextClient {
    orb: Orb,
    reference: ObjectReference,
}

impl NamingContextClient {
    pub fn new(orb: Orb, reference: ObjectReference) -> Self {
        Self { orb, reference }
    }

    pub fn reference(&self) -> &ObjectReference {
        &self.reference
    }

    async fn call(&self, operation: &str, args: Marshaller) -> Result<Unmarshaller> {
        self.orb
            .invoke(&self.reference, operation, args)
            .await?
            .into_result()
    }

    async fn call_named(&self, operation: &str, name: &Name, object: Option<&ObjectReference>) -> Result<Unmarshaller> {
        let mut args = self.orb.marshaller();
        name.encode(&mut args);
        if let Some(object) = object {
            args.write_object(Some(object));
        }
        match self.call(operation, args).await {
            Err(OrbError::Application(ex)) if ex.id == NOT_FOUND_EXCEPTION_ID => {
                Err(OrbError::NotFound(name.to_string()))
            }
            other => other,
        }
    }

    pub async fn bind(&self, name: &Name, object: &ObjectReference) -> Result<()> {
        self.call_named("bind", name, Some(object)).await.map(|_| ())
    }

    pub async fn rebind(&self, name: &Name, object: &ObjectReference) -> Result<()> {
        self.call_named("rebind", name, Some(object)).await.map(|_| ())
    }

    /// Resolve `name`; an unbound name fails with `OrbError::NotFound`
    pub async fn resolve(&self, name: &Name) -> Result<ObjectReference> {
        let mut results = self.call_named("resolve", name, None).await?;
        read_object(&mut results)
    }

    pub async fn unbind(&self, name: &Name) -> Result<()> {
        self.call_named("unbind", name, None).await.map(|_| ())
    }

    pub async fn list(&self) -> Result<Vec<(Name, ObjectReference)>> {
        let mut results = self.call("list", self.orb.marshaller()).await?;
        let count = results.get_u32()? as usize;
        let mut bindings = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let name = Name::decode(&mut results)?;
            bindings.push((name, read_object(&mut results)?));
        }
        Ok(bindings)
    }
}

/// Naming context hosted by this ORB, if started
#[derive(Debug, Default)]
pub(crate) struct LocalNaming(Mutex<Option<Arc<NamingContext>>>);

impl LocalNaming {
    fn get(&self) -> Option<Arc<NamingContext>> {
        self.0.lock().clone()
    }
}

impl Orb {
    /// Activate a naming context under the object key `NameService`
    ///
    /// Start it after [`Orb::listen`] so the references it hands out carry
    /// the listen endpoint.
    pub fn start_naming_service(&self) -> Result<ObjectReference> {
        let root = self.root_adapter();
        let naming = self.local_naming();
        let mut slot = naming.0.lock();
        if slot.is_some() {
            return Err(OrbError::Adapter("naming service already started".into()));
        }
        let context = Arc::new(NamingContext::new());
        let id = root.activate_with_id(NAMING_SERVICE_KEY, Arc::clone(&context) as Arc<dyn Servant>)?;
        *slot = Some(context);
        let reference = root.reference(&id)?;
        info!("Naming service at {}", reference.to_corbaloc());
        Ok(reference)
    }

    /// The naming context started on this ORB
    pub fn naming_context(&self) -> Option<Arc<NamingContext>> {
        self.local_naming().get()
    }

    /// Activate `servant` in the root adapter and bind it in the local
    /// naming context, replacing any earlier binding
    pub fn bind(&self, name: &str, servant: Arc<dyn Servant>) -> Result<ObjectReference> {
        let context = self
            .naming_context()
            .ok_or_else(|| OrbError::Adapter("naming service not started".into()))?;
        let name: Name = name.parse()?;
        let root = self.root_adapter();
        let id = root.activate(servant)?;
        let reference = root.reference(&id)?;
        context.rebind(name, reference.clone())?;
        Ok(reference)
    }
}
