//! Object request broker over GIOP 1.2
//!
//! A small broker in the CORBA mould: servants are activated in object
//! adapters, clients invoke them through object references, and value
//! types travel by value with their sharing and cycles intact.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Orb (this crate)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Resolver / Naming    │  Invocation       │  Object adapters│
//! │  - corbaloc/corbaname │  - request ids    │  - activation   │
//! │  - IOR strings        │  - reply matching │  - dispatch     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Marshalling: values (tags, indirection), object references │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Connections: initiator/acceptor, BI_DIR_IIOP, shutdown     │
//! ├─────────────────────────────────────────────────────────────┤
//! │             GIOP framing (giop) / CDR (cdr)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Bidirectional GIOP
//!
//! Once a client has an adapter with [`Policy::Bidirectional`], the first
//! request on each connection it opens advertises its endpoint. The server
//! then routes calls back to that endpoint over the same connection, so
//! callbacks work through firewalls and NAT.
//!
//! # Modules
//!
//! - [`types`]: errors, exceptions, object references and locators
//! - [`valuetype`]: value type descriptors, instances and factories
//! - [`marshal`]: argument streams
//! - [`adapter`]: object adapters and servants
//! - [`connection`]: GIOP connections and their manager
//! - [`naming`]: a flat naming context and its client

pub mod adapter;
pub mod connection;
pub mod marshal;
pub mod naming;
pub mod types;
pub mod valuetype;

mod invocation;
mod orb;
mod resolver;

pub use adapter::{ActivationId, CallContext, ObjectAdapter, Policy, PolicySet, Servant, ROOT_ADAPTER};
pub use connection::{Connection, ConnectionId, ConnectionRole, ConnectionState};
pub use invocation::Reply;
pub use marshal::{Marshaller, Unmarshaller};
pub use naming::{Name, NameComponent, NamingContext, NamingContextClient};
pub use orb::{Orb, OrbBuilder, OrbConfig, OrbStats, OrbStatsSnapshot};
pub use types::{
    CompletionStatus, Endpoint, ErrorCategory, Locator, MarshalError, ObjectReference, OrbError,
    Result, SystemException, SystemExceptionKind, UserException, OBJECT_TYPE_ID,
};
pub use valuetype::{
    FieldKind, FieldValue, ValueFactory, ValueFactoryRegistry, ValueInstance, ValueRef,
    ValueTypeDescriptor,
};

pub use cdr::ByteOrder;
