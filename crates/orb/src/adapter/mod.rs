//! Object adapters
//!
//! An adapter owns a table of activation ids mapped to servants and a
//! policy set fixed at creation. Object keys name the adapter and the
//! activation id:
//!
//! ```text
//! RootPOA servants:   <activation id>
//! other adapters:     <adapter name>/<activation id>
//! ```
//!
//! The [`AdapterRegistry`] routes inbound requests by object key, answers
//! the built-in `_is_a` and `_non_existent` operations, and converts
//! servant results into reply bodies.

mod dispatcher;
mod object_adapter;
mod servant;

pub use dispatcher::AdapterRegistry;
pub(crate) use dispatcher::{InboundRequest, Origin};
pub use object_adapter::{ActivationId, ObjectAdapter, Policy, PolicySet, ROOT_ADAPTER};
pub use servant::{CallContext, Servant};
