//! Value types: polymorphic data passed by value
//!
//! A value type is described by a [`ValueTypeDescriptor`]: its repository
//! id, its ancestors and one flattened field list ordered most-base first,
//! each field tagged with the type that declared it. Instances are
//! dynamically typed field vectors ([`ValueInstance`]) shared through
//! [`ValueRef`] handles so aliasing survives a round trip.
//!
//! Receivers find the concrete type of an incoming value through the
//! [`ValueFactoryRegistry`].

mod descriptor;
mod instance;
mod registry;

pub use descriptor::{DescriptorBuilder, FieldDescriptor, FieldKind, ValueTypeDescriptor};
pub use instance::{FieldValue, ValueInstance, ValueRef};
pub use registry::{DescriptorFactory, RegistrationPolicy, ValueFactory, ValueFactoryRegistry};
