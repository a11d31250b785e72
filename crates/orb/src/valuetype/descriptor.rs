//! Value type descriptors

use std::fmt;
use std::sync::Arc;

use crate::types::MarshalError;

/// Kind of a value type field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Boolean,
    Octet,
    Short,
    UShort,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    String,
    /// Nested value of the given declared type (or any subtype), nullable
    Value(String),
    /// Unbounded sequence; value elements share the message's indirection
    /// tables, so repeated elements stay aliased
    Sequence(Box<FieldKind>),
}

impl FieldKind {
    pub fn sequence_of(element: FieldKind) -> Self {
        FieldKind::Sequence(Box::new(element))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Value(type_id) => write!(f, "value {}", type_id),
            FieldKind::Sequence(element) => write!(f, "sequence<{}>", element),
            other => write!(f, "{:?}", other),
        }
    }
}

/// One entry of the flattened field list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Type id of the value type that declared the field
    pub owner: String,
}

/// Layout of a value type including everything it inherits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTypeDescriptor {
    type_id: String,
    ancestors: Vec<String>,
    fields: Vec<FieldDescriptor>,
}

impl ValueTypeDescriptor {
    pub fn builder(type_id: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            type_id: type_id.into(),
            bases: Vec::new(),
            own: Vec::new(),
        }
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// Every ancestor type id, most-base first, excluding this type
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// All fields in wire order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Whether an instance of this type may stand in for `type_id`
    pub fn is_a(&self, type_id: &str) -> bool {
        self.type_id == type_id || self.ancestors.iter().any(|a| a == type_id)
    }

    /// Index of the first field called `name`
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Index of the field `name` declared by `owner`
    pub fn owned_field_index(&self, owner: &str, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.owner == owner && f.name == name)
    }
}

/// Builds a [`ValueTypeDescriptor`] from bases and own fields
#[derive(Debug)]
pub struct DescriptorBuilder {
    type_id: String,
    bases: Vec<Arc<ValueTypeDescriptor>>,
    own: Vec<(String, FieldKind)>,
}

impl DescriptorBuilder {
    /// Inherit from `base`; may be called more than once
    pub fn inherits(mut self, base: &Arc<ValueTypeDescriptor>) -> Self {
        self.bases.push(Arc::clone(base));
        self
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.own.push((name.into(), kind));
        self
    }

    /// Flatten the bases and own fields
    ///
    /// When two bases share an ancestor, its fields appear once, at the
    /// position of their first occurrence.
    pub fn build(self) -> Result<Arc<ValueTypeDescriptor>, MarshalError> {
        if self.type_id.is_empty() {
            return Err(MarshalError::InvalidDescriptor("empty type id".into()));
        }

        let mut ancestors: Vec<String> = Vec::new();
        let mut fields: Vec<FieldDescriptor> = Vec::new();

        for base in &self.bases {
            if base.is_a(&self.type_id) {
                return Err(MarshalError::InvalidDescriptor(format!(
                    "{} cannot inherit from itself",
                    self.type_id
                )));
            }
            for id in base.ancestors.iter().chain(std::iter::once(&base.type_id)) {
                if !ancestors.contains(id) {
                    ancestors.push(id.clone());
                }
            }
            for field in &base.fields {
                if !fields
                    .iter()
                    .any(|f| f.owner == field.owner && f.name == field.name)
                {
                    fields.push(field.clone());
                }
            }
        }

        for (name, kind) in self.own {
            if fields.iter().any(|f| f.owner == self.type_id && f.name == name) {
                return Err(MarshalError::InvalidDescriptor(format!(
                    "{} declares field {} twice",
                    self.type_id, name
                )));
            }
            fields.push(FieldDescriptor {
                name,
                kind,
                owner: self.type_id.clone(),
            });
        }

        Ok(Arc::new(ValueTypeDescriptor {
            type_id: self.type_id,
            ancestors,
            fields,
        }))
    }
}
