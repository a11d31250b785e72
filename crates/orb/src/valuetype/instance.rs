//! Value instances and shared handles

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::descriptor::{FieldKind, ValueTypeDescriptor};
use crate::types::MarshalError;

/// Field contents
#[derive(Debug, Clone)]
pub enum FieldValue {
    Boolean(bool),
    Octet(u8),
    Short(i16),
    UShort(u16),
    Long(i32),
    ULong(u32),
    LongLong(i64),
    ULongLong(u64),
    Float(f32),
    Double(f64),
    String(String),
    Value(Option<ValueRef>),
    Sequence(Vec<FieldValue>),
}

impl FieldValue {
    /// Default contents of a fresh field
    pub fn zero(kind: &FieldKind) -> Self {
        match kind {
            FieldKind::Boolean => FieldValue::Boolean(false),
            FieldKind::Octet => FieldValue::Octet(0),
            FieldKind::Short => FieldValue::Short(0),
            FieldKind::UShort => FieldValue::UShort(0),
            FieldKind::Long => FieldValue::Long(0),
            FieldKind::ULong => FieldValue::ULong(0),
            FieldKind::LongLong => FieldValue::LongLong(0),
            FieldKind::ULongLong => FieldValue::ULongLong(0),
            FieldKind::Float => FieldValue::Float(0.0),
            FieldKind::Double => FieldValue::Double(0.0),
            FieldKind::String => FieldValue::String(String::new()),
            FieldKind::Value(_) => FieldValue::Value(None),
            FieldKind::Sequence(_) => FieldValue::Sequence(Vec::new()),
        }
    }

    /// Whether this value may be stored in a field of `kind`
    pub fn matches(&self, kind: &FieldKind) -> bool {
        match (self, kind) {
            (FieldValue::Boolean(_), FieldKind::Boolean)
            | (FieldValue::Octet(_), FieldKind::Octet)
            | (FieldValue::Short(_), FieldKind::Short)
            | (FieldValue::UShort(_), FieldKind::UShort)
            | (FieldValue::Long(_), FieldKind::Long)
            | (FieldValue::ULong(_), FieldKind::ULong)
            | (FieldValue::LongLong(_), FieldKind::LongLong)
            | (FieldValue::ULongLong(_), FieldKind::ULongLong)
            | (FieldValue::Float(_), FieldKind::Float)
            | (FieldValue::Double(_), FieldKind::Double)
            | (FieldValue::String(_), FieldKind::String) => true,
            (FieldValue::Value(None), FieldKind::Value(_)) => true,
            (FieldValue::Value(Some(value)), FieldKind::Value(declared)) => {
                value.descriptor().is_a(declared)
            }
            (FieldValue::Sequence(items), FieldKind::Sequence(element)) => {
                items.iter().all(|item| item.matches(element))
            }
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            FieldValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Nested value; `Some(None)` for a null field
    pub fn as_value(&self) -> Option<Option<&ValueRef>> {
        match self {
            FieldValue::Value(v) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Sequence(items) => Some(items),
            _ => None,
        }
    }
}

/// Structural comparison of two value graphs
///
/// Nested handles are queued instead of compared recursively. A pair of
/// instances already under comparison is assumed equal, so cycles
/// terminate and two separately built copies of a cyclic graph compare
/// equal.
#[derive(Default)]
struct GraphComparison {
    visited: HashSet<(usize, usize)>,
    pending: Vec<(ValueRef, ValueRef)>,
}

impl GraphComparison {
    fn field(&mut self, a: &FieldValue, b: &FieldValue) -> bool {
        use FieldValue::*;
        match (a, b) {
            (Boolean(a), Boolean(b)) => a == b,
            (Octet(a), Octet(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (UShort(a), UShort(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (ULong(a), ULong(b)) => a == b,
            (LongLong(a), LongLong(b)) => a == b,
            (ULongLong(a), ULongLong(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Value(None), Value(None)) => true,
            (Value(Some(a)), Value(Some(b))) => {
                self.pending.push((a.clone(), b.clone()));
                true
            }
            (Sequence(a), Sequence(b)) => self.fields(a, b),
            _ => false,
        }
    }

    fn fields(&mut self, a: &[FieldValue], b: &[FieldValue]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(a, b)| self.field(a, b))
    }

    fn instances(&mut self, a: &ValueInstance, b: &ValueInstance) -> bool {
        a.type_id() == b.type_id() && self.fields(&a.fields, &b.fields)
    }

    fn finish(mut self) -> bool {
        while let Some((a, b)) = self.pending.pop() {
            if a.ptr_eq(&b) || !self.visited.insert((a.addr(), b.addr())) {
                continue;
            }
            let (left, right) = (a.read(), b.read());
            if !self.instances(&left, &right) {
                return false;
            }
        }
        true
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        let mut graph = GraphComparison::default();
        graph.field(self, other) && graph.finish()
    }
}

macro_rules! field_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::$variant(value)
                }
            }
        )*
    };
}

field_value_from! {
    bool => Boolean,
    u8 => Octet,
    i16 => Short,
    u16 => UShort,
    i32 => Long,
    u32 => ULong,
    i64 => LongLong,
    u64 => ULongLong,
    f32 => Float,
    f64 => Double,
    String => String,
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<ValueRef> for FieldValue {
    fn from(value: ValueRef) -> Self {
        FieldValue::Value(Some(value))
    }
}

impl From<Option<ValueRef>> for FieldValue {
    fn from(value: Option<ValueRef>) -> Self {
        FieldValue::Value(value)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(items: Vec<FieldValue>) -> Self {
        FieldValue::Sequence(items)
    }
}

impl From<Vec<ValueRef>> for FieldValue {
    fn from(items: Vec<ValueRef>) -> Self {
        FieldValue::Sequence(items.into_iter().map(FieldValue::from).collect())
    }
}

/// Dynamically typed value type instance
///
/// Every field of the full inheritance chain is present from construction,
/// holding its zero value until set.
#[derive(Debug, Clone)]
pub struct ValueInstance {
    descriptor: Arc<ValueTypeDescriptor>,
    fields: Vec<FieldValue>,
}

impl ValueInstance {
    pub fn new(descriptor: Arc<ValueTypeDescriptor>) -> Self {
        let fields = descriptor
            .fields()
            .iter()
            .map(|f| FieldValue::zero(&f.kind))
            .collect();
        Self { descriptor, fields }
    }

    pub fn descriptor(&self) -> &Arc<ValueTypeDescriptor> {
        &self.descriptor
    }

    pub fn type_id(&self) -> &str {
        self.descriptor.type_id()
    }

    fn index_of(&self, name: &str) -> Result<usize, MarshalError> {
        self.descriptor
            .field_index(name)
            .ok_or_else(|| MarshalError::UnknownField {
                type_id: self.type_id().to_string(),
                field: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Result<&FieldValue, MarshalError> {
        let index = self.index_of(name)?;
        Ok(&self.fields[index])
    }

    /// Field `name` as declared by `owner`, for layouts where a subtype
    /// reuses a base field name
    pub fn get_owned(&self, owner: &str, name: &str) -> Result<&FieldValue, MarshalError> {
        let index = self
            .descriptor
            .owned_field_index(owner, name)
            .ok_or_else(|| MarshalError::UnknownField {
                type_id: self.type_id().to_string(),
                field: format!("{}::{}", owner, name),
            })?;
        Ok(&self.fields[index])
    }

    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<(), MarshalError> {
        let index = self.index_of(name)?;
        self.set_at(index, value.into())
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Result<Self, MarshalError> {
        self.set(name, value)?;
        Ok(self)
    }

    pub(crate) fn set_at(&mut self, index: usize, value: FieldValue) -> Result<(), MarshalError> {
        let field = self
            .descriptor
            .fields()
            .get(index)
            .ok_or_else(|| MarshalError::UnknownField {
                type_id: self.type_id().to_string(),
                field: format!("#{}", index),
            })?;
        if !value.matches(&field.kind) {
            return Err(match (&value, &field.kind) {
                (FieldValue::Value(Some(actual)), FieldKind::Value(declared)) => {
                    MarshalError::NotAssignable {
                        declared: declared.clone(),
                        actual: actual.type_id().to_string(),
                    }
                }
                _ => MarshalError::TypeMismatch {
                    field: field.name.clone(),
                    expected: field.kind.to_string(),
                },
            });
        }
        self.fields[index] = value;
        Ok(())
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, MarshalError> {
        self.typed(name, "Boolean", FieldValue::as_bool)
    }

    pub fn get_long(&self, name: &str) -> Result<i32, MarshalError> {
        self.typed(name, "Long", FieldValue::as_i32)
    }

    pub fn get_double(&self, name: &str) -> Result<f64, MarshalError> {
        self.typed(name, "Double", FieldValue::as_f64)
    }

    pub fn get_string(&self, name: &str) -> Result<String, MarshalError> {
        self.typed(name, "String", |v| v.as_str().map(str::to_string))
    }

    pub fn get_value(&self, name: &str) -> Result<Option<ValueRef>, MarshalError> {
        self.typed(name, "value", |v| v.as_value().map(|v| v.cloned()))
    }

    pub fn get_sequence(&self, name: &str) -> Result<Vec<FieldValue>, MarshalError> {
        self.typed(name, "sequence", |v| v.as_sequence().map(<[FieldValue]>::to_vec))
    }

    fn typed<T>(
        &self,
        name: &str,
        expected: &str,
        f: impl FnOnce(&FieldValue) -> Option<T>,
    ) -> Result<T, MarshalError> {
        f(self.get(name)?).ok_or_else(|| MarshalError::TypeMismatch {
            field: name.to_string(),
            expected: expected.to_string(),
        })
    }

    /// Field values in wire order
    pub fn values(&self) -> &[FieldValue] {
        &self.fields
    }

    /// (name, value) pairs in wire order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.descriptor
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.fields.iter())
    }

    pub fn into_ref(self) -> ValueRef {
        ValueRef::new(self)
    }
}

/// Deep comparison of the reachable graphs, cycles included
impl PartialEq for ValueInstance {
    fn eq(&self, other: &Self) -> bool {
        let mut graph = GraphComparison::default();
        graph.instances(self, other) && graph.finish()
    }
}

struct Shared {
    descriptor: Arc<ValueTypeDescriptor>,
    instance: RwLock<ValueInstance>,
}

/// Shared handle to a value instance
///
/// Clones alias the same instance; marshalling preserves that aliasing
/// within one message.
#[derive(Clone)]
pub struct ValueRef(Arc<Shared>);

impl ValueRef {
    pub fn new(instance: ValueInstance) -> Self {
        Self(Arc::new(Shared {
            descriptor: Arc::clone(instance.descriptor()),
            instance: RwLock::new(instance),
        }))
    }

    pub fn descriptor(&self) -> &Arc<ValueTypeDescriptor> {
        &self.0.descriptor
    }

    pub fn type_id(&self) -> &str {
        self.0.descriptor.type_id()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ValueInstance> {
        self.0.instance.read_recursive()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ValueInstance> {
        self.0.instance.write()
    }

    /// Whether both handles point at the same instance
    pub fn ptr_eq(&self, other: &ValueRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity key used by the marshaller's sharing table
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for ValueRef {
    fn eq(&self, other: &Self) -> bool {
        let mut graph = GraphComparison::default();
        graph.pending.push((self.clone(), other.clone()));
        graph.finish()
    }
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueRef({}@{:#x})", self.type_id(), self.addr())
    }
}
