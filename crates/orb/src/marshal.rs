//! Argument marshalling with value type and object reference support
//!
//! Values use the GIOP value encoding restricted to what this broker
//! produces:
//!
//! ```text
//! null         u32 0
//! new value    u32 0x7fffff02 | repository id | fields, most-base first
//! shared value u32 0xffffffff | i32 offset back to the earlier tag
//! ```
//!
//! A repository id already written in the same message is replaced by the
//! same indirection form. Offsets are relative to the offset field itself.
//! Incoming values may also carry a codebase URL (bit 0x01), which is
//! read and ignored. Chunked values and truncatable id lists are rejected.
//!
//! Sequence fields are a ulong count followed by the elements. Value
//! elements use the same indirection tables as the rest of the body.
//!
//! Both directions stop at `max_depth` nested values, failing with
//! [`MarshalError::DepthExceeded`] instead of recursing further.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;
use cdr::{ByteOrder, CdrDecoder, CdrEncoder};

use crate::types::{Endpoint, Locality, MarshalError, ObjectReference};
use crate::valuetype::{FieldKind, FieldValue, ValueFactoryRegistry, ValueRef};

/// Tag of a null value
pub const NULL_TAG: u32 = 0;
/// Tag introducing an indirection
pub const INDIRECTION_TAG: u32 = 0xffff_ffff;
/// Tag of a value carrying one repository id
pub const SINGLE_ID_TAG: u32 = 0x7fff_ff02;

const VALUE_TAG_MIN: u32 = 0x7fff_ff00;
const CODEBASE_FLAG: u32 = 0x01;
const TYPE_INFO_MASK: u32 = 0x06;
const SINGLE_ID: u32 = 0x02;
const CHUNKED_FLAG: u32 = 0x08;

/// Default limit on nested values per direction
pub const DEFAULT_MAX_VALUE_DEPTH: usize = 512;

type MarshalResult<T> = std::result::Result<T, MarshalError>;

/// Output stream for one request or reply body
pub struct Marshaller {
    enc: CdrEncoder,
    instances: HashMap<usize, usize>,
    repo_ids: HashMap<String, usize>,
    depth: usize,
    max_depth: usize,
}

impl Marshaller {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            enc: CdrEncoder::new(byte_order),
            instances: HashMap::new(),
            repo_ids: HashMap::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_VALUE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn put_indirection(&mut self, target: usize) {
        self.enc.put_u32(INDIRECTION_TAG);
        self.enc.align(4);
        let at = self.enc.position();
        self.enc.put_i32(target as i32 - at as i32);
    }

    fn put_repository_id(&mut self, type_id: &str) {
        if let Some(&at) = self.repo_ids.get(type_id) {
            self.put_indirection(at);
            return;
        }
        self.enc.align(4);
        self.repo_ids.insert(type_id.to_string(), self.enc.position());
        self.enc.put_string(type_id);
    }

    /// Write a possibly null value; an instance written earlier in this
    /// body is sent as an indirection
    pub fn write_value(&mut self, value: Option<&ValueRef>) -> MarshalResult<()> {
        let value = match value {
            Some(value) => value,
            None => {
                self.enc.put_u32(NULL_TAG);
                return Ok(());
            }
        };

        if let Some(&at) = self.instances.get(&value.addr()) {
            self.put_indirection(at);
            return Ok(());
        }
        if self.depth >= self.max_depth {
            return Err(MarshalError::DepthExceeded(self.max_depth));
        }

        self.enc.align(4);
        self.instances.insert(value.addr(), self.enc.position());
        self.enc.put_u32(SINGLE_ID_TAG);
        self.put_repository_id(value.type_id());

        // Snapshot so nested writes never hold the instance lock
        let fields: Vec<FieldValue> = value.read().values().to_vec();
        self.depth += 1;
        let written = fields.iter().try_for_each(|field| self.write_field(field));
        self.depth -= 1;
        written
    }

    fn write_field(&mut self, value: &FieldValue) -> MarshalResult<()> {
        match value {
            FieldValue::Boolean(v) => self.enc.put_bool(*v),
            FieldValue::Octet(v) => self.enc.put_octet(*v),
            FieldValue::Short(v) => self.enc.put_i16(*v),
            FieldValue::UShort(v) => self.enc.put_u16(*v),
            FieldValue::Long(v) => self.enc.put_i32(*v),
            FieldValue::ULong(v) => self.enc.put_u32(*v),
            FieldValue::LongLong(v) => self.enc.put_i64(*v),
            FieldValue::ULongLong(v) => self.enc.put_u64(*v),
            FieldValue::Float(v) => self.enc.put_f32(*v),
            FieldValue::Double(v) => self.enc.put_f64(*v),
            FieldValue::String(v) => self.enc.put_string(v),
            FieldValue::Value(v) => return self.write_value(v.as_ref()),
            FieldValue::Sequence(items) => {
                self.enc.put_u32(items.len() as u32);
                return items.iter().try_for_each(|item| self.write_field(item));
            }
        }
        Ok(())
    }

    /// Write a possibly nil object reference as an IOR
    pub fn write_object(&mut self, object: Option<&ObjectReference>) {
        match object {
            Some(object) => object.encode(&mut self.enc),
            None => ObjectReference::encode_nil(&mut self.enc),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.enc.into_bytes()
    }
}

impl Deref for Marshaller {
    type Target = CdrEncoder;

    fn deref(&self) -> &CdrEncoder {
        &self.enc
    }
}

impl DerefMut for Marshaller {
    fn deref_mut(&mut self) -> &mut CdrEncoder {
        &mut self.enc
    }
}

impl fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marshaller")
            .field("len", &self.enc.len())
            .field("values", &self.instances.len())
            .finish()
    }
}

/// Input stream over one request or reply body
pub struct Unmarshaller {
    dec: CdrDecoder,
    registry: Arc<ValueFactoryRegistry>,
    local_endpoint: Option<Endpoint>,
    instances: HashMap<usize, ValueRef>,
    repo_ids: HashMap<usize, String>,
    depth: usize,
    max_depth: usize,
}

impl Unmarshaller {
    pub fn new(body: Bytes, byte_order: ByteOrder, registry: Arc<ValueFactoryRegistry>) -> Self {
        Self {
            dec: CdrDecoder::new(body, byte_order),
            registry,
            local_endpoint: None,
            instances: HashMap::new(),
            repo_ids: HashMap::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_VALUE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// References to `endpoint` are unmarshalled as local
    pub(crate) fn with_local_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.local_endpoint = Some(endpoint);
        self
    }

    fn read_indirection(&mut self) -> MarshalResult<usize> {
        self.dec.align(4)?;
        let at = self.dec.position() as i64;
        let target = at + i64::from(self.dec.get_i32()?);
        if target < 0 {
            return Err(MarshalError::DanglingIndirection(target));
        }
        Ok(target as usize)
    }

    fn read_repository_id(&mut self) -> MarshalResult<String> {
        if self.dec.peek_u32()? == INDIRECTION_TAG {
            self.dec.get_u32()?;
            let target = self.read_indirection()?;
            return self
                .repo_ids
                .get(&target)
                .cloned()
                .ok_or(MarshalError::DanglingIndirection(target as i64));
        }
        let at = self.dec.position();
        let id = self.dec.get_string()?;
        self.repo_ids.insert(at, id.clone());
        Ok(id)
    }

    /// Read a possibly null value of any registered type
    pub fn read_value(&mut self) -> MarshalResult<Option<ValueRef>> {
        self.dec.align(4)?;
        let tag_at = self.dec.position();
        let tag = self.dec.get_u32()?;

        match tag {
            NULL_TAG => return Ok(None),
            INDIRECTION_TAG => {
                let target = self.read_indirection()?;
                return self
                    .instances
                    .get(&target)
                    .cloned()
                    .map(Some)
                    .ok_or(MarshalError::DanglingIndirection(target as i64));
            }
            _ => {}
        }

        if tag < VALUE_TAG_MIN || tag & CHUNKED_FLAG != 0 || tag & TYPE_INFO_MASK != SINGLE_ID {
            return Err(MarshalError::UnsupportedValueTag(tag));
        }
        if self.depth >= self.max_depth {
            return Err(MarshalError::DepthExceeded(self.max_depth));
        }
        if tag & CODEBASE_FLAG != 0 {
            // codebase URL, same encoding as a repository id
            self.read_repository_id()?;
        }

        let type_id = self.read_repository_id()?;
        let value = self.registry.create(&type_id)?.into_ref();
        self.instances.insert(tag_at, value.clone());

        self.depth += 1;
        let filled = self.read_fields(&value);
        self.depth -= 1;
        filled.map(|()| Some(value))
    }

    fn read_fields(&mut self, value: &ValueRef) -> MarshalResult<()> {
        let descriptor = Arc::clone(value.descriptor());
        for (index, field) in descriptor.fields().iter().enumerate() {
            let field_value = self.read_field(&field.kind)?;
            value.write().set_at(index, field_value)?;
        }
        Ok(())
    }

    /// Read a value that must be `declared` or one of its subtypes
    pub fn read_value_as(&mut self, declared: &str) -> MarshalResult<Option<ValueRef>> {
        let value = self.read_value()?;
        if let Some(value) = &value {
            if !value.descriptor().is_a(declared) {
                return Err(MarshalError::NotAssignable {
                    declared: declared.to_string(),
                    actual: value.type_id().to_string(),
                });
            }
        }
        Ok(value)
    }

    fn read_field(&mut self, kind: &FieldKind) -> MarshalResult<FieldValue> {
        let value = match kind {
            FieldKind::Boolean => FieldValue::Boolean(self.dec.get_bool()?),
            FieldKind::Octet => FieldValue::Octet(self.dec.get_octet()?),
            FieldKind::Short => FieldValue::Short(self.dec.get_i16()?),
            FieldKind::UShort => FieldValue::UShort(self.dec.get_u16()?),
            FieldKind::Long => FieldValue::Long(self.dec.get_i32()?),
            FieldKind::ULong => FieldValue::ULong(self.dec.get_u32()?),
            FieldKind::LongLong => FieldValue::LongLong(self.dec.get_i64()?),
            FieldKind::ULongLong => FieldValue::ULongLong(self.dec.get_u64()?),
            FieldKind::Float => FieldValue::Float(self.dec.get_f32()?),
            FieldKind::Double => FieldValue::Double(self.dec.get_f64()?),
            FieldKind::String => FieldValue::String(self.dec.get_string()?),
            FieldKind::Value(declared) => FieldValue::Value(self.read_value_as(declared)?),
            FieldKind::Sequence(element) => {
                let count = self.dec.get_u32()?;
                // every element occupies at least one octet
                if count as usize > self.dec.remaining() {
                    return Err(MarshalError::SequenceTooLong(count));
                }
                let items = (0..count)
                    .map(|_| self.read_field(element))
                    .collect::<MarshalResult<Vec<_>>>()?;
                FieldValue::Sequence(items)
            }
        };
        Ok(value)
    }

    /// Read a possibly nil object reference
    pub fn read_object(&mut self) -> MarshalResult<Option<ObjectReference>> {
        let object = ObjectReference::decode(&mut self.dec)?;
        Ok(object.map(|object| match &self.local_endpoint {
            Some(local) if object.endpoint() == local => object.with_locality(Locality::Local),
            _ => object,
        }))
    }

    pub fn registry(&self) -> &Arc<ValueFactoryRegistry> {
        &self.registry
    }
}

impl Deref for Unmarshaller {
    type Target = CdrDecoder;

    fn deref(&self) -> &CdrDecoder {
        &self.dec
    }
}

impl DerefMut for Unmarshaller {
    fn deref_mut(&mut self) -> &mut CdrDecoder {
        &mut self.dec
    }
}

impl fmt::Debug for Unmarshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unmarshaller")
            .field("position", &self.dec.position())
            .field("remaining", &self.dec.remaining())
            .finish()
    }
}
