//! CDR stream encoder

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ByteOrder, CdrContext};

macro_rules! aligned_put {
    ($name:ident, $ty:ty, $align:expr) => {
        pub fn $name(&mut self, value: $ty) {
            self.align($align);
            self.ctx.$name(&mut self.buf, value);
        }
    };
}

/// Growable CDR output stream
///
/// Alignment is computed from `origin + bytes written`, so a body encoded
/// separately can be spliced into a message at an offset with the same
/// alignment modulo 8.
#[derive(Debug, Clone)]
pub struct CdrEncoder {
    buf: BytesMut,
    ctx: CdrContext,
    origin: usize,
}

impl CdrEncoder {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self::with_origin(byte_order, 0)
    }

    /// Create an encoder whose first byte sits at stream offset `origin`
    pub fn with_origin(byte_order: ByteOrder, origin: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            ctx: CdrContext::new(byte_order),
            origin,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.ctx.byte_order
    }

    /// Stream offset of the next byte to be written
    pub fn position(&self) -> usize {
        self.origin + self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pad with zeros up to the given boundary
    pub fn align(&mut self, alignment: usize) {
        let padding = CdrContext::align_padding(self.position(), alignment);
        self.buf.put_bytes(0, padding);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn put_octet(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    aligned_put!(put_u16, u16, 2);
    aligned_put!(put_i16, i16, 2);
    aligned_put!(put_u32, u32, 4);
    aligned_put!(put_i32, i32, 4);
    aligned_put!(put_u64, u64, 8);
    aligned_put!(put_i64, i64, 8);
    aligned_put!(put_f32, f32, 4);
    aligned_put!(put_f64, f64, 8);

    /// Write a string: length including NUL, bytes, NUL
    pub fn put_string(&mut self, value: &str) {
        self.put_u32(value.len() as u32 + 1);
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
    }

    /// Write an octet sequence: length, then raw bytes
    pub fn put_octets(&mut self, value: &[u8]) {
        self.put_u32(value.len() as u32);
        self.buf.put_slice(value);
    }

    /// Write bytes verbatim, without length or alignment
    pub fn put_raw(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    /// Write a nested encapsulation produced by `f` as an octet sequence
    pub fn put_encapsulation<F>(&mut self, f: F)
    where
        F: FnOnce(&mut CdrEncoder),
    {
        let mut inner = CdrEncoder::new(self.byte_order());
        inner.put_octet(self.byte_order().flag());
        f(&mut inner);
        self.put_octets(&inner.buf);
    }

    /// Overwrite a previously written `u32` at buffer offset `at`
    pub fn patch_u32(&mut self, at: usize, value: u32) {
        let mut bytes = [0u8; 4];
        self.ctx.put_u32(&mut &mut bytes[..], value);
        self.buf[at..at + 4].copy_from_slice(&bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}
