//! CDR stream decoder

use bytes::Bytes;

use crate::{ByteOrder, CdrContext, CdrError, Result};

macro_rules! aligned_get {
    ($name:ident, $ty:ty, $size:expr) => {
        pub fn $name(&mut self) -> Result<$ty> {
            self.align($size)?;
            self.ensure($size)?;
            let mut slice = &self.data[self.offset..];
            let value = self.ctx.$name(&mut slice);
            self.offset += $size;
            Ok(value)
        }
    };
}

/// CDR input stream over an immutable buffer
#[derive(Debug, Clone)]
pub struct CdrDecoder {
    data: Bytes,
    offset: usize,
    ctx: CdrContext,
    origin: usize,
}

impl CdrDecoder {
    pub fn new(data: Bytes, byte_order: ByteOrder) -> Self {
        Self::with_origin(data, byte_order, 0)
    }

    /// Create a decoder whose first byte sits at stream offset `origin`
    pub fn with_origin(data: Bytes, byte_order: ByteOrder, origin: usize) -> Self {
        Self {
            data,
            offset: 0,
            ctx: CdrContext::new(byte_order),
            origin,
        }
    }

    /// Open an encapsulation: the first octet selects the byte order
    pub fn encapsulation(data: Bytes) -> Result<Self> {
        let flag = *data.first().ok_or(CdrError::BufferUnderflow { needed: 1, have: 0 })?;
        let mut dec = Self::new(data, ByteOrder::from_flag(flag)?);
        dec.offset = 1;
        Ok(dec)
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.ctx.byte_order
    }

    /// Stream offset of the next byte to be read
    pub fn position(&self) -> usize {
        self.origin + self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(CdrError::BufferUnderflow {
                needed,
                have: self.remaining(),
            });
        }
        Ok(())
    }

    /// Skip padding up to the given boundary
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = CdrContext::align_padding(self.position(), alignment);
        self.ensure(padding)?;
        self.offset += padding;
        Ok(())
    }

    pub fn get_octet(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let value = self.data[self.offset];
        self.offset += 1;
        Ok(value)
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        match self.get_octet()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CdrError::InvalidBoolean(other)),
        }
    }

    aligned_get!(get_u16, u16, 2);
    aligned_get!(get_i16, i16, 2);
    aligned_get!(get_u32, u32, 4);
    aligned_get!(get_i32, i32, 4);
    aligned_get!(get_u64, u64, 8);
    aligned_get!(get_i64, i64, 8);
    aligned_get!(get_f32, f32, 4);
    aligned_get!(get_f64, f64, 8);

    /// Look at the next aligned `u32` without consuming it
    pub fn peek_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        self.ensure(4)?;
        let mut slice = &self.data[self.offset..];
        Ok(self.ctx.get_u32(&mut slice))
    }

    pub fn get_string(&mut self) -> Result<String> {
        let len = self.get_u32()? as usize;
        if len == 0 {
            return Err(CdrError::InvalidString("zero length".into()));
        }
        self.ensure(len)?;
        let raw = &self.data[self.offset..self.offset + len];
        if raw[len - 1] != 0 {
            return Err(CdrError::InvalidString("missing NUL terminator".into()));
        }
        let value = String::from_utf8(raw[..len - 1].to_vec())?;
        self.offset += len;
        Ok(value)
    }

    pub fn get_octets(&mut self) -> Result<Bytes> {
        let len = self.get_u32()? as usize;
        self.get_raw(len)
    }

    /// Take `len` bytes verbatim
    pub fn get_raw(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        let value = self.data.slice(self.offset..self.offset + len);
        self.offset += len;
        Ok(value)
    }

    /// Take everything left in the buffer
    pub fn rest(&mut self) -> Bytes {
        let value = self.data.slice(self.offset..);
        self.offset = self.data.len();
        value
    }
}
