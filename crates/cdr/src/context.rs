//! CDR byte order and primitive helpers
//!
//! The context knows the byte order of a stream and how to pad it; the
//! encoder and decoder track positions and call into it.

use bytes::{Buf, BufMut};

use crate::{CdrError, Result};

/// Byte order announced by the sender of a CDR stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// Byte order of the running host
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    /// Parse the flag octet used by GIOP headers and encapsulations
    pub fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            0 => Ok(ByteOrder::BigEndian),
            1 => Ok(ByteOrder::LittleEndian),
            other => Err(CdrError::InvalidByteOrder(other)),
        }
    }

    /// Flag octet for this byte order
    pub fn flag(self) -> u8 {
        match self {
            ByteOrder::BigEndian => 0,
            ByteOrder::LittleEndian => 1,
        }
    }

    pub fn is_little_endian(self) -> bool {
        self == ByteOrder::LittleEndian
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::native()
    }
}

macro_rules! cdr_primitive {
    ($put:ident, $put_le:ident, $get:ident, $get_le:ident, $ty:ty) => {
        #[inline]
        pub fn $put<B: BufMut>(&self, buf: &mut B, value: $ty) {
            match self.byte_order {
                ByteOrder::LittleEndian => buf.$put_le(value),
                ByteOrder::BigEndian => buf.$put(value),
            }
        }

        #[inline]
        pub fn $get<B: Buf>(&self, buf: &mut B) -> $ty {
            match self.byte_order {
                ByteOrder::LittleEndian => buf.$get_le(),
                ByteOrder::BigEndian => buf.$get(),
            }
        }
    };
}

/// CDR encoding/decoding context
#[derive(Debug, Clone, Copy, Default)]
pub struct CdrContext {
    pub byte_order: ByteOrder,
}

impl CdrContext {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self { byte_order }
    }

    /// Calculate padding needed to align to the given boundary
    #[inline]
    pub fn align_padding(position: usize, alignment: usize) -> usize {
        if alignment <= 1 {
            return 0;
        }
        let remainder = position % alignment;
        if remainder == 0 {
            0
        } else {
            alignment - remainder
        }
    }

    cdr_primitive!(put_u16, put_u16_le, get_u16, get_u16_le, u16);
    cdr_primitive!(put_i16, put_i16_le, get_i16, get_i16_le, i16);
    cdr_primitive!(put_u32, put_u32_le, get_u32, get_u32_le, u32);
    cdr_primitive!(put_i32, put_i32_le, get_i32, get_i32_le, i32);
    cdr_primitive!(put_u64, put_u64_le, get_u64, get_u64_le, u64);
    cdr_primitive!(put_i64, put_i64_le, get_i64, get_i64_le, i64);
    cdr_primitive!(put_f32, put_f32_le, get_f32, get_f32_le, f32);
    cdr_primitive!(put_f64, put_f64_le, get_f64, get_f64_le, f64);
}
