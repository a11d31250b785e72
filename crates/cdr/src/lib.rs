//! CDR (Common Data Representation) runtime
//!
//! Primitive encoding shared by GIOP message headers, request/reply bodies
//! and encapsulations (IOR profiles, service contexts).
//!
//! # CDR Wire Format
//!
//! - Primitives align to their natural size (1, 2, 4, or 8 bytes), measured
//!   from the start of the enclosing stream
//! - The sender picks the byte order; the receiver adapts
//! - Strings are a `u32` length (counting the trailing NUL) followed by the
//!   bytes and the NUL
//! - Octet sequences are a `u32` length followed by the raw bytes
//! - Encapsulations are octet sequences whose first byte is a byte-order flag

mod context;
mod decoder;
mod encoder;
mod error;

pub use context::{ByteOrder, CdrContext};
pub use decoder::CdrDecoder;
pub use encoder::CdrEncoder;
pub use error::{CdrError, Result};

/// Re-export bytes for convenience
pub use bytes::{Buf, BufMut, Bytes, BytesMut};
