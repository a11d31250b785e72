//! CDR error types

use thiserror::Error;

/// CDR encoding/decoding errors
#[derive(Debug, Error)]
pub enum CdrError {
    /// Buffer underflow - not enough data
    #[error("buffer underflow: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// String without terminator or with an impossible length
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// Boolean octet other than 0 or 1
    #[error("invalid boolean octet: {0:#04x}")]
    InvalidBoolean(u8),

    /// Byte-order flag other than 0 or 1
    #[error("invalid byte order flag: {0:#04x}")]
    InvalidByteOrder(u8),

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),
}

/// Result type for CDR operations
pub type Result<T> = std::result::Result<T, CdrError>;
