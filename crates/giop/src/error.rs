//! GIOP error types

use std::io;
use thiserror::Error;

use crate::message::MessageType;

/// GIOP framing and transport errors
#[derive(Debug, Error)]
pub enum GiopError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CDR error: {0}")]
    Cdr(#[from] cdr::CdrError),

    #[error("bad GIOP magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported GIOP version {major}.{minor}")]
    VersionMismatch { major: u8, minor: u8 },

    #[error("unknown message type: {0}")]
    InvalidMessageType(u8),

    #[error("unsupported target addressing disposition: {0}")]
    UnsupportedAddressing(i16),

    #[error("invalid reply status: {0}")]
    InvalidReplyStatus(u32),

    #[error("invalid locate status: {0}")]
    InvalidLocateStatus(u32),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("peer changed byte order mid-connection")]
    ByteOrderChanged,

    #[error("fragment for unknown request {0}")]
    UnexpectedFragment(u32),

    #[error("{0:?} messages cannot be fragmented")]
    NotFragmentable(MessageType),

    #[error("fragmented message passed to decoder before reassembly")]
    UnassembledFragment,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("connection closed")]
    ConnectionClosed,
}

impl GiopError {
    /// Whether the peer broke the protocol (as opposed to the stream failing)
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, GiopError::Io(_) | GiopError::ConnectionClosed)
    }
}

/// Result type for GIOP operations
pub type Result<T> = std::result::Result<T, GiopError>;
