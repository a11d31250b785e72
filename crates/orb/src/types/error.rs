//! Broker error types

use std::io;

use thiserror::Error;

use super::exception::{minor, CompletionStatus, SystemException, SystemExceptionKind, UserException};
use super::objref::Endpoint;

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, OrbError>;

/// How a failure propagates
///
/// - `Transient`: no route, refused, reset; the caller may retry
/// - `SystemFailure`: protocol violation; the connection is torn down
/// - `Marshalling`: only the failing request is affected
/// - `Application`: the operation itself raised a user exception
/// - `Cancelled`: local shutdown or timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    SystemFailure,
    Marshalling,
    Application,
    Cancelled,
}

/// Value type and argument marshalling errors
#[derive(Error, Debug)]
pub enum MarshalError {
    /// No factory registered for the received type id
    #[error("no value factory registered for {0}")]
    UnknownType(String),

    /// A factory is already registered for this type id
    #[error("value factory already registered for {0}")]
    DuplicateRegistration(String),

    /// A factory produced an instance of a different type
    #[error("factory for {expected} produced an instance of {actual}")]
    FactoryMismatch { expected: String, actual: String },

    #[error("value type {type_id} has no field {field}")]
    UnknownField { type_id: String, field: String },

    #[error("field {field} expects {expected}")]
    TypeMismatch { field: String, expected: String },

    /// A value arrived where an unrelated type was declared
    #[error("{actual} is not assignable to {declared}")]
    NotAssignable { declared: String, actual: String },

    #[error("invalid value type descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("unsupported value tag {0:#010x}")]
    UnsupportedValueTag(u32),

    /// Indirection to a position that holds no earlier value or id
    #[error("indirection to unknown stream position {0}")]
    DanglingIndirection(i64),

    /// Arguments were encoded for a different connection byte order
    #[error("arguments encoded {actual:?}, connection sends {expected:?}")]
    ByteOrderMismatch {
        expected: cdr::ByteOrder,
        actual: cdr::ByteOrder,
    },

    #[error("invalid object reference: {0}")]
    InvalidObjectReference(String),

    /// Values nested deeper than the configured limit
    #[error("value nesting exceeds {0} levels")]
    DepthExceeded(usize),

    /// Sequence length larger than the rest of the body could hold
    #[error("sequence of {0} elements exceeds the message")]
    SequenceTooLong(u32),

    /// The peer could not unmarshal what we sent
    #[error("rejected by peer: {0}")]
    Remote(SystemException),

    #[error("CDR error: {0}")]
    Cdr(#[from] cdr::CdrError),
}

/// Broker errors
#[derive(Error, Debug)]
pub enum OrbError {
    /// Connection-level failure worth retrying
    #[error("transient failure: {0}")]
    Transient(String),

    /// No transport-level connection could be made
    #[error("{endpoint} unreachable: {reason}")]
    Unreachable { endpoint: Endpoint, reason: String },

    /// GIOP framing or stream error
    #[error("protocol error: {0}")]
    Protocol(#[from] giop::GiopError),

    /// System exception raised by the peer
    #[error("system exception: {0}")]
    System(SystemException),

    #[error("marshalling error: {0}")]
    Marshalling(#[from] MarshalError),

    /// User exception raised by the operation
    #[error("user exception: {0}")]
    Application(UserException),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// Named lookup found no binding
    #[error("name not found: {0}")]
    NotFound(String),

    #[error("unknown activation id: {0}")]
    UnknownActivationId(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<cdr::CdrError> for OrbError {
    fn from(err: cdr::CdrError) -> Self {
        OrbError::Marshalling(MarshalError::Cdr(err))
    }
}

fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::AddrNotAvailable
    )
}

impl OrbError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrbError::Transient(_) | OrbError::Unreachable { .. } => ErrorCategory::Transient,
            OrbError::Io(e) if is_transient_io(e.kind()) => ErrorCategory::Transient,
            OrbError::Protocol(giop::GiopError::Io(e)) if is_transient_io(e.kind()) => {
                ErrorCategory::Transient
            }
            OrbError::Protocol(giop::GiopError::ConnectionClosed) => ErrorCategory::Transient,
            OrbError::Protocol(_)
            | OrbError::Io(_)
            | OrbError::InvalidLocator(_)
            | OrbError::Adapter(_)
            | OrbError::UnknownActivationId(_)
            | OrbError::UnknownOperation(_) => ErrorCategory::SystemFailure,
            OrbError::System(ex) => ex.category(),
            OrbError::Marshalling(_) => ErrorCategory::Marshalling,
            OrbError::Application(_) | OrbError::NotFound(_) => ErrorCategory::Application,
            OrbError::Cancelled(_) => ErrorCategory::Cancelled,
        }
    }

    /// Whether the caller may retry the same invocation
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// System exception sent back to a caller whose request failed this way
    pub(crate) fn to_system_exception(&self) -> SystemException {
        use SystemExceptionKind as Kind;

        let (kind, minor_code) = match self {
            OrbError::UnknownActivationId(_) | OrbError::NotFound(_) => (Kind::ObjectNotExist, 0),
            OrbError::UnknownOperation(_) => (Kind::BadOperation, 0),
            OrbError::Marshalling(MarshalError::UnknownType(_)) => {
                (Kind::Marshal, minor::NO_VALUE_FACTORY)
            }
            OrbError::Marshalling(_) => (Kind::Marshal, 0),
            OrbError::System(ex) => return ex.clone(),
            OrbError::Transient(_) | OrbError::Unreachable { .. } | OrbError::Cancelled(_) => {
                (Kind::Transient, 0)
            }
            OrbError::Adapter(_) => (Kind::ObjAdapter, 0),
            OrbError::InvalidLocator(_) => (Kind::BadParam, 0),
            OrbError::Protocol(_) | OrbError::Io(_) => (Kind::CommFailure, 0),
            OrbError::Application(_) => (Kind::Unknown, 0),
        };
        SystemException::new(kind, minor_code, CompletionStatus::No)
    }

    /// Map a system exception from a reply back onto the local taxonomy
    pub(crate) fn from_system_exception(ex: SystemException, object_key: &str, operation: &str) -> Self {
        match ex.kind {
            SystemExceptionKind::ObjectNotExist => OrbError::UnknownActivationId(object_key.to_string()),
            SystemExceptionKind::BadOperation => OrbError::UnknownOperation(operation.to_string()),
            SystemExceptionKind::Marshal => OrbError::Marshalling(MarshalError::Remote(ex)),
            SystemExceptionKind::Transient | SystemExceptionKind::CommFailure => {
                OrbError::Transient(ex.to_string())
            }
            _ => OrbError::System(ex),
        }
    }
}
