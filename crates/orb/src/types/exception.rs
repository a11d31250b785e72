//! System and user exceptions as carried in GIOP replies

use std::fmt;

use cdr::{CdrDecoder, CdrEncoder, CdrError};

use super::error::ErrorCategory;

/// Minor codes in the OMG vendor range
pub mod minor {
    const OMG_VMCID: u32 = 0x4f4d_0000;

    /// MARSHAL: no value factory for a received value type
    pub const NO_VALUE_FACTORY: u32 = OMG_VMCID | 1;
    /// NO_PERMISSION: request arrived on a connection the adapter may not serve
    pub const BIDIRECTIONAL_REQUIRED: u32 = OMG_VMCID | 2;
    /// TRANSIENT: the receiving broker is shutting down
    pub const SHUTTING_DOWN: u32 = OMG_VMCID | 3;
}

/// Standard system exceptions used by this broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemExceptionKind {
    Unknown,
    BadParam,
    Marshal,
    CommFailure,
    ObjectNotExist,
    BadOperation,
    NoPermission,
    ObjAdapter,
    Transient,
    Internal,
    Timeout,
}

impl SystemExceptionKind {
    const ALL: [SystemExceptionKind; 11] = [
        SystemExceptionKind::Unknown,
        SystemExceptionKind::BadParam,
        SystemExceptionKind::Marshal,
        SystemExceptionKind::CommFailure,
        SystemExceptionKind::ObjectNotExist,
        SystemExceptionKind::BadOperation,
        SystemExceptionKind::NoPermission,
        SystemExceptionKind::ObjAdapter,
        SystemExceptionKind::Transient,
        SystemExceptionKind::Internal,
        SystemExceptionKind::Timeout,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SystemExceptionKind::Unknown => "UNKNOWN",
            SystemExceptionKind::BadParam => "BAD_PARAM",
            SystemExceptionKind::Marshal => "MARSHAL",
            SystemExceptionKind::CommFailure => "COMM_FAILURE",
            SystemExceptionKind::ObjectNotExist => "OBJECT_NOT_EXIST",
            SystemExceptionKind::BadOperation => "BAD_OPERATION",
            SystemExceptionKind::NoPermission => "NO_PERMISSION",
            SystemExceptionKind::ObjAdapter => "OBJ_ADAPTER",
            SystemExceptionKind::Transient => "TRANSIENT",
            SystemExceptionKind::Internal => "INTERNAL",
            SystemExceptionKind::Timeout => "TIMEOUT",
        }
    }

    pub fn repository_id(self) -> String {
        format!("IDL:omg.org/CORBA/{}:1.0", self.name())
    }

    pub fn from_repository_id(id: &str) -> Option<Self> {
        let name = id.strip_prefix("IDL:omg.org/CORBA/")?.strip_suffix(":1.0")?;
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Whether the operation ran before the exception was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompletionStatus {
    Yes = 0,
    No = 1,
    Maybe = 2,
}

impl CompletionStatus {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => CompletionStatus::Yes,
            1 => CompletionStatus::No,
            _ => CompletionStatus::Maybe,
        }
    }
}

/// A system exception: repository id, minor code, completion status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemException {
    pub kind: SystemExceptionKind,
    pub minor: u32,
    pub completed: CompletionStatus,
}

impl SystemException {
    pub fn new(kind: SystemExceptionKind, minor: u32, completed: CompletionStatus) -> Self {
        Self {
            kind,
            minor,
            completed,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.kind {
            SystemExceptionKind::Transient | SystemExceptionKind::CommFailure => {
                ErrorCategory::Transient
            }
            SystemExceptionKind::Marshal => ErrorCategory::Marshalling,
            SystemExceptionKind::Timeout => ErrorCategory::Cancelled,
            _ => ErrorCategory::SystemFailure,
        }
    }

    pub fn encode(&self, enc: &mut CdrEncoder) {
        enc.put_string(&self.kind.repository_id());
        enc.put_u32(self.minor);
        enc.put_u32(self.completed as u32);
    }

    /// Unrecognised repository ids decode as `UNKNOWN`
    pub fn decode(dec: &mut CdrDecoder) -> Result<Self, CdrError> {
        let id = dec.get_string()?;
        let minor = dec.get_u32()?;
        let completed = CompletionStatus::from_u32(dec.get_u32()?);
        let kind = SystemExceptionKind::from_repository_id(&id).unwrap_or(SystemExceptionKind::Unknown);
        Ok(Self {
            kind,
            minor,
            completed,
        })
    }
}

impl fmt::Display for SystemException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (minor {:#x}, completed {:?})",
            self.kind.name(),
            self.minor,
            self.completed
        )
    }
}

/// An exception raised by an operation: repository id and message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserException {
    pub id: String,
    pub message: String,
}

impl UserException {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn encode(&self, enc: &mut CdrEncoder) {
        enc.put_string(&self.id);
        enc.put_string(&self.message);
    }

    pub fn decode(dec: &mut CdrDecoder) -> Result<Self, CdrError> {
        let id = dec.get_string()?;
        let message = dec.get_string()?;
        Ok(Self { id, message })
    }
}

impl fmt::Display for UserException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.message)
    }
}
