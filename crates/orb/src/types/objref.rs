//! Object references and their IOR encoding
//!
//! An IOR is a type id plus a list of tagged profiles. Only the IIOP
//! profile (tag 0) is produced or understood:
//!
//! ```text
//! IOR
//! ├── type_id: string
//! └── profiles: sequence
//!     └── { tag: u32 = 0, data: encapsulation
//!           ├── byte order flag
//!           ├── iiop version (major, minor)
//!           ├── host: string
//!           ├── port: u16
//!           ├── object_key: octets
//!           └── components: sequence (1.1+) }
//! ```

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use cdr::{ByteOrder, CdrDecoder, CdrEncoder};
use giop::ListenPoint;

use super::error::{MarshalError, OrbError, Result};

/// Repository id of the root object interface
pub const OBJECT_TYPE_ID: &str = "IDL:omg.org/CORBA/Object:1.0";

/// Profile tag of IIOP profiles
pub const TAG_INTERNET_IOP: u32 = 0;

/// Network location of an ORB
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }

    /// Endpoint of an ORB without a listen socket; only reachable over
    /// bidirectional connections it initiated
    pub fn is_synthetic(&self) -> bool {
        self.port == 0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<ListenPoint> for Endpoint {
    fn from(point: ListenPoint) -> Self {
        Self::new(point.host, point.port)
    }
}

impl From<&Endpoint> for ListenPoint {
    fn from(endpoint: &Endpoint) -> Self {
        ListenPoint {
            host: endpoint.host.clone(),
            port: endpoint.port,
        }
    }
}

/// Whether invoking a reference needs the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Remote,
    Local,
}

/// Handle to a remote or local object
///
/// The endpoint and object key never change after construction; narrowing
/// produces a new reference with a different type id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    type_id: String,
    endpoint: Endpoint,
    object_key: Bytes,
    version: (u8, u8),
    locality: Locality,
}

impl ObjectReference {
    pub fn new(type_id: impl Into<String>, endpoint: Endpoint, object_key: impl Into<Bytes>) -> Self {
        Self {
            type_id: type_id.into(),
            endpoint,
            object_key: object_key.into(),
            version: (1, 2),
            locality: Locality::Remote,
        }
    }

    pub(crate) fn local(type_id: impl Into<String>, endpoint: Endpoint, object_key: impl Into<Bytes>) -> Self {
        Self::new(type_id, endpoint, object_key).with_locality(Locality::Local)
    }

    pub(crate) fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    /// Same object, re-tagged with a more specific interface
    pub(crate) fn narrowed(&self, type_id: &str) -> Self {
        Self {
            type_id: type_id.to_string(),
            ..self.clone()
        }
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn object_key(&self) -> &Bytes {
        &self.object_key
    }

    /// Object key for logs and error messages
    pub fn key_string(&self) -> String {
        String::from_utf8_lossy(&self.object_key).into_owned()
    }

    pub fn iiop_version(&self) -> (u8, u8) {
        self.version
    }

    pub fn locality(&self) -> Locality {
        self.locality
    }

    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }

    /// Write as an IOR
    pub fn encode(&self, enc: &mut CdrEncoder) {
        enc.put_string(&self.type_id);
        enc.put_u32(1);
        enc.put_u32(TAG_INTERNET_IOP);
        enc.put_encapsulation(|profile| {
            profile.put_octet(self.version.0);
            profile.put_octet(self.version.1);
            profile.put_string(&self.endpoint.host);
            profile.put_u16(self.endpoint.port);
            profile.put_octets(&self.object_key);
            if self.version.1 >= 1 {
                profile.put_u32(0);
            }
        });
    }

    /// Write the nil reference: empty type id, no profiles
    pub fn encode_nil(enc: &mut CdrEncoder) {
        enc.put_string("");
        enc.put_u32(0);
    }

    /// Read an IOR; `None` for the nil reference
    pub fn decode(dec: &mut CdrDecoder) -> std::result::Result<Option<Self>, MarshalError> {
        let type_id = dec.get_string()?;
        let count = dec.get_u32()? as usize;
        if count == 0 {
            return if type_id.is_empty() {
                Ok(None)
            } else {
                Err(MarshalError::InvalidObjectReference(format!(
                    "{} has no profiles",
                    type_id
                )))
            };
        }

        let mut iiop = None;
        for _ in 0..count {
            let tag = dec.get_u32()?;
            let data = dec.get_octets()?;
            if tag == TAG_INTERNET_IOP && iiop.is_none() {
                iiop = Some(data);
            }
        }
        let data = iiop.ok_or_else(|| {
            MarshalError::InvalidObjectReference(format!("{} has no IIOP profile", type_id))
        })?;

        let mut profile = CdrDecoder::encapsulation(data)?;
        let major = profile.get_octet()?;
        let minor = profile.get_octet()?;
        if major != 1 {
            return Err(MarshalError::InvalidObjectReference(format!(
                "unsupported IIOP version {}.{}",
                major, minor
            )));
        }
        let host = profile.get_string()?;
        let port = profile.get_u16()?;
        let object_key = profile.get_octets()?;
        // tagged components carry nothing this broker uses

        Ok(Some(Self {
            type_id,
            endpoint: Endpoint::new(host, port),
            object_key,
            version: (major, minor),
            locality: Locality::Remote,
        }))
    }

    /// Stringified IOR: `IOR:` followed by the hex of an encapsulation
    pub fn to_ior_string(&self) -> String {
        let mut enc = CdrEncoder::new(ByteOrder::BigEndian);
        enc.put_octet(ByteOrder::BigEndian.flag());
        self.encode(&mut enc);
        format!("IOR:{}", hex::encode(enc.as_slice()))
    }

    /// Parse a stringified IOR
    pub fn from_ior_string(s: &str) -> Result<Self> {
        let digits = s
            .get(..4)
            .filter(|prefix| prefix.eq_ignore_ascii_case("IOR:"))
            .and_then(|_| s.get(4..))
            .ok_or_else(|| OrbError::InvalidLocator(format!("not a stringified IOR: {}", s)))?;
        let bytes = hex::decode(digits)
            .map_err(|e| OrbError::InvalidLocator(format!("bad hex in IOR: {}", e)))?;

        let mut dec = CdrDecoder::encapsulation(Bytes::from(bytes))
            .map_err(|e| OrbError::InvalidLocator(e.to_string()))?;
        Self::decode(&mut dec)
            .map_err(|e| OrbError::InvalidLocator(e.to_string()))?
            .ok_or_else(|| OrbError::InvalidLocator("nil IOR".into()))
    }

    /// Direct locator for this object
    pub fn to_corbaloc(&self) -> String {
        format!(
            "corbaloc:iiop:{}.{}@{}/{}",
            self.version.0,
            self.version.1,
            self.endpoint,
            super::locator::percent_encode(&self.object_key)
        )
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.type_id, self.endpoint, self.key_string())
    }
}
