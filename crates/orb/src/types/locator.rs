//! Locator strings
//!
//! Three textual forms name an object:
//!
//! ```text
//! corbaloc:iiop:[1.2@]host[:port][,iiop:...]/object-key
//! corbaname::host[:port][/naming-key]#name/in/naming.context
//! IOR:0000000000000015...
//! ```
//!
//! An empty protocol (`corbaloc::host`) means `iiop`. IPv6 hosts are
//! bracketed. Keys and names may contain `%XX` escapes.

use std::str::FromStr;

use bytes::Bytes;

use super::error::{OrbError, Result};
use super::objref::{Endpoint, ObjectReference};

/// Port used when a locator omits one
pub const DEFAULT_PORT: u16 = 2809;

/// Object key of the naming context when `corbaname:` omits one
pub const DEFAULT_NAMING_KEY: &str = "NameService";

/// One `iiop:` address from a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IiopAddress {
    pub version: (u8, u8),
    pub endpoint: Endpoint,
}

/// A parsed locator string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// `corbaloc:` - addresses tried in order, plus the object key
    Direct {
        addresses: Vec<IiopAddress>,
        object_key: Bytes,
    },
    /// `corbaname:` - a naming context and a name to resolve in it
    Named {
        addresses: Vec<IiopAddress>,
        naming_key: Bytes,
        name: String,
    },
    /// `IOR:` - a complete stringified reference
    Ior(ObjectReference),
}

impl Locator {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.get(..4).map_or(false, |prefix| prefix.eq_ignore_ascii_case("IOR:")) {
            return ObjectReference::from_ior_string(s).map(Locator::Ior);
        }
        if let Some(rest) = s.strip_prefix("corbaloc:") {
            return parse_corbaloc(rest);
        }
        if let Some(rest) = s.strip_prefix("corbaname:") {
            return parse_corbaname(rest);
        }
        Err(invalid(s, "unknown scheme"))
    }

    pub fn addresses(&self) -> &[IiopAddress] {
        match self {
            Locator::Direct { addresses, .. } | Locator::Named { addresses, .. } => addresses,
            Locator::Ior(_) => &[],
        }
    }
}

impl FromStr for Locator {
    type Err = OrbError;

    fn from_str(s: &str) -> Result<Self> {
        Locator::parse(s)
    }
}

fn invalid(locator: &str, reason: &str) -> OrbError {
    OrbError::InvalidLocator(format!("{}: {}", reason, locator))
}

fn parse_corbaloc(rest: &str) -> Result<Locator> {
    let (list, key) = rest
        .split_once('/')
        .ok_or_else(|| invalid(rest, "corbaloc needs /object-key"))?;
    if key.is_empty() {
        return Err(invalid(rest, "empty object key"));
    }
    Ok(Locator::Direct {
        addresses: parse_address_list(list)?,
        object_key: Bytes::from(percent_decode(key)?),
    })
}

fn parse_corbaname(rest: &str) -> Result<Locator> {
    let (location, name) = match rest.split_once('#') {
        Some((location, name)) => (location, name),
        None => (rest, ""),
    };
    let (list, key) = match location.split_once('/') {
        Some((list, key)) if !key.is_empty() => (list, key),
        Some((list, _)) => (list, DEFAULT_NAMING_KEY),
        None => (location, DEFAULT_NAMING_KEY),
    };
    let name = String::from_utf8(percent_decode(name)?)
        .map_err(|_| invalid(rest, "name is not UTF-8"))?;

    Ok(Locator::Named {
        addresses: parse_address_list(list)?,
        naming_key: Bytes::from(percent_decode(key)?),
        name,
    })
}

fn parse_address_list(list: &str) -> Result<Vec<IiopAddress>> {
    list.split(',').map(parse_address).collect()
}

fn parse_address(addr: &str) -> Result<IiopAddress> {
    let rest = if let Some(rest) = addr.strip_prefix("iiop:") {
        rest
    } else if let Some(rest) = addr.strip_prefix(':') {
        rest
    } else if addr.starts_with("rir:") {
        return Err(invalid(addr, "rir protocol is not supported"));
    } else {
        return Err(invalid(addr, "expected iiop address"));
    };

    let (version, hostport) = match rest.split_once('@') {
        Some((version, hostport)) => (parse_version(version)?, hostport),
        None => ((1, 2), rest),
    };

    let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid(addr, "unterminated IPv6 address"))?;
        let port = match after {
            "" => None,
            p => Some(p.strip_prefix(':').ok_or_else(|| invalid(addr, "junk after IPv6 address"))?),
        };
        (host, port)
    } else {
        match hostport.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (hostport, None),
        }
    };

    if host.is_empty() {
        return Err(invalid(addr, "missing host"));
    }
    let port = match port {
        None | Some("") => DEFAULT_PORT,
        Some(p) => p.parse::<u16>().map_err(|_| invalid(addr, "bad port"))?,
    };

    Ok(IiopAddress {
        version,
        endpoint: Endpoint::new(host, port),
    })
}

fn parse_version(version: &str) -> Result<(u8, u8)> {
    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| invalid(version, "bad IIOP version"))?;
    match (major.parse(), minor.parse()) {
        (Ok(major), Ok(minor)) => Ok((major, minor)),
        _ => Err(invalid(version, "bad IIOP version")),
    }
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b";/:?@&=+$,-_.!~*'()".contains(&byte)
}

pub(crate) fn percent_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push_str(&hex::encode_upper([byte]));
        }
    }
    out
}

pub(crate) fn percent_decode(s: &str) -> Result<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let mut escaped = [0u8; 1];
            bytes
                .get(i + 1..i + 3)
                .and_then(|digits| hex::decode_to_slice(digits, &mut escaped).ok())
                .ok_or_else(|| invalid(s, "bad % escape"))?;
            out.push(escaped[0]);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}
