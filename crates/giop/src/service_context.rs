//! Service contexts understood by this stack

use cdr::{ByteOrder, CdrDecoder, CdrEncoder};

use crate::error::Result;
use crate::message::ServiceContext;

/// Well-known service context ids
pub mod service_id {
    pub const CODE_SETS: u32 = 1;
    pub const BI_DIR_IIOP: u32 = 5;
}

/// Host/port a peer can be reached at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenPoint {
    pub host: String,
    pub port: u16,
}

/// `BI_DIR_IIOP` payload: the listen points the sender is known by
///
/// A peer that accepts the context may send requests for objects at these
/// points back over the connection the context arrived on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BiDirContext {
    pub listen_points: Vec<ListenPoint>,
}

impl BiDirContext {
    pub fn new(listen_points: Vec<ListenPoint>) -> Self {
        Self { listen_points }
    }

    pub fn to_service_context(&self, byte_order: ByteOrder) -> ServiceContext {
        let mut enc = CdrEncoder::new(byte_order);
        enc.put_octet(byte_order.flag());
        enc.put_u32(self.listen_points.len() as u32);
        for point in &self.listen_points {
            enc.put_string(&point.host);
            enc.put_u16(point.port);
        }
        ServiceContext {
            id: service_id::BI_DIR_IIOP,
            data: enc.into_bytes(),
        }
    }

    pub fn from_service_context(context: &ServiceContext) -> Result<Self> {
        let mut dec = CdrDecoder::encapsulation(context.data.clone())?;
        let count = dec.get_u32()? as usize;
        let mut listen_points = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            let host = dec.get_string()?;
            let port = dec.get_u16()?;
            listen_points.push(ListenPoint { host, port });
        }
        Ok(Self { listen_points })
    }

    /// Find and decode the bidirectional context in a context list
    pub fn find(contexts: &[ServiceContext]) -> Result<Option<Self>> {
        contexts
            .iter()
            .find(|ctx| ctx.id == service_id::BI_DIR_IIOP)
            .map(Self::from_service_context)
            .transpose()
    }
}
