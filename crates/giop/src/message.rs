//! GIOP 1.2 message structures
//!
//! Every message starts with a fixed 12-byte header:
//!
//! ```text
//! 0        4       5       6       7       8               12
//! +--------+-------+-------+-------+-------+---------------+----------
//! | "GIOP" | major | minor | flags | type  | body size     | body ...
//! +--------+-------+-------+-------+-------+---------------+----------
//!                          bit 0: little endian
//!                          bit 1: more fragments follow
//! ```
//!
//! CDR alignment inside the body is measured from the first byte of the
//! header. Request and reply bodies begin on an 8-byte boundary.

use bytes::{BufMut, Bytes, BytesMut};
use cdr::{ByteOrder, CdrContext, CdrDecoder, CdrEncoder};

use crate::error::{GiopError, Result};

pub const GIOP_MAGIC: [u8; 4] = *b"GIOP";
pub const GIOP_VERSION_MAJOR: u8 = 1;
pub const GIOP_VERSION_MINOR: u8 = 2;

/// Target addressing disposition for object-key addressing
const KEY_ADDR: i16 = 0;

/// Response flags: reply expected (SYNC_WITH_TARGET)
const RESPONSE_EXPECTED: u8 = 0x03;

/// GIOP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Reply = 1,
    CancelRequest = 2,
    LocateRequest = 3,
    LocateReply = 4,
    CloseConnection = 5,
    MessageError = 6,
    Fragment = 7,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageType::Request),
            1 => Some(MessageType::Reply),
            2 => Some(MessageType::CancelRequest),
            3 => Some(MessageType::LocateRequest),
            4 => Some(MessageType::LocateReply),
            5 => Some(MessageType::CloseConnection),
            6 => Some(MessageType::MessageError),
            7 => Some(MessageType::Fragment),
            _ => None,
        }
    }

    /// Message kinds that may be split across Fragment messages
    pub fn is_fragmentable(self) -> bool {
        matches!(
            self,
            MessageType::Request
                | MessageType::Reply
                | MessageType::LocateRequest
                | MessageType::LocateReply
        )
    }
}

/// Header flags octet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags(pub u8);

impl MessageFlags {
    pub const LITTLE_ENDIAN: u8 = 0x01;
    pub const MORE_FRAGMENTS: u8 = 0x02;

    pub fn new(byte_order: ByteOrder) -> Self {
        Self(byte_order.flag())
    }

    pub fn byte_order(self) -> ByteOrder {
        if self.0 & Self::LITTLE_ENDIAN != 0 {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    pub fn more_fragments(self) -> bool {
        self.0 & Self::MORE_FRAGMENTS != 0
    }

    pub fn set_more_fragments(&mut self, more: bool) {
        if more {
            self.0 |= Self::MORE_FRAGMENTS;
        } else {
            self.0 &= !Self::MORE_FRAGMENTS;
        }
    }
}

/// Fixed GIOP message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: (u8, u8),
    pub flags: MessageFlags,
    pub message_type: MessageType,
    pub body_size: u32,
}

impl MessageHeader {
    /// Size in bytes
    pub const SIZE: usize = 12;

    pub fn new(message_type: MessageType, byte_order: ByteOrder, body_size: u32) -> Self {
        Self {
            version: (GIOP_VERSION_MAJOR, GIOP_VERSION_MINOR),
            flags: MessageFlags::new(byte_order),
            message_type,
            body_size,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.flags.byte_order()
    }

    /// Header plus body length
    pub fn frame_len(&self) -> usize {
        Self::SIZE + self.body_size as usize
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&GIOP_MAGIC);
        buf.put_u8(self.version.0);
        buf.put_u8(self.version.1);
        buf.put_u8(self.flags.0);
        buf.put_u8(self.message_type as u8);
        CdrContext::new(self.byte_order()).put_u32(buf, self.body_size);
    }

    /// Decode a header from at least [`MessageHeader::SIZE`] bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(GiopError::InvalidMessage(format!(
                "header needs {} bytes, have {}",
                Self::SIZE,
                data.len()
            )));
        }

        let magic = [data[0], data[1], data[2], data[3]];
        if magic != GIOP_MAGIC {
            return Err(GiopError::BadMagic(magic));
        }

        let (major, minor) = (data[4], data[5]);
        if major != GIOP_VERSION_MAJOR || minor != GIOP_VERSION_MINOR {
            return Err(GiopError::VersionMismatch { major, minor });
        }

        let flags = MessageFlags(data[6]);
        let message_type =
            MessageType::from_u8(data[7]).ok_or(GiopError::InvalidMessageType(data[7]))?;
        let body_size = CdrContext::new(flags.byte_order()).get_u32(&mut &data[8..12]);

        Ok(Self {
            version: (major, minor),
            flags,
            message_type,
            body_size,
        })
    }
}

/// Tagged opaque data attached to requests and replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContext {
    pub id: u32,
    pub data: Bytes,
}

fn encode_service_contexts(enc: &mut CdrEncoder, contexts: &[ServiceContext]) {
    enc.put_u32(contexts.len() as u32);
    for ctx in contexts {
        enc.put_u32(ctx.id);
        enc.put_octets(&ctx.data);
    }
}

fn decode_service_contexts(dec: &mut CdrDecoder) -> Result<Vec<ServiceContext>> {
    let count = dec.get_u32()? as usize;
    // each entry needs at least 8 bytes
    if count > dec.remaining() / 8 {
        return Err(GiopError::InvalidMessage(format!(
            "service context count {} exceeds message",
            count
        )));
    }
    let mut contexts = Vec::with_capacity(count);
    for _ in 0..count {
        let id = dec.get_u32()?;
        let data = dec.get_octets()?;
        contexts.push(ServiceContext { id, data });
    }
    Ok(contexts)
}

fn encode_body_payload(enc: &mut CdrEncoder, body: &[u8]) {
    if !body.is_empty() {
        enc.align(8);
        enc.put_raw(body);
    }
}

fn decode_body_payload(dec: &mut CdrDecoder) -> Result<Bytes> {
    if dec.is_empty() {
        return Ok(Bytes::new());
    }
    dec.align(8)?;
    Ok(dec.rest())
}

/// Request message (type 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    pub request_id: u32,
    pub response_expected: bool,
    pub object_key: Bytes,
    pub operation: String,
    pub service_contexts: Vec<ServiceContext>,
    /// Marshalled arguments, aligned to 8 relative to their own start
    pub body: Bytes,
}

impl RequestMessage {
    pub fn new(request_id: u32, object_key: Bytes, operation: impl Into<String>, body: Bytes) -> Self {
        Self {
            request_id,
            response_expected: true,
            object_key,
            operation: operation.into(),
            service_contexts: Vec::new(),
            body,
        }
    }

    fn encode_body(&self, enc: &mut CdrEncoder) {
        enc.put_u32(self.request_id);
        enc.put_octet(if self.response_expected { RESPONSE_EXPECTED } else { 0 });
        enc.put_raw(&[0; 3]);
        enc.put_i16(KEY_ADDR);
        enc.put_octets(&self.object_key);
        enc.put_string(&self.operation);
        encode_service_contexts(enc, &self.service_contexts);
        encode_body_payload(enc, &self.body);
    }

    fn decode_body(dec: &mut CdrDecoder) -> Result<Self> {
        let request_id = dec.get_u32()?;
        let response_flags = dec.get_octet()?;
        dec.get_raw(3)?;
        let disposition = dec.get_i16()?;
        if disposition != KEY_ADDR {
            return Err(GiopError::UnsupportedAddressing(disposition));
        }
        let object_key = dec.get_octets()?;
        let operation = dec.get_string()?;
        let service_contexts = decode_service_contexts(dec)?;
        let body = decode_body_payload(dec)?;

        Ok(Self {
            request_id,
            response_expected: response_flags & 0x01 != 0,
            object_key,
            operation,
            service_contexts,
            body,
        })
    }
}

/// Reply status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReplyStatus {
    NoException = 0,
    UserException = 1,
    SystemException = 2,
    LocationForward = 3,
}

impl ReplyStatus {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ReplyStatus::NoException),
            1 => Ok(ReplyStatus::UserException),
            2 => Ok(ReplyStatus::SystemException),
            3 => Ok(ReplyStatus::LocationForward),
            other => Err(GiopError::InvalidReplyStatus(other)),
        }
    }
}

/// Reply message (type 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    pub request_id: u32,
    pub status: ReplyStatus,
    pub service_contexts: Vec<ServiceContext>,
    pub body: Bytes,
}

impl ReplyMessage {
    pub fn new(request_id: u32, status: ReplyStatus, body: Bytes) -> Self {
        Self {
            request_id,
            status,
            service_contexts: Vec::new(),
            body,
        }
    }

    fn encode_body(&self, enc: &mut CdrEncoder) {
        enc.put_u32(self.request_id);
        enc.put_u32(self.status as u32);
        encode_service_contexts(enc, &self.service_contexts);
        encode_body_payload(enc, &self.body);
    }

    fn decode_body(dec: &mut CdrDecoder) -> Result<Self> {
        let request_id = dec.get_u32()?;
        let status = ReplyStatus::from_u32(dec.get_u32()?)?;
        let service_contexts = decode_service_contexts(dec)?;
        let body = decode_body_payload(dec)?;
        Ok(Self {
            request_id,
            status,
            service_contexts,
            body,
        })
    }
}

/// CancelRequest message (type 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequestMessage {
    pub request_id: u32,
}

/// LocateRequest message (type 3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateRequestMessage {
    pub request_id: u32,
    pub object_key: Bytes,
}

/// Locate status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LocateStatus {
    UnknownObject = 0,
    ObjectHere = 1,
    ObjectForward = 2,
}

impl LocateStatus {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(LocateStatus::UnknownObject),
            1 => Ok(LocateStatus::ObjectHere),
            2 => Ok(LocateStatus::ObjectForward),
            other => Err(GiopError::InvalidLocateStatus(other)),
        }
    }
}

/// LocateReply message (type 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateReplyMessage {
    pub request_id: u32,
    pub status: LocateStatus,
}

/// Fragment message (type 7): continuation of a fragmented message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentMessage {
    pub request_id: u32,
    pub more_fragments: bool,
    pub data: Bytes,
}

/// Any GIOP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(RequestMessage),
    Reply(ReplyMessage),
    CancelRequest(CancelRequestMessage),
    LocateRequest(LocateRequestMessage),
    LocateReply(LocateReplyMessage),
    CloseConnection,
    MessageError,
    Fragment(FragmentMessage),
}

/// Result of decoding from a possibly partial buffer
#[derive(Debug)]
pub enum Frame {
    /// A whole message; `consumed` bytes were used
    Complete {
        message: Message,
        byte_order: ByteOrder,
        consumed: usize,
    },
    /// At least `needed` more bytes are required
    Incomplete { needed: usize },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Request(_) => MessageType::Request,
            Message::Reply(_) => MessageType::Reply,
            Message::CancelRequest(_) => MessageType::CancelRequest,
            Message::LocateRequest(_) => MessageType::LocateRequest,
            Message::LocateReply(_) => MessageType::LocateReply,
            Message::CloseConnection => MessageType::CloseConnection,
            Message::MessageError => MessageType::MessageError,
            Message::Fragment(_) => MessageType::Fragment,
        }
    }

    pub fn request_id(&self) -> Option<u32> {
        match self {
            Message::Request(m) => Some(m.request_id),
            Message::Reply(m) => Some(m.request_id),
            Message::CancelRequest(m) => Some(m.request_id),
            Message::LocateRequest(m) => Some(m.request_id),
            Message::LocateReply(m) => Some(m.request_id),
            Message::Fragment(m) => Some(m.request_id),
            Message::CloseConnection | Message::MessageError => None,
        }
    }

    /// Encode header and body into a single frame
    pub fn encode(&self, byte_order: ByteOrder) -> Bytes {
        let mut enc = CdrEncoder::with_origin(byte_order, MessageHeader::SIZE);
        let mut flags = MessageFlags::new(byte_order);

        match self {
            Message::Request(m) => m.encode_body(&mut enc),
            Message::Reply(m) => m.encode_body(&mut enc),
            Message::CancelRequest(m) => enc.put_u32(m.request_id),
            Message::LocateRequest(m) => {
                enc.put_u32(m.request_id);
                enc.put_i16(KEY_ADDR);
                enc.put_octets(&m.object_key);
            }
            Message::LocateReply(m) => {
                enc.put_u32(m.request_id);
                enc.put_u32(m.status as u32);
            }
            Message::CloseConnection | Message::MessageError => {}
            Message::Fragment(m) => {
                flags.set_more_fragments(m.more_fragments);
                enc.put_u32(m.request_id);
                enc.put_raw(&m.data);
            }
        }

        let header = MessageHeader {
            version: (GIOP_VERSION_MAJOR, GIOP_VERSION_MINOR),
            flags,
            message_type: self.message_type(),
            body_size: enc.len() as u32,
        };
        let mut buf = BytesMut::with_capacity(header.frame_len());
        header.encode(&mut buf);
        buf.put_slice(enc.as_slice());
        buf.freeze()
    }

    /// Decode one message from the front of `data`
    ///
    /// A short buffer yields [`Frame::Incomplete`]; a buffer whose bytes
    /// cannot be a GIOP message yields an error.
    pub fn decode(data: &[u8]) -> Result<Frame> {
        if data.len() < MessageHeader::SIZE {
            return Ok(Frame::Incomplete {
                needed: MessageHeader::SIZE - data.len(),
            });
        }
        let header = MessageHeader::decode(data)?;
        let frame_len = header.frame_len();
        if data.len() < frame_len {
            return Ok(Frame::Incomplete {
                needed: frame_len - data.len(),
            });
        }

        let body = Bytes::copy_from_slice(&data[MessageHeader::SIZE..frame_len]);
        let message = Self::decode_body(&header, body)?;
        Ok(Frame::Complete {
            message,
            byte_order: header.byte_order(),
            consumed: frame_len,
        })
    }

    /// Decode a body that has already been split off its header
    pub fn decode_body(header: &MessageHeader, body: Bytes) -> Result<Self> {
        if header.flags.more_fragments() && header.message_type != MessageType::Fragment {
            return Err(GiopError::UnassembledFragment);
        }

        let mut dec = CdrDecoder::with_origin(body, header.byte_order(), MessageHeader::SIZE);
        let message = match header.message_type {
            MessageType::Request => Message::Request(RequestMessage::decode_body(&mut dec)?),
            MessageType::Reply => Message::Reply(ReplyMessage::decode_body(&mut dec)?),
            MessageType::CancelRequest => Message::CancelRequest(CancelRequestMessage {
                request_id: dec.get_u32()?,
            }),
            MessageType::LocateRequest => {
                let request_id = dec.get_u32()?;
                let disposition = dec.get_i16()?;
                if disposition != KEY_ADDR {
                    return Err(GiopError::UnsupportedAddressing(disposition));
                }
                Message::LocateRequest(LocateRequestMessage {
                    request_id,
                    object_key: dec.get_octets()?,
                })
            }
            MessageType::LocateReply => Message::LocateReply(LocateReplyMessage {
                request_id: dec.get_u32()?,
                status: LocateStatus::from_u32(dec.get_u32()?)?,
            }),
            MessageType::CloseConnection => Message::CloseConnection,
            MessageType::MessageError => Message::MessageError,
            MessageType::Fragment => Message::Fragment(FragmentMessage {
                request_id: dec.get_u32()?,
                more_fragments: header.flags.more_fragments(),
                data: dec.rest(),
            }),
        };
        Ok(message)
    }
}
