//! GIOP 1.2 fragmentation
//!
//! A message larger than the sender's fragment size is split. The first
//! frame keeps the original message type with the more-fragments flag set;
//! every continuation is a Fragment message carrying the request id:
//!
//! ```text
//! frame 1:  [header: Request, MORE]  [request id | body chunk 0 ...]
//! frame 2:  [header: Fragment, MORE] [request id | body chunk 1]
//! frame n:  [header: Fragment]       [request id | body chunk n-1]
//! ```
//!
//! Fragments of different requests may interleave; reassembly is keyed
//! by request id. All GIOP 1.2 fragmentable bodies start with the request id.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use cdr::CdrContext;
use tracing::trace;

use crate::error::{GiopError, Result};
use crate::message::{FragmentMessage, Message, MessageHeader, MessageType};

/// Request id that prefixes every Fragment body
pub const FRAGMENT_HEADER_SIZE: usize = 4;

fn leading_request_id(header: &MessageHeader, body: &[u8]) -> Result<u32> {
    if body.len() < 4 {
        return Err(GiopError::InvalidMessage(format!(
            "fragmented {:?} body shorter than a request id",
            header.message_type
        )));
    }
    Ok(CdrContext::new(header.byte_order()).get_u32(&mut &body[..4]))
}

/// Splits encoded frames that exceed the fragment size
pub struct FragmentGenerator;

impl FragmentGenerator {
    /// Largest body chunk per frame, a multiple of 8
    pub fn max_chunk_size(fragment_size: usize) -> usize {
        let overhead = MessageHeader::SIZE + FRAGMENT_HEADER_SIZE;
        if fragment_size > overhead {
            (fragment_size - overhead) / 8 * 8
        } else {
            0
        }
    }

    /// Split one encoded frame into frames no larger than `fragment_size`
    ///
    /// Frames that already fit are returned unchanged.
    pub fn fragment(frame: Bytes, fragment_size: usize) -> Result<Vec<Bytes>> {
        if frame.len() <= fragment_size {
            return Ok(vec![frame]);
        }

        let header = MessageHeader::decode(&frame)?;
        if !header.message_type.is_fragmentable() {
            return Err(GiopError::NotFragmentable(header.message_type));
        }
        let chunk_size = Self::max_chunk_size(fragment_size);
        if chunk_size < 8 {
            return Err(GiopError::InvalidMessage(format!(
                "fragment size {} too small",
                fragment_size
            )));
        }

        let byte_order = header.byte_order();
        let body = frame.slice(MessageHeader::SIZE..);
        let request_id = leading_request_id(&header, &body)?;

        let mut frames = Vec::with_capacity(body.len() / chunk_size + 1);
        let mut offset = 0;
        while offset < body.len() {
            let end = (offset + chunk_size).min(body.len());
            let more = end < body.len();
            let chunk = body.slice(offset..end);

            if offset == 0 {
                let mut first = header.clone();
                first.flags.set_more_fragments(more);
                first.body_size = chunk.len() as u32;
                let mut buf = BytesMut::with_capacity(first.frame_len());
                first.encode(&mut buf);
                buf.put_slice(&chunk);
                frames.push(buf.freeze());
            } else {
                let fragment = FragmentMessage {
                    request_id,
                    more_fragments: more,
                    data: chunk,
                };
                frames.push(Message::Fragment(fragment).encode(byte_order));
            }
            offset = end;
        }

        trace!(
            "fragmented {:?} request {} into {} frames",
            header.message_type,
            request_id,
            frames.len()
        );
        Ok(frames)
    }
}

/// Collects the body of one fragmented message
#[derive(Debug)]
pub struct FragmentAssembler {
    header: MessageHeader,
    body: BytesMut,
    fragments: usize,
    max_size: usize,
}

impl FragmentAssembler {
    pub fn new(header: MessageHeader, first: Bytes, max_size: usize) -> Result<Self> {
        let mut assembler = Self {
            header,
            body: BytesMut::with_capacity(first.len() * 2),
            fragments: 0,
            max_size,
        };
        assembler.append(&first)?;
        Ok(assembler)
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        let size = MessageHeader::SIZE + self.body.len() + data.len();
        if size > self.max_size {
            return Err(GiopError::MessageTooLarge {
                size,
                max: self.max_size,
            });
        }
        self.body.put_slice(data);
        self.fragments += 1;
        Ok(())
    }

    /// Header and body of the reassembled message
    pub fn finish(self) -> (MessageHeader, Bytes) {
        let mut header = self.header;
        header.flags.set_more_fragments(false);
        header.body_size = self.body.len() as u32;
        (header, self.body.freeze())
    }
}

/// Reassembly state for every fragmented message on one stream
#[derive(Debug)]
pub struct Reassembler {
    pending: HashMap<u32, FragmentAssembler>,
    max_size: usize,
}

impl Reassembler {
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: HashMap::new(),
            max_size,
        }
    }

    pub fn in_progress(&self) -> usize {
        self.pending.len()
    }

    /// Feed one frame
    ///
    /// Returns the header and body of a whole message once one is
    /// available. Unfragmented frames pass straight through.
    pub fn push(&mut self, header: MessageHeader, body: Bytes) -> Result<Option<(MessageHeader, Bytes)>> {
        if header.message_type == MessageType::Fragment {
            let request_id = leading_request_id(&header, &body)?;
            let assembler = self
                .pending
                .get_mut(&request_id)
                .ok_or(GiopError::UnexpectedFragment(request_id))?;
            if assembler.header.byte_order() != header.byte_order() {
                return Err(GiopError::ByteOrderChanged);
            }
            assembler.append(&body[FRAGMENT_HEADER_SIZE..])?;
            if header.flags.more_fragments() {
                return Ok(None);
            }
            return Ok(self.pending.remove(&request_id).map(FragmentAssembler::finish));
        }

        if header.flags.more_fragments() {
            if !header.message_type.is_fragmentable() {
                return Err(GiopError::NotFragmentable(header.message_type));
            }
            let request_id = leading_request_id(&header, &body)?;
            if self.pending.contains_key(&request_id) {
                return Err(GiopError::InvalidMessage(format!(
                    "request {} is already being reassembled",
                    request_id
                )));
            }
            let assembler = FragmentAssembler::new(header, body, self.max_size)?;
            self.pending.insert(request_id, assembler);
            return Ok(None);
        }

        Ok(Some((header, body)))
    }
}
