//! GIOP stream transport
//!
//! GIOP frames are self-delimiting through the body size in the header.
//! The reader side buffers partial reads, enforces a size limit, checks
//! that the peer keeps one byte order, and reassembles fragments. The
//! writer side fragments anything above the configured fragment size.

use bytes::{Bytes, BytesMut};
use cdr::ByteOrder;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{GiopError, Result};
use crate::fragmentation::{FragmentGenerator, Reassembler};
use crate::message::{Message, MessageHeader};

/// Largest frame or reassembled message accepted by default (16 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Messages above this size are fragmented by default (64 KiB)
pub const DEFAULT_FRAGMENT_SIZE: usize = 65536;

/// GIOP transport for reading/writing messages over a byte stream
pub struct GiopTransport<T> {
    inner: T,
    max_message_size: usize,
    fragment_size: usize,
    read_buf: BytesMut,
    peer_byte_order: Option<ByteOrder>,
    reassembler: Reassembler,
}

impl<T> GiopTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            read_buf: BytesMut::with_capacity(8192),
            peer_byte_order: None,
            reassembler: Reassembler::new(DEFAULT_MAX_MESSAGE_SIZE),
        }
    }

    pub fn with_max_message_size(mut self, max_size: usize) -> Self {
        self.max_message_size = max_size;
        self.reassembler = Reassembler::new(max_size);
        self
    }

    pub fn with_fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size;
        self
    }

    /// Byte order the peer announced in its first message, if any yet
    pub fn peer_byte_order(&self) -> Option<ByteOrder> {
        self.peer_byte_order
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    fn check_byte_order(&mut self, byte_order: ByteOrder) -> Result<()> {
        match self.peer_byte_order {
            None => {
                self.peer_byte_order = Some(byte_order);
                Ok(())
            }
            Some(known) if known == byte_order => Ok(()),
            Some(_) => Err(GiopError::ByteOrderChanged),
        }
    }
}

impl<T: AsyncRead + Unpin> GiopTransport<T> {
    /// Read one raw frame: its header and body
    pub async fn read_frame(&mut self) -> Result<(MessageHeader, Bytes)> {
        while self.read_buf.len() < MessageHeader::SIZE {
            let n = self.fill_buf().await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Err(GiopError::ConnectionClosed);
                }
                return Err(GiopError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "incomplete GIOP header",
                )));
            }
        }

        let header = MessageHeader::decode(&self.read_buf)?;
        let frame_len = header.frame_len();
        if frame_len > self.max_message_size {
            return Err(GiopError::MessageTooLarge {
                size: frame_len,
                max: self.max_message_size,
            });
        }

        while self.read_buf.len() < frame_len {
            let n = self.fill_buf().await?;
            if n == 0 {
                return Err(GiopError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "incomplete GIOP message: expected {} bytes, got {}",
                        frame_len,
                        self.read_buf.len()
                    ),
                )));
            }
        }

        let frame = self.read_buf.split_to(frame_len).freeze();
        Ok((header, frame.slice(MessageHeader::SIZE..)))
    }

    /// Read the next whole message, reassembling fragments
    pub async fn read_message(&mut self) -> Result<(Message, ByteOrder)> {
        loop {
            let (header, body) = self.read_frame().await?;
            self.check_byte_order(header.byte_order())?;
            if let Some((header, body)) = self.reassembler.push(header, body)? {
                let message = Message::decode_body(&header, body)?;
                return Ok((message, header.byte_order()));
            }
        }
    }

    async fn fill_buf(&mut self) -> Result<usize> {
        if self.read_buf.capacity() - self.read_buf.len() < 4096 {
            self.read_buf.reserve(8192);
        }
        Ok(self.inner.read_buf(&mut self.read_buf).await?)
    }
}

impl<T: AsyncWrite + Unpin> GiopTransport<T> {
    /// Write already-encoded frames back to back
    pub async fn write_frames(&mut self, frames: &[Bytes]) -> Result<()> {
        for frame in frames {
            self.inner.write_all(frame).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Encode, fragment if needed, and write a message
    pub async fn write_message(&mut self, message: &Message, byte_order: ByteOrder) -> Result<()> {
        let frame = message.encode(byte_order);
        let frames = FragmentGenerator::fragment(frame, self.fragment_size)?;
        self.write_frames(&frames).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
