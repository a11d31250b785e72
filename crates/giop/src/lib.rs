//! GIOP 1.2 framing and stream transport
//!
//! This crate turns a byte stream into GIOP messages and back:
//!
//! - [`message`] - header and body codecs for every message kind
//! - [`service_context`] - service contexts carried by requests (bidirectional listen points)
//! - [`fragmentation`] - splitting large messages and reassembling them by request id
//! - [`transport`] - async reader/writer over any `AsyncRead`/`AsyncWrite`
//!
//! # Example
//!
//! ```no_run
//! use giop::{GiopTransport, Message, RequestMessage};
//! use cdr::ByteOrder;
//! use bytes::Bytes;
//!
//! # async fn demo(stream: tokio::net::TcpStream) -> giop::Result<()> {
//! let mut transport = GiopTransport::new(stream);
//! let request = RequestMessage::new(1, Bytes::from_static(b"NameService"), "resolve", Bytes::new());
//! transport
//!     .write_message(&Message::Request(request), ByteOrder::BigEndian)
//!     .await?;
//! let (reply, _byte_order) = transport.read_message().await?;
//! println!("{:?}", reply.message_type());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fragmentation;
pub mod message;
pub mod service_context;
pub mod transport;

pub use error::{GiopError, Result};
pub use fragmentation::{FragmentAssembler, FragmentGenerator, Reassembler};
pub use message::{
    CancelRequestMessage, FragmentMessage, Frame, LocateReplyMessage, LocateRequestMessage,
    LocateStatus, Message, MessageFlags, MessageHeader, MessageType, ReplyMessage, ReplyStatus,
    RequestMessage, ServiceContext, GIOP_MAGIC, GIOP_VERSION_MAJOR, GIOP_VERSION_MINOR,
};
pub use service_context::{service_id, BiDirContext, ListenPoint};
pub use transport::{GiopTransport, DEFAULT_FRAGMENT_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
