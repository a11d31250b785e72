//! Connections and the connection manager
//!
//! One [`Connection`] wraps one duplex byte stream, whichever side opened
//! it. Outbound requests and inbound requests share the stream:
//!
//! ```text
//!              ┌──────────── writer (tokio Mutex) ◄── send_request / replies
//!   stream ────┤
//!              └──────────── reader task ──► Reply/LocateReply ─► pending table
//!                                        └─► Request ─► spawned dispatch
//! ```
//!
//! The reader never waits on a dispatch, so a peer may call back into us
//! while we wait for its reply to an earlier request.

#[allow(clippy::module_inception)]
mod connection;
mod manager;

pub use connection::{Connection, ConnectionId, ConnectionRole, ConnectionState};
pub(crate) use connection::PendingReply;
pub use manager::ConnectionManager;
