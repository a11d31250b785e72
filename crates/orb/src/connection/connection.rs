//! A single GIOP connection usable in both directions

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cdr::ByteOrder;
use giop::{
    BiDirContext, CancelRequestMessage, GiopError, GiopTransport, LocateRequestMessage, LocateReplyMessage,
    LocateStatus, Message, ReplyMessage, RequestMessage,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::adapter::{InboundRequest, Origin};
use crate::orb::{Orb, WeakOrb};
use crate::types::{Endpoint, OrbError, Result};

/// Identifier of a connection within its ORB
pub type ConnectionId = u64;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type ReplyResult = Result<(Message, ByteOrder)>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Established,
    Closing,
    Closed,
}

/// Which side opened the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Initiator,
    Acceptor,
}

/// Why a reader loop stopped
enum Exit {
    Eof,
    PeerClosed,
    PeerError,
    Violation(GiopError),
    Io(GiopError),
    OrbDropped,
}

/// One duplex stream plus its table of requests awaiting replies
pub struct Connection {
    id: ConnectionId,
    role: ConnectionRole,
    peer: Endpoint,
    byte_order: ByteOrder,
    state: Mutex<ConnectionState>,
    writer: AsyncMutex<GiopTransport<BoxedWriter>>,
    next_request_id: AtomicU32,
    pending: Mutex<HashMap<u32, oneshot::Sender<ReplyResult>>>,
    /// Peer may send requests over this connection (bidirectional GIOP)
    bidirectional: AtomicBool,
    /// Outbound invocations and inbound dispatches in flight
    outstanding: AtomicUsize,
    idle: Notify,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps a connection marked busy while alive
pub(crate) struct OutstandingGuard(Arc<Connection>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        if self.0.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_one();
        }
    }
}

/// A sent request whose reply has not been read yet
pub(crate) struct PendingReply {
    request_id: u32,
    rx: oneshot::Receiver<ReplyResult>,
    _guard: OutstandingGuard,
}

impl PendingReply {
    pub(crate) fn request_id(&self) -> u32 {
        self.request_id
    }
}

impl Connection {
    /// Split `stream`, start the reader task and return the established connection
    pub(crate) fn open<S>(
        id: ConnectionId,
        role: ConnectionRole,
        peer: Endpoint,
        stream: S,
        orb: &Orb,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let config = orb.config();
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = GiopTransport::new(Box::new(read_half) as BoxedReader)
            .with_max_message_size(config.max_receive_size);
        let writer = GiopTransport::new(Box::new(write_half) as BoxedWriter)
            .with_fragment_size(config.max_message_size);

        // GIOP 1.2: initiator uses even request ids, acceptor odd
        let first_id = match role {
            ConnectionRole::Initiator => 0,
            ConnectionRole::Acceptor => 1,
        };

        let conn = Arc::new(Self {
            id,
            role,
            peer,
            byte_order: config.byte_order,
            state: Mutex::new(ConnectionState::Connecting),
            writer: AsyncMutex::new(writer),
            next_request_id: AtomicU32::new(first_id),
            pending: Mutex::new(HashMap::new()),
            bidirectional: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
            reader: Mutex::new(None),
        });

        let handle = tokio::spawn(read_loop(Arc::clone(&conn), reader, orb.downgrade(), permit));
        *conn.reader.lock() = Some(handle);
        conn.set_state(ConnectionState::Established);
        info!("Connection {} established ({:?}, peer {})", id, role, conn.peer);
        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Dialled endpoint, or the socket address of an accepted peer
    pub fn peer(&self) -> &Endpoint {
        &self.peer
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        // never leave Closing/Closed for an earlier state
        if (state as u8) > (*current as u8) {
            trace!("Connection {}: {:?} -> {:?}", self.id, *current, state);
            *current = state;
        }
    }

    pub fn is_bidirectional(&self) -> bool {
        self.bidirectional.load(Ordering::SeqCst)
    }

    /// Mark as bidirectional; returns whether it already was
    pub(crate) fn mark_bidirectional(&self) -> bool {
        self.bidirectional.swap(true, Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn track(self: &Arc<Self>) -> OutstandingGuard {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        OutstandingGuard(Arc::clone(self))
    }

    fn next_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(2, Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Established => Ok(()),
            ConnectionState::Closing => Err(OrbError::Cancelled(format!("connection {} is closing", self.id))),
            ConnectionState::Closed => Err(OrbError::Transient(format!("connection to {} is closed", self.peer))),
        }
    }

    /// Register the request id then write the message
    async fn send_tracked(self: &Arc<Self>, message: impl FnOnce(u32) -> Message) -> Result<PendingReply> {
        let guard = self.track();
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        let sent = match self.check_open() {
            Ok(()) => self.write_message(&message(request_id)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.pending.lock().remove(&request_id);
            return Err(e);
        }

        Ok(PendingReply {
            request_id,
            rx,
            _guard: guard,
        })
    }

    /// Send a request expecting a reply; the request id is assigned here
    pub(crate) async fn send_request(self: &Arc<Self>, mut request: RequestMessage) -> Result<PendingReply> {
        request.response_expected = true;
        trace!("Connection {}: sending {}", self.id, request.operation);
        self.send_tracked(move |id| {
            request.request_id = id;
            Message::Request(request)
        })
        .await
    }

    /// Send a request without registering for a reply
    pub(crate) async fn send_oneway(self: &Arc<Self>, mut request: RequestMessage) -> Result<()> {
        self.check_open()?;
        let _guard = self.track();
        request.response_expected = false;
        request.request_id = self.next_request_id();
        self.write_message(&Message::Request(request)).await
    }

    pub(crate) async fn send_locate(self: &Arc<Self>, object_key: Bytes) -> Result<PendingReply> {
        self.send_tracked(move |request_id| {
            Message::LocateRequest(LocateRequestMessage {
                request_id,
                object_key,
            })
        })
        .await
    }

    /// Wait for the reply to a sent request
    ///
    /// On timeout the request is forgotten, a CancelRequest is sent and
    /// the call fails with `Cancelled`.
    pub(crate) async fn await_response(
        &self,
        pending: PendingReply,
        timeout: Option<Duration>,
    ) -> Result<(Message, ByteOrder)> {
        let PendingReply {
            request_id,
            rx,
            _guard,
        } = pending;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.lock().remove(&request_id);
                    self.cancel(request_id).await;
                    return Err(OrbError::Cancelled(format!(
                        "request {} timed out after {:?}",
                        request_id, limit
                    )));
                }
            },
            None => rx.await,
        };

        match received {
            Ok(result) => result,
            Err(_) => Err(OrbError::Transient(format!(
                "connection to {} dropped request {}",
                self.peer, request_id
            ))),
        }
    }

    async fn cancel(&self, request_id: u32) {
        let message = Message::CancelRequest(CancelRequestMessage { request_id });
        if let Err(e) = self.write_message(&message).await {
            debug!("Connection {}: cancel of {} not sent: {}", self.id, request_id, e);
        }
    }

    /// Write one whole message; fragments never interleave with other writers
    pub(crate) async fn write_message(&self, message: &Message) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_message(message, self.byte_order).await?;
        Ok(())
    }

    fn complete(&self, request_id: u32, result: ReplyResult) {
        let waiter = self.pending.lock().remove(&request_id);
        match waiter {
            // the caller may have given up already
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!("Connection {}: reply for unknown request {}", self.id, request_id),
        }
    }

    /// Fail every request still awaiting a reply
    pub(crate) fn fail_pending(&self, error: impl Fn() -> OrbError) {
        let waiters: Vec<_> = self.pending.lock().drain().collect();
        if !waiters.is_empty() {
            debug!("Connection {}: failing {} pending requests", self.id, waiters.len());
        }
        for (_, tx) in waiters {
            let _ = tx.send(Err(error()));
        }
    }

    /// Route a request from the peer to the local adapters
    fn dispatch_inbound(self: &Arc<Self>, orb: &Orb, request: RequestMessage, byte_order: ByteOrder) {
        if self.role == ConnectionRole::Acceptor {
            match BiDirContext::find(&request.service_contexts) {
                Ok(Some(bidir)) => orb
                    .connections()
                    .register_listen_points(orb, self, &bidir.listen_points),
                Ok(None) => {}
                Err(e) => warn!("Connection {}: bad BI_DIR_IIOP context: {}", self.id, e),
            }
        }

        let origin = match self.role {
            ConnectionRole::Acceptor => Origin::Accepted,
            ConnectionRole::Initiator => Origin::Initiated,
        };
        let guard = self.track();
        let conn = Arc::clone(self);
        let orb = orb.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let request_id = request.request_id;
            let response_expected = request.response_expected;
            let inbound = InboundRequest {
                object_key: request.object_key,
                operation: request.operation,
                body: request.body,
                byte_order,
                origin,
                connection: Some(conn.id),
            };

            let (status, body) = orb.adapters().dispatch(&orb, inbound).await;
            if response_expected {
                let reply = Message::Reply(ReplyMessage::new(request_id, status, body));
                if let Err(e) = conn.write_message(&reply).await {
                    debug!("Connection {}: reply {} not sent: {}", conn.id, request_id, e);
                }
            }
        });
    }

    fn answer_locate(self: &Arc<Self>, status: LocateStatus, request_id: u32) {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let reply = Message::LocateReply(LocateReplyMessage { request_id, status });
            if let Err(e) = conn.write_message(&reply).await {
                debug!("Connection {}: locate reply not sent: {}", conn.id, e);
            }
        });
    }

    /// Orderly close
    ///
    /// With `drain`, waits up to `timeout` for outstanding work. Whatever
    /// is left fails with `Cancelled`; the peer gets a CloseConnection.
    pub async fn close(&self, drain: bool, timeout: Duration) {
        {
            let mut state = self.state.lock();
            if matches!(*state, ConnectionState::Closing | ConnectionState::Closed) {
                return;
            }
            *state = ConnectionState::Closing;
        }
        debug!("Closing connection {} (drain: {})", self.id, drain);

        if drain {
            let drained = tokio::time::timeout(timeout, async {
                while self.outstanding() > 0 {
                    self.idle.notified().await;
                }
            })
            .await;
            if drained.is_err() {
                warn!(
                    "Connection {}: {} requests still outstanding after {:?}",
                    self.id,
                    self.outstanding(),
                    timeout
                );
            }
        }

        let id = self.id;
        self.fail_pending(|| OrbError::Cancelled(format!("connection {} shut down", id)));
        let goodbye = async {
            self.write_message(&Message::CloseConnection).await?;
            self.writer.lock().await.shutdown().await?;
            Ok::<_, OrbError>(())
        };
        match tokio::time::timeout(timeout, goodbye).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Connection {}: CloseConnection not sent: {}", self.id, e),
            Err(_) => debug!("Connection {}: writer busy, dropping without CloseConnection", self.id),
        }

        self.set_state(ConnectionState::Closed);
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        info!("Connection {} closed", self.id);
    }

    async fn finish(&self, exit: Exit) {
        self.set_state(ConnectionState::Closed);
        let peer = self.peer.clone();
        match exit {
            Exit::Eof => {
                info!("Connection {} closed by {}", self.id, peer);
                self.fail_pending(|| OrbError::Transient(format!("connection to {} closed", peer)));
            }
            Exit::PeerClosed => {
                info!("Connection {}: {} sent CloseConnection", self.id, peer);
                self.fail_pending(|| OrbError::Transient(format!("{} closed the connection", peer)));
            }
            Exit::PeerError => {
                warn!("Connection {}: {} reported a message error", self.id, peer);
                self.fail_pending(|| {
                    OrbError::Protocol(GiopError::InvalidMessage("peer reported a message error".into()))
                });
            }
            Exit::Violation(e) => {
                warn!("Connection {}: protocol violation: {}", self.id, e);
                let _ = self.write_message(&Message::MessageError).await;
                let reason = e.to_string();
                self.fail_pending(|| OrbError::Protocol(GiopError::InvalidMessage(reason.clone())));
            }
            Exit::Io(e) => {
                info!("Connection {}: read failed: {}", self.id, e);
                let reason = e.to_string();
                self.fail_pending(|| OrbError::Transient(reason.clone()));
            }
            Exit::OrbDropped => {
                self.fail_pending(|| OrbError::Cancelled("ORB destroyed".into()));
            }
        }
        let _ = self.writer.lock().await.shutdown().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("bidirectional", &self.is_bidirectional())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

async fn read_loop(
    conn: Arc<Connection>,
    mut reader: GiopTransport<BoxedReader>,
    orb: WeakOrb,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let exit = loop {
        let (message, byte_order) = match reader.read_message().await {
            Ok(received) => received,
            Err(GiopError::ConnectionClosed) => break Exit::Eof,
            Err(e) if e.is_protocol_violation() => break Exit::Violation(e),
            Err(e) => break Exit::Io(e),
        };
        trace!("Connection {}: received {:?}", conn.id, message.message_type());

        match message {
            Message::Reply(reply) => {
                conn.complete(reply.request_id, Ok((Message::Reply(reply), byte_order)));
            }
            Message::LocateReply(reply) => {
                conn.complete(reply.request_id, Ok((Message::LocateReply(reply), byte_order)));
            }
            Message::Request(request) => match orb.upgrade() {
                Some(orb) => conn.dispatch_inbound(&orb, request, byte_order),
                None => break Exit::OrbDropped,
            },
            Message::LocateRequest(request) => {
                let status = orb
                    .upgrade()
                    .map(|orb| orb.adapters().locate(&request.object_key))
                    .unwrap_or(LocateStatus::UnknownObject);
                conn.answer_locate(status, request.request_id);
            }
            Message::CancelRequest(cancel) => {
                // the dispatch runs to completion; its reply is discarded by the peer
                debug!("Connection {}: peer cancelled request {}", conn.id, cancel.request_id);
            }
            Message::CloseConnection => break Exit::PeerClosed,
            Message::MessageError => break Exit::PeerError,
            Message::Fragment(fragment) => {
                break Exit::Violation(GiopError::UnexpectedFragment(fragment.request_id))
            }
        }
    };

    conn.finish(exit).await;
    if let Some(orb) = orb.upgrade() {
        orb.connections().remove(conn.id);
    }
}
