//! Invocation engine
//!
//! Turns `(reference, operation, arguments)` into a GIOP request, sends it
//! on the connection reaching the reference's endpoint and waits for the
//! matching reply. Local references skip the network and go straight to
//! the adapters.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use cdr::ByteOrder;
use giop::{BiDirContext, GiopError, ListenPoint, LocateStatus, Message, ReplyStatus, RequestMessage};
use tracing::{debug, trace};

use crate::adapter::{InboundRequest, Origin};
use crate::connection::{Connection, ConnectionRole};
use crate::marshal::{Marshaller, Unmarshaller};
use crate::orb::Orb;
use crate::types::{MarshalError, ObjectReference, OrbError, Result, SystemException, UserException};

/// Outcome of a two-way invocation that reached the target
#[derive(Debug)]
pub enum Reply {
    /// Normal completion; read results from the unmarshaller
    Return(Unmarshaller),
    /// The operation raised a user exception
    UserException(UserException),
}

impl Reply {
    /// Turn a user exception into `OrbError::Application`
    pub fn into_result(self) -> Result<Unmarshaller> {
        match self {
            Reply::Return(results) => Ok(results),
            Reply::UserException(ex) => Err(OrbError::Application(ex)),
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Reply::UserException(_))
    }
}

impl Orb {
    /// Invoke `operation` and wait for its reply
    ///
    /// `args` must come from [`Orb::marshaller`] so its byte order
    /// matches the connection's.
    pub async fn invoke(&self, target: &ObjectReference, operation: &str, args: Marshaller) -> Result<Reply> {
        self.ensure_running()?;
        if target.is_local() {
            return self.invoke_collocated(target, operation, args).await;
        }

        let conn = self.connections().connect(self, target.endpoint()).await?;
        let (request, offered) = self.build_request(&conn, target, operation, args)?;
        let pending = conn.send_request(request).await?;
        self.offer_sent(&conn, offered);
        self.stats().requests_sent.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Sent {} to {} as request {} on connection {}",
            operation,
            target,
            pending.request_id(),
            conn.id()
        );

        let (message, byte_order) = conn
            .await_response(pending, self.config().request_timeout)
            .await?;
        self.stats().replies_received.fetch_add(1, Ordering::Relaxed);
        match message {
            Message::Reply(reply) => self.decode_reply(target, operation, reply.status, reply.body, byte_order),
            other => Err(OrbError::Protocol(GiopError::InvalidMessage(format!(
                "expected a reply, got {:?}",
                other.message_type()
            )))),
        }
    }

    /// Send `operation` without waiting for, or receiving, a reply
    pub async fn invoke_oneway(&self, target: &ObjectReference, operation: &str, args: Marshaller) -> Result<()> {
        self.ensure_running()?;
        if target.is_local() {
            let inbound = InboundRequest {
                object_key: target.object_key().clone(),
                operation: operation.to_string(),
                byte_order: args.byte_order(),
                body: args.into_bytes(),
                origin: Origin::Collocated,
                connection: None,
            };
            let orb = self.clone();
            tokio::spawn(async move {
                orb.adapters().dispatch(&orb, inbound).await;
            });
            return Ok(());
        }

        let conn = self.connections().connect(self, target.endpoint()).await?;
        let (request, offered) = self.build_request(&conn, target, operation, args)?;
        conn.send_oneway(request).await?;
        self.offer_sent(&conn, offered);
        self.stats().requests_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Ask the target's ORB whether the object exists
    pub async fn locate(&self, target: &ObjectReference) -> Result<bool> {
        self.ensure_running()?;
        if target.is_local() {
            return Ok(self.adapters().locate(target.object_key()) == LocateStatus::ObjectHere);
        }

        let conn = self.connections().connect(self, target.endpoint()).await?;
        let pending = conn.send_locate(target.object_key().clone()).await?;
        let (message, _) = conn
            .await_response(pending, self.config().request_timeout)
            .await?;
        match message {
            Message::LocateReply(reply) => match reply.status {
                LocateStatus::ObjectHere => Ok(true),
                LocateStatus::UnknownObject => Ok(false),
                LocateStatus::ObjectForward => Err(OrbError::Protocol(GiopError::InvalidMessage(
                    "OBJECT_FORWARD is not supported".into(),
                ))),
            },
            other => Err(OrbError::Protocol(GiopError::InvalidMessage(format!(
                "expected a locate reply, got {:?}",
                other.message_type()
            )))),
        }
    }

    async fn invoke_collocated(&self, target: &ObjectReference, operation: &str, args: Marshaller) -> Result<Reply> {
        trace!("Collocated call {} on {}", operation, target);
        let inbound = InboundRequest {
            object_key: target.object_key().clone(),
            operation: operation.to_string(),
            byte_order: args.byte_order(),
            body: args.into_bytes(),
            origin: Origin::Collocated,
            connection: None,
        };
        let (status, body) = self.adapters().dispatch(self, inbound).await;
        self.decode_reply(target, operation, status, body, self.config().byte_order)
    }

    fn build_request(
        &self,
        conn: &Arc<Connection>,
        target: &ObjectReference,
        operation: &str,
        args: Marshaller,
    ) -> Result<(RequestMessage, bool)> {
        if args.byte_order() != conn.byte_order() {
            return Err(MarshalError::ByteOrderMismatch {
                expected: conn.byte_order(),
                actual: args.byte_order(),
            }
            .into());
        }
        let mut request = RequestMessage::new(0, target.object_key().clone(), operation, args.into_bytes());
        let offered = self.offer_bidirectional(conn, &mut request);
        Ok((request, offered))
    }

    /// Attach a BI_DIR_IIOP context to requests on a connection we opened
    /// while a bidirectional adapter exists, until one such request has
    /// been sent; returns whether this request carries it
    fn offer_bidirectional(&self, conn: &Arc<Connection>, request: &mut RequestMessage) -> bool {
        if conn.role() != ConnectionRole::Initiator
            || conn.is_bidirectional()
            || !self.adapters().any_bidirectional()
        {
            return false;
        }
        let endpoint = self.endpoint();
        debug!(
            "Offering bidirectional use of connection {} as {}",
            conn.id(),
            endpoint
        );
        let context = BiDirContext::new(vec![ListenPoint::from(&endpoint)]);
        request
            .service_contexts
            .push(context.to_service_context(conn.byte_order()));
        true
    }

    /// The peer has the offer once the request carrying it is written
    fn offer_sent(&self, conn: &Connection, offered: bool) {
        if offered && !conn.mark_bidirectional() {
            debug!("Connection {} is bidirectional", conn.id());
        }
    }

    fn decode_reply(
        &self,
        target: &ObjectReference,
        operation: &str,
        status: ReplyStatus,
        body: Bytes,
        byte_order: ByteOrder,
    ) -> Result<Reply> {
        let mut results = self.unmarshaller(body, byte_order);
        match status {
            ReplyStatus::NoException => Ok(Reply::Return(results)),
            ReplyStatus::UserException => Ok(Reply::UserException(UserException::decode(&mut results)?)),
            ReplyStatus::SystemException => {
                let ex = SystemException::decode(&mut results)?;
                debug!("{} on {} raised {}", operation, target, ex);
                Err(OrbError::from_system_exception(ex, &target.key_string(), operation))
            }
            ReplyStatus::LocationForward => Err(OrbError::Protocol(GiopError::InvalidMessage(
                "LOCATION_FORWARD replies are not supported".into(),
            ))),
        }
    }
}
