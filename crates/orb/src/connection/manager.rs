//! Connection table and endpoint routes

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use giop::ListenPoint;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit};
use tracing::{debug, info};

use super::connection::{Connection, ConnectionId, ConnectionRole, ConnectionState};
use crate::orb::Orb;
use crate::types::{Endpoint, OrbError, Result};

/// Owns every connection of one ORB
///
/// `routes` maps an endpoint to the connection that reaches it: the one we
/// dialled, or an accepted connection whose peer advertised that endpoint
/// in a BI_DIR_IIOP context.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    routes: RwLock<HashMap<Endpoint, ConnectionId>>,
    connect_lock: AsyncMutex<()>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Connection>> {
        let mut list: Vec<_> = self.connections.read().values().cloned().collect();
        list.sort_by_key(|c| c.id());
        list
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Established connection reaching `endpoint`, if any
    pub fn route(&self, endpoint: &Endpoint) -> Option<Arc<Connection>> {
        let id = *self.routes.read().get(endpoint)?;
        self.get(id)
            .filter(|conn| conn.state() == ConnectionState::Established)
    }

    /// Reuse a route to `endpoint` or dial it
    pub(crate) async fn connect(&self, orb: &Orb, endpoint: &Endpoint) -> Result<Arc<Connection>> {
        if let Some(conn) = self.route(endpoint) {
            return Ok(conn);
        }
        if endpoint.is_synthetic() {
            return Err(OrbError::Unreachable {
                endpoint: endpoint.clone(),
                reason: "peer does not listen and has no bidirectional connection to us".into(),
            });
        }

        let _dialing = self.connect_lock.lock().await;
        if let Some(conn) = self.route(endpoint) {
            return Ok(conn);
        }

        let timeout = orb.config().connect_timeout;
        debug!("Connecting to {}", endpoint);
        let dial = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let stream = match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(OrbError::Unreachable {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(OrbError::Unreachable {
                    endpoint: endpoint.clone(),
                    reason: format!("connect timed out after {:?}", timeout),
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {}", e);
        }

        orb.stats().connections_opened.fetch_add(1, Ordering::Relaxed);
        Ok(self.adopt(orb, stream, ConnectionRole::Initiator, endpoint.clone(), None))
    }

    /// Take ownership of an already connected stream
    pub(crate) fn adopt<S>(
        &self,
        orb: &Orb,
        stream: S,
        role: ConnectionRole,
        peer: Endpoint,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = Connection::open(id, role, peer.clone(), stream, orb, permit);
        self.connections.write().insert(id, Arc::clone(&conn));
        if role == ConnectionRole::Initiator {
            self.routes.write().insert(peer, id);
        }
        conn
    }

    /// Make the peer's advertised endpoints reachable over `conn`
    pub(crate) fn register_listen_points(&self, orb: &Orb, conn: &Arc<Connection>, points: &[ListenPoint]) {
        if !orb.config().accept_bidirectional {
            debug!("Ignoring BI_DIR_IIOP context on connection {}", conn.id());
            return;
        }
        if points.is_empty() {
            return;
        }

        let mut routes = self.routes.write();
        for point in points {
            let endpoint = Endpoint::from(point.clone());
            if routes.get(&endpoint) == Some(&conn.id()) {
                continue;
            }
            info!("Connection {} now reaches {} (bidirectional)", conn.id(), endpoint);
            routes.insert(endpoint, conn.id());
            orb.stats()
                .bidirectional_registrations
                .fetch_add(1, Ordering::Relaxed);
        }
        conn.mark_bidirectional();
    }

    pub(crate) fn remove(&self, id: ConnectionId) {
        if self.connections.write().remove(&id).is_some() {
            self.routes.write().retain(|_, route| *route != id);
            debug!("Connection {} removed", id);
        }
    }

    /// Close initiated connections nobody is using; returns how many
    pub(crate) async fn close_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<_> = self
            .list()
            .into_iter()
            .filter(|c| {
                c.role() == ConnectionRole::Initiator
                    && c.outstanding() == 0
                    && !c.is_bidirectional()
                    && c.state() == ConnectionState::Established
            })
            .collect();
        for conn in &idle {
            self.remove(conn.id());
        }
        join_all(idle.iter().map(|c| c.close(false, timeout))).await;
        idle.len()
    }

    /// Close every connection, draining first when asked
    pub(crate) async fn shutdown(&self, drain: bool, timeout: Duration) {
        let all: Vec<_> = self.connections.write().drain().map(|(_, c)| c).collect();
        self.routes.write().clear();
        if !all.is_empty() {
            info!("Closing {} connections", all.len());
        }
        join_all(all.iter().map(|c| c.close(drain, timeout))).await;
    }
}
