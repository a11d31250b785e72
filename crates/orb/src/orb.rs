//! The ORB context
//!
//! An [`Orb`] owns everything one broker instance needs: its value factory
//! registry, object adapters, connections and optional listen socket.
//! It is a cheap handle; clones share state. Teardown is explicit through
//! [`Orb::shutdown`] or [`Orb::destroy`], which fail outstanding work with
//! `Cancelled` instead of leaving callers hanging.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use cdr::ByteOrder;
use giop::{DEFAULT_FRAGMENT_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::{AdapterRegistry, ObjectAdapter, PolicySet, ROOT_ADAPTER};
use crate::connection::{Connection, ConnectionManager, ConnectionRole};
use crate::marshal::{Marshaller, Unmarshaller, DEFAULT_MAX_VALUE_DEPTH};
use crate::naming::LocalNaming;
use crate::types::{Endpoint, MarshalError, OrbError, Result};
use crate::valuetype::{ValueFactory, ValueFactoryRegistry, ValueTypeDescriptor};

/// ORB configuration
#[derive(Debug, Clone)]
pub struct OrbConfig {
    /// Name used in logs
    pub name: String,
    /// Host advertised in references when listening on a wildcard address
    pub host: String,
    /// Byte order of every message this ORB sends
    pub byte_order: ByteOrder,
    /// Messages larger than this are fragmented
    pub max_message_size: usize,
    /// Largest message, after reassembly, accepted from a peer
    pub max_receive_size: usize,
    /// Nested values allowed in one body, sending or receiving
    pub max_value_depth: usize,
    /// Accepted connections served at once
    pub max_connections: usize,
    pub connect_timeout: Duration,
    /// Per-invocation limit; `None` waits until the connection fails
    pub request_timeout: Option<Duration>,
    /// Honour BI_DIR_IIOP contexts from peers that connect to us
    pub accept_bidirectional: bool,
    /// How long `shutdown(true)` waits for in-flight work
    pub drain_timeout: Duration,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            name: "orb".to_string(),
            host: "127.0.0.1".to_string(),
            byte_order: ByteOrder::native(),
            max_message_size: DEFAULT_FRAGMENT_SIZE,
            max_receive_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_value_depth: DEFAULT_MAX_VALUE_DEPTH,
            max_connections: 1024,
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
            accept_bidirectional: true,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Builder for [`Orb`]
#[derive(Debug, Default)]
pub struct OrbBuilder {
    config: OrbConfig,
}

impl OrbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.config.byte_order = byte_order;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn max_receive_size(mut self, size: usize) -> Self {
        self.config.max_receive_size = size;
        self
    }

    pub fn max_value_depth(mut self, depth: usize) -> Self {
        self.config.max_value_depth = depth;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn accept_bidirectional(mut self, accept: bool) -> Self {
        self.config.accept_bidirectional = accept;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    pub fn build(self) -> Orb {
        Orb::new(self.config)
    }
}

/// ORB statistics
#[derive(Debug, Default)]
pub struct OrbStats {
    pub connections_opened: AtomicU64,
    pub connections_accepted: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub requests_sent: AtomicU64,
    pub replies_received: AtomicU64,
    pub requests_dispatched: AtomicU64,
    pub dispatch_failures: AtomicU64,
    pub bidirectional_registrations: AtomicU64,
}

impl OrbStats {
    pub fn snapshot(&self) -> OrbStatsSnapshot {
        OrbStatsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            replies_received: self.replies_received.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            bidirectional_registrations: self.bidirectional_registrations.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of ORB statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrbStatsSnapshot {
    pub connections_opened: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub requests_sent: u64,
    pub replies_received: u64,
    pub requests_dispatched: u64,
    pub dispatch_failures: u64,
    pub bidirectional_registrations: u64,
}

struct Listener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

struct OrbInner {
    id: Uuid,
    config: OrbConfig,
    registry: Arc<ValueFactoryRegistry>,
    adapters: AdapterRegistry,
    root: Arc<ObjectAdapter>,
    connections: ConnectionManager,
    endpoint: Arc<RwLock<Endpoint>>,
    listener: Mutex<Option<Listener>>,
    naming: LocalNaming,
    running: AtomicBool,
    stats: OrbStats,
}

impl Drop for OrbInner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.task.abort();
        }
    }
}

/// Handle to a broker instance
#[derive(Clone)]
pub struct Orb(Arc<OrbInner>);

/// Non-owning handle held by background tasks
#[derive(Clone)]
pub(crate) struct WeakOrb(Weak<OrbInner>);

impl WeakOrb {
    pub(crate) fn upgrade(&self) -> Option<Orb> {
        self.0.upgrade().map(Orb)
    }
}

impl Orb {
    pub fn new(config: OrbConfig) -> Self {
        let id = Uuid::new_v4();
        // until it listens, the ORB is only reachable over connections it opens
        let endpoint = Arc::new(RwLock::new(Endpoint::new(format!("orb-{}", id), 0)));
        let root = Arc::new(ObjectAdapter::new(ROOT_ADAPTER, PolicySet::new(), Arc::clone(&endpoint)));
        let adapters = AdapterRegistry::new();
        // the registry is empty, so this cannot collide
        let _ = adapters.insert(Arc::clone(&root));

        info!("ORB {} ({}) created", config.name, id);
        Self(Arc::new(OrbInner {
            id,
            config,
            registry: Arc::new(ValueFactoryRegistry::new()),
            adapters,
            root,
            connections: ConnectionManager::new(),
            endpoint,
            listener: Mutex::new(None),
            naming: LocalNaming::default(),
            running: AtomicBool::new(true),
            stats: OrbStats::default(),
        }))
    }

    pub fn with_defaults() -> Self {
        Self::new(OrbConfig::default())
    }

    pub fn builder() -> OrbBuilder {
        OrbBuilder::new()
    }

    pub(crate) fn downgrade(&self) -> WeakOrb {
        WeakOrb(Arc::downgrade(&self.0))
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn config(&self) -> &OrbConfig {
        &self.0.config
    }

    pub fn stats(&self) -> &OrbStats {
        &self.0.stats
    }

    /// Endpoint placed in references to local objects
    pub fn endpoint(&self) -> Endpoint {
        self.0.endpoint.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.0.running.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(OrbError::Cancelled(format!("ORB {} is shut down", self.0.config.name)))
        }
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.0.adapters
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.0.connections
    }

    pub(crate) fn local_naming(&self) -> &LocalNaming {
        &self.0.naming
    }

    /// Accept connections on `addr`; returns the bound address
    ///
    /// When bound to a wildcard address, references advertise
    /// [`OrbConfig::host`].
    pub async fn listen<A: ToSocketAddrs>(&self, addr: A) -> Result<SocketAddr> {
        self.ensure_running()?;
        if self.is_listening() {
            return Err(OrbError::Adapter("already listening".into()));
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let host = if local_addr.ip().is_unspecified() {
            self.0.config.host.clone()
        } else {
            local_addr.ip().to_string()
        };
        let endpoint = Endpoint::new(host, local_addr.port());
        *self.0.endpoint.write() = endpoint.clone();

        let task = tokio::spawn(accept_loop(
            self.downgrade(),
            listener,
            self.0.config.max_connections,
        ));
        *self.0.listener.lock() = Some(Listener { local_addr, task });
        info!("ORB {} listening on {} as {}", self.0.config.name, local_addr, endpoint);
        Ok(local_addr)
    }

    pub fn is_listening(&self) -> bool {
        self.0.listener.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.0.listener.lock().as_ref().map(|l| l.local_addr)
    }

    /// Close the listen socket; established connections stay usable and
    /// the advertised endpoint is kept
    pub fn stop_listening(&self) {
        if let Some(listener) = self.0.listener.lock().take() {
            listener.task.abort();
            info!("ORB {} stopped listening on {}", self.0.config.name, listener.local_addr);
        }
    }

    pub fn root_adapter(&self) -> Arc<ObjectAdapter> {
        Arc::clone(&self.0.root)
    }

    /// Create a named adapter with fixed policies
    pub fn create_adapter(&self, name: &str, policies: PolicySet) -> Result<Arc<ObjectAdapter>> {
        self.ensure_running()?;
        if name.is_empty() || name.contains('/') {
            return Err(OrbError::Adapter(format!("invalid adapter name {:?}", name)));
        }
        let adapter = Arc::new(ObjectAdapter::new(name, policies, Arc::clone(&self.0.endpoint)));
        self.0.adapters.insert(Arc::clone(&adapter))?;
        debug!("Created adapter {} with {:?}", name, adapter.policies());
        Ok(adapter)
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<ObjectAdapter>> {
        self.0.adapters.get(name)
    }

    pub fn value_factories(&self) -> Arc<ValueFactoryRegistry> {
        Arc::clone(&self.0.registry)
    }

    pub fn register_value_factory<F>(&self, type_id: impl Into<String>, factory: F) -> std::result::Result<(), MarshalError>
    where
        F: ValueFactory + 'static,
    {
        self.0.registry.register(type_id, factory)
    }

    /// Register a zero-initializing factory for `descriptor`
    pub fn register_value_type(&self, descriptor: &Arc<ValueTypeDescriptor>) -> std::result::Result<(), MarshalError> {
        self.0.registry.register_descriptor(descriptor)
    }

    /// Argument stream in this ORB's byte order
    pub fn marshaller(&self) -> Marshaller {
        Marshaller::new(self.0.config.byte_order).with_max_depth(self.0.config.max_value_depth)
    }

    /// Reader over a received body; references to this ORB come back local
    pub(crate) fn unmarshaller(&self, body: Bytes, byte_order: ByteOrder) -> Unmarshaller {
        Unmarshaller::new(body, byte_order, self.value_factories())
            .with_local_endpoint(self.endpoint())
            .with_max_depth(self.0.config.max_value_depth)
    }

    /// Use an already connected stream as a connection
    ///
    /// An `Initiator` connection becomes the route to `endpoint`.
    pub fn attach<S>(&self, stream: S, role: ConnectionRole, endpoint: Endpoint) -> Result<Arc<Connection>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.ensure_running()?;
        Ok(self.0.connections.adopt(self, stream, role, endpoint, None))
    }

    /// Close unused connections this ORB opened; returns how many
    pub async fn close_idle_connections(&self) -> usize {
        self.0.connections.close_idle(self.0.config.drain_timeout).await
    }

    /// Stop the ORB
    ///
    /// With `drain`, in-flight invocations and dispatches get up to
    /// [`OrbConfig::drain_timeout`] to finish. Anything left fails with
    /// `Cancelled`, peers receive CloseConnection and adapters are
    /// deactivated. Later calls fail with `Cancelled`.
    pub async fn shutdown(&self, drain: bool) {
        if !self.0.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down ORB {} (drain: {})", self.0.config.name, drain);
        self.stop_listening();
        self.0
            .connections
            .shutdown(drain, self.0.config.drain_timeout)
            .await;
        self.0.adapters.shutdown();
        info!("ORB {} shut down", self.0.config.name);
    }

    /// Shut down immediately, failing pending invocations
    pub async fn destroy(&self) {
        self.shutdown(false).await
    }
}

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before retrying after `current` failed; doubles up to the cap
fn accept_backoff(current: Option<Duration>) -> Duration {
    match current {
        None => ACCEPT_BACKOFF_MIN,
        Some(delay) => (delay * 2).min(ACCEPT_BACKOFF_MAX),
    }
}

async fn accept_loop(orb: WeakOrb, listener: TcpListener, max_connections: usize) {
    let semaphore = Arc::new(Semaphore::new(max_connections));
    let mut backoff = None;
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => {
                backoff = None;
                accepted
            }
            Err(e) => {
                // e.g. EMFILE; persists until descriptors free up
                let delay = accept_backoff(backoff);
                error!("Accept failed: {}, retrying in {:?}", e, delay);
                backoff = Some(delay);
                tokio::time::sleep(delay).await;
                match orb.upgrade() {
                    Some(orb) if orb.is_running() => continue,
                    _ => break,
                }
            }
        };
        let orb = match orb.upgrade() {
            Some(orb) if orb.is_running() => orb,
            _ => break,
        };

        let permit = match Arc::clone(&semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Connection limit reached, rejecting {}", addr);
                orb.stats().connections_rejected.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {}", e);
        }

        orb.stats().connections_accepted.fetch_add(1, Ordering::Relaxed);
        orb.connections().adopt(
            &orb,
            stream,
            ConnectionRole::Acceptor,
            Endpoint::from_socket_addr(addr),
            Some(permit),
        );
    }
}

impl fmt::Debug for Orb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orb")
            .field("name", &self.0.config.name)
            .field("id", &self.0.id)
            .field("endpoint", &self.endpoint())
            .field("running", &self.is_running())
            .finish()
    }
}
