//! TCP server for accepting and managing client sessions.
//!
//! The accept loop turns every connection into a [`NetworkServerSession`]
//! and reports session lifecycle and incoming messages as [`ServerEvent`]s
//! on a single ordered channel.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc, watch};

use crate::session::NetworkServerSession;
use crate::wire::WireMessage;

/// Default TCP port of the game server.
pub const DEFAULT_PORT: u16 = 8642;

/// Unique identifier for a session within one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Atomic generator for monotonically increasing [`SessionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`SessionId`].
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned when the session map is at capacity.
#[derive(Debug)]
pub struct ConnectionLimitReached;

/// Thread-safe map of live sessions keyed by [`SessionId`].
pub struct SessionMap {
    inner: RwLock<HashMap<SessionId, Arc<NetworkServerSession>>>,
    max_connections: usize,
}

impl SessionMap {
    /// Create a new map with the given capacity limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Reserve capacity check without inserting.
    pub async fn is_full(&self) -> bool {
        self.inner.read().await.len() >= self.max_connections
    }

    /// Insert a session. Returns `Err` if the map is at capacity.
    pub async fn insert(
        &self,
        session: Arc<NetworkServerSession>,
    ) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().await;
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(session.id(), session);
        Ok(())
    }

    /// Remove a session by ID.
    pub async fn remove(&self, id: SessionId) -> Option<Arc<NetworkServerSession>> {
        self.inner.write().await.remove(&id)
    }

    /// Look up a session by ID.
    pub async fn get(&self, id: SessionId) -> Option<Arc<NetworkServerSession>> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Snapshot of all live sessions.
    pub async fn all(&self) -> Vec<Arc<NetworkServerSession>> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Return the number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Return whether the map is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Lifecycle and traffic notifications emitted by a [`NetworkServer`].
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A connection was accepted and its session started reading.
    SessionAccepted(Arc<NetworkServerSession>),
    /// A complete, valid message arrived on a session.
    MessageReceived {
        session: SessionId,
        message: WireMessage,
    },
    /// A session closed. Emitted exactly once per session.
    SessionClosed(SessionId),
}

/// Configuration for [`NetworkServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Default: `0.0.0.0:8642`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent sessions. Default: 16.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 16,
        }
    }
}

/// TCP server that accepts connections and manages their sessions.
pub struct NetworkServer {
    config: ServerConfig,
    /// Live session map (public for test inspection).
    pub sessions: Arc<SessionMap>,
    id_gen: Arc<IdGenerator>,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl NetworkServer {
    /// Create a new server with the given configuration.
    ///
    /// Returns the server and the receiving end of its event channel.
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events, events_rx) = mpsc::unbounded_channel();
        let server = Self {
            sessions: Arc::new(SessionMap::new(config.max_connections)),
            id_gen: Arc::new(IdGenerator::new()),
            config,
            events,
            shutdown_tx,
            shutdown_rx,
        };
        (server, events_rx)
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Server listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {e}");
                            continue;
                        }
                    };

                    if self.sessions.is_full().await {
                        tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                        continue;
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!("Failed to set TCP_NODELAY for {peer_addr}: {e}");
                    }

                    let id = self.id_gen.next_id();
                    let session = NetworkServerSession::start(
                        id,
                        peer_addr,
                        stream,
                        self.events.clone(),
                        self.shutdown_rx.clone(),
                    );
                    if self.sessions.insert(Arc::clone(&session)).await.is_err() {
                        tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                        session.close();
                        continue;
                    }

                    tracing::info!("Accepted {id} from {peer_addr}");

                    let sessions = Arc::clone(&self.sessions);
                    tokio::spawn(async move {
                        session.closed().await;
                        sessions.remove(id).await;
                        tracing::info!("{id} closed");
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the server and every session to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether [`NetworkServer::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Look up a live session.
    pub async fn session(&self, id: SessionId) -> Option<Arc<NetworkServerSession>> {
        self.sessions.get(id).await
    }
}
