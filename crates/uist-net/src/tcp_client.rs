//! TCP client for connecting to a UIST game server.
//!
//! A [`NetworkClient`] owns a background connection task. Commands
//! (connect, disconnect, reconnect) are posted to that task, so they are safe
//! to issue from any thread. State changes are published via a [`watch`]
//! channel and lifecycle plus incoming traffic via an ordered
//! [`ClientEvent`] channel.
//!
//! Outgoing messages go through one queue that outlives individual
//! connections. The connection task drains it only while connected, one
//! write at a time, so messages queued before the connection is up are
//! delivered in order as soon as it is.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpStream, lookup_host};
use tokio::sync::{mpsc, watch};

use crate::reconnection::{ReconnectConfig, ReconnectState};
use crate::tcp_server::DEFAULT_PORT;
use crate::wire::{WireMessage, read_message, write_message};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    Idle,
    /// Resolving the server address.
    Resolving,
    /// Attempting to establish a TCP connection.
    Connecting,
    /// Connected and reading messages.
    Connected,
    /// An attempt failed and the next one is scheduled.
    Retrying,
    /// The client has shut down and will not connect again.
    Closed,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Idle`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Idle);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection is up and the read cycle has started.
    Established { peer: SocketAddr },
    /// Resolving or connecting failed. The client is idle again.
    Failed { reason: String },
    /// An established connection ended. The client is idle again.
    Closed { reason: String },
}

/// Everything a [`NetworkClient`] reports, in order of occurrence.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connection(ConnectionEvent),
    MessageReceived(WireMessage),
}

/// Error returned when a message cannot be queued.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The endpoint has shut down.
    #[error("network endpoint has stopped")]
    Stopped,
}

/// Configuration for [`NetworkClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Give up on a connection attempt after this long. Default: 5 s.
    pub connect_timeout: Duration,
    /// Retry failed connection attempts with backoff. Default: disabled.
    pub reconnect: Option<ReconnectConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect: None,
        }
    }
}

/// Append [`DEFAULT_PORT`] to `address` unless it already names a port.
pub fn with_default_port(address: &str) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_PORT).to_string();
    }
    match address.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{address}:{DEFAULT_PORT}"),
    }
}

#[derive(Debug)]
enum Command {
    Connect(String),
    Disconnect,
    Reconnect,
    Retry,
    Shutdown,
}

/// Handle to the client side of a server connection.
pub struct NetworkClient {
    commands: mpsc::UnboundedSender<Command>,
    outbound: mpsc::UnboundedSender<WireMessage>,
    state: Arc<ConnectionStateWatch>,
}

impl NetworkClient {
    /// Spawn the connection task. Must be called from within a Tokio runtime.
    ///
    /// Returns the client and the receiving end of its event channel.
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ConnectionStateWatch::new());

        let task = ConnectionTask {
            retry: config.reconnect.clone().map(ReconnectState::new),
            config,
            commands: commands_rx,
            outbound: outbound_rx,
            events,
            state: Arc::clone(&state),
        };
        tokio::spawn(task.run());

        (
            Self {
                commands,
                outbound,
                state,
            },
            events_rx,
        )
    }

    /// Return the connection state watch.
    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.state.current() == ConnectionState::Connected
    }

    /// Whether the client is idle and a new connection can be started.
    pub fn accepts_connection(&self) -> bool {
        self.state.current() == ConnectionState::Idle
    }

    /// Connect to `address` (host or `host:port`), replacing any current
    /// connection.
    pub fn connect_to_server(&self, address: &str) {
        self.post(Command::Connect(address.to_string()));
    }

    /// Close the current connection, if any.
    pub fn disconnect_from_server(&self) {
        self.post(Command::Disconnect);
    }

    /// Drop the current connection, if any, and connect to the last address
    /// again.
    pub fn reconnect_to_server(&self) {
        self.post(Command::Reconnect);
    }

    /// Stop the connection task for good.
    pub fn shutdown(&self) {
        self.post(Command::Shutdown);
    }

    /// Queue a message for the server. It is written once a connection is
    /// established, after everything queued before it.
    pub fn send(&self, message: WireMessage) -> Result<(), SendError> {
        self.outbound.send(message).map_err(|_| SendError::Stopped)
    }

    /// Wait until a connection is established, then queue `message`.
    pub async fn send_when_connected(&self, message: WireMessage) -> Result<(), SendError> {
        let mut state = self.state.subscribe();
        state
            .wait_for(|state| matches!(state, ConnectionState::Connected | ConnectionState::Closed))
            .await
            .map_err(|_| SendError::Stopped)?;
        if self.state.current() == ConnectionState::Closed {
            return Err(SendError::Stopped);
        }
        self.send(message)
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Network client task has stopped, ignoring command");
        }
    }
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

struct ConnectionTask {
    config: ClientConfig,
    retry: Option<ReconnectState>,
    commands: mpsc::UnboundedReceiver<Command>,
    outbound: mpsc::UnboundedReceiver<WireMessage>,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: Arc<ConnectionStateWatch>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut address: Option<String> = None;
        let mut pending: Option<Command> = None;

        loop {
            let command = match pending.take() {
                Some(command) => command,
                None => match self.commands.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                Command::Connect(target) => {
                    address = Some(target);
                    self.reset_retry();
                }
                Command::Reconnect => self.reset_retry(),
                Command::Retry => {}
                Command::Disconnect => {
                    tracing::debug!("Not connected, dropping any pending retry");
                    self.state.set(ConnectionState::Idle);
                    continue;
                }
                Command::Shutdown => break,
            }

            let Some(target) = address.clone() else {
                tracing::warn!("No server address to reconnect to");
                continue;
            };

            let (stream, peer) = match self.open(&target).await {
                Ok(connected) => connected,
                Err(e) => {
                    tracing::warn!("Connection to {target} failed: {e}");
                    let delay = self.retry.as_mut().and_then(ReconnectState::next_delay);
                    self.state.set(match delay {
                        Some(_) => ConnectionState::Retrying,
                        None => ConnectionState::Idle,
                    });
                    self.emit(ClientEvent::Connection(ConnectionEvent::Failed {
                        reason: e.to_string(),
                    }));
                    match delay {
                        Some(delay) => {
                            tracing::info!("Retrying connection to {target} in {delay:?}");
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => pending = Some(Command::Retry),
                                command = self.commands.recv() => match command {
                                    Some(command) => pending = Some(command),
                                    None => break,
                                },
                            }
                        }
                        None if self.retry.is_some() => {
                            tracing::warn!("Giving up on {target}");
                        }
                        None => {}
                    }
                    continue;
                }
            };

            self.reset_retry();
            pending = self.serve(stream, peer).await;
        }

        self.state.set(ConnectionState::Closed);
        tracing::info!("Network client stopped");
    }

    fn reset_retry(&mut self) {
        if let Some(retry) = self.retry.as_mut() {
            retry.reset();
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    async fn open(&self, target: &str) -> std::io::Result<(TcpStream, SocketAddr)> {
        let target = with_default_port(target);

        self.state.set(ConnectionState::Resolving);
        let candidates: Vec<SocketAddr> = lookup_host(&target).await?.collect();

        self.state.set(ConnectionState::Connecting);
        let mut last_error = None;
        for addr in candidates {
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    return Ok((stream, addr));
                }
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    last_error = Some(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connecting to {addr} timed out"),
                    ));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{target} did not resolve to any address"),
            )
        }))
    }

    /// Run one established connection until it ends. Returns the command
    /// that ended it, if that command still needs handling.
    async fn serve(&mut self, stream: TcpStream, peer: SocketAddr) -> Option<Command> {
        self.state.set(ConnectionState::Connected);
        self.emit(ClientEvent::Connection(ConnectionEvent::Established { peer }));
        tracing::info!("Connected to server at {peer}");

        let (mut reader, mut writer) = stream.into_split();
        let events = self.events.clone();
        let mut reader_task = tokio::spawn(async move {
            loop {
                match read_message(&mut reader).await {
                    Ok(message) => {
                        tracing::trace!(
                            "Received {} for {}",
                            message.content_type(),
                            message.message_id()
                        );
                        let _ = events.send(ClientEvent::MessageReceived(message));
                    }
                    Err(e) if !e.is_fatal() => {
                        tracing::error!("Server sent an invalid message, dropping it: {e}");
                    }
                    Err(e) => return e,
                }
            }
        });

        let (reason, next) = loop {
            tokio::select! {
                result = &mut reader_task => {
                    let reason = match result {
                        Ok(e) => e.to_string(),
                        Err(e) => format!("reader stopped: {e}"),
                    };
                    tracing::warn!("Lost connection to {peer}: {reason}");
                    break (reason, None);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect) => break ("disconnected".to_string(), None),
                    Some(Command::Reconnect) | Some(Command::Retry) => {
                        break ("reconnecting".to_string(), Some(Command::Reconnect));
                    }
                    Some(Command::Connect(target)) => {
                        break ("switching server".to_string(), Some(Command::Connect(target)));
                    }
                    Some(Command::Shutdown) | None => {
                        break ("shut down".to_string(), Some(Command::Shutdown));
                    }
                },
                message = self.outbound.recv() => {
                    let Some(message) = message else {
                        break ("shut down".to_string(), Some(Command::Shutdown));
                    };
                    match write_message(&mut writer, &message).await {
                        Ok(()) => {}
                        Err(e) if !e.is_fatal() => {
                            tracing::error!("Refusing to send invalid message: {e}");
                        }
                        Err(e) => {
                            tracing::warn!("Lost connection to {peer}: {e}");
                            break (e.to_string(), None);
                        }
                    }
                }
            }
        };

        reader_task.abort();
        drop(writer);
        self.state.set(ConnectionState::Idle);
        self.emit(ClientEvent::Connection(ConnectionEvent::Closed { reason }));
        tracing::info!("Closed connection to {peer}");
        next
    }
}
