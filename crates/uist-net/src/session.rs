//! Server-side session for one accepted client connection.
//!
//! Each session runs a reader task and a writer task. The writer drains an
//! unbounded queue one message at a time, so at most one write is in flight
//! and messages reach the peer in the order they were queued.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::tcp_server::{ServerEvent, SessionId};
use crate::wire::{WireError, WireMessage, read_message, write_message};

/// One accepted connection as seen by the server.
#[derive(Debug)]
pub struct NetworkServerSession {
    id: SessionId,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<WireMessage>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl NetworkServerSession {
    /// Announce the session on `events` and spawn its reader and writer.
    pub(crate) fn start(
        id: SessionId,
        peer_addr: SocketAddr,
        stream: TcpStream,
        events: mpsc::UnboundedSender<ServerEvent>,
        server_shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, _) = watch::channel(false);

        let session = Arc::new(Self {
            id,
            peer_addr,
            outbound,
            closed: AtomicBool::new(false),
            close_tx,
            events,
        });

        let _ = session
            .events
            .send(ServerEvent::SessionAccepted(Arc::clone(&session)));

        tokio::spawn(Self::read_loop(
            Arc::clone(&session),
            reader,
            server_shutdown.clone(),
        ));
        tokio::spawn(Self::write_loop(
            Arc::clone(&session),
            writer,
            outbound_rx,
            server_shutdown,
        ));

        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a message for delivery. A no-op on a closed session.
    pub fn send(&self, message: WireMessage) {
        if self.is_closed() {
            tracing::debug!("{} is closed, dropping outgoing message", self.id);
            return;
        }
        if self.outbound.send(message).is_err() {
            tracing::debug!("{} writer has stopped, dropping outgoing message", self.id);
        }
    }

    /// Close the session. Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("{} already closed", self.id);
            return;
        }
        self.close_tx.send_replace(true);
        let _ = self.events.send(ServerEvent::SessionClosed(self.id));
    }

    /// Wait until the session has been closed.
    pub async fn closed(&self) {
        let mut close_rx = self.close_tx.subscribe();
        let _ = close_rx.wait_for(|closed| *closed).await;
    }

    async fn read_loop(
        session: Arc<Self>,
        mut reader: OwnedReadHalf,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut close_rx = session.close_tx.subscribe();
        loop {
            tokio::select! {
                result = read_message(&mut reader) => {
                    match result {
                        Ok(message) => {
                            tracing::trace!(
                                "{} received {} for {}",
                                session.id,
                                message.content_type(),
                                message.message_id()
                            );
                            let _ = session.events.send(ServerEvent::MessageReceived {
                                session: session.id,
                                message,
                            });
                        }
                        Err(e) if !e.is_fatal() => {
                            tracing::error!("{} sent an invalid message, dropping it: {e}", session.id);
                        }
                        Err(WireError::ConnectionClosed) => {
                            tracing::debug!("{} closed by peer", session.id);
                            break;
                        }
                        Err(e) => {
                            tracing::warn!("{} read failed: {e}", session.id);
                            break;
                        }
                    }
                }
                () = raised(&mut close_rx) => break,
                () = raised(&mut shutdown_rx) => break,
            }
        }
        session.close();
    }

    async fn write_loop(
        session: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outbound_rx: mpsc::UnboundedReceiver<WireMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut close_rx = session.close_tx.subscribe();
        loop {
            tokio::select! {
                message = outbound_rx.recv() => {
                    let Some(message) = message else { break };
                    match write_message(&mut writer, &message).await {
                        Ok(()) => {}
                        Err(e) if !e.is_fatal() => {
                            tracing::error!("{} refused to send invalid message: {e}", session.id);
                        }
                        Err(e) => {
                            tracing::warn!("{} write failed: {e}", session.id);
                            break;
                        }
                    }
                }
                () = raised(&mut close_rx) => break,
                () = raised(&mut shutdown_rx) => break,
            }
        }
        session.close();
    }
}

/// Resolves once `flag` is `true` or its sender is gone. The watch guard is
/// dropped before returning; it must not live across an `.await`.
async fn raised(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|raised| *raised).await;
}
