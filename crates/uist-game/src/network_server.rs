//! Server-side network interface: player profiles over transport sessions.
//!
//! Every accepted session gets a [`PlayerProfile`] with a fresh player id,
//! starting at [`PlayerId::FIRST_CLIENT`] and never reused. Incoming messages
//! are dispatched with the sending player in their [`MessageContext`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use uist_net::{
    ContentType, HandlerRegistry, MessageContext, MessageIdAllocator, NetworkServer,
    NetworkServerSession, PlayerId, ServerConfig, ServerEvent, SessionId, WireMessage,
};

use crate::interface::{NetworkInterface, check_outgoing};

const PLAYER_EVENTS_CAPACITY: usize = 64;

/// A connected player.
#[derive(Debug, Clone)]
pub struct PlayerProfile {
    pub player_id: PlayerId,
    pub session: Arc<NetworkServerSession>,
}

/// Players joining and leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Joined {
        player_id: PlayerId,
        session: SessionId,
    },
    Left {
        player_id: PlayerId,
        session: SessionId,
    },
}

pub struct GameNetworkServer {
    server: NetworkServer,
    bind_addr: SocketAddr,
    events: Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
    profiles: Mutex<Vec<PlayerProfile>>,
    next_player_id: AtomicU16,
    handlers: HandlerRegistry,
    message_ids: MessageIdAllocator,
    players: broadcast::Sender<PlayerEvent>,
}

impl GameNetworkServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let bind_addr = config.bind_addr;
        let (server, events) = NetworkServer::new(config);
        let (players, _) = broadcast::channel(PLAYER_EVENTS_CAPACITY);
        Arc::new(Self {
            server,
            bind_addr,
            events: Mutex::new(Some(events)),
            profiles: Mutex::new(Vec::new()),
            next_player_id: AtomicU16::new(PlayerId::FIRST_CLIENT.0),
            handlers: HandlerRegistry::new(),
            message_ids: MessageIdAllocator::new(),
            players,
        })
    }

    /// Bind the configured address and start serving. Returns the bound
    /// address.
    pub async fn start(self: &Arc<Self>) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Game server listening on {local_addr}");
        self.start_with_listener(listener);
        Ok(local_addr)
    }

    /// Start serving on a pre-bound listener. Only the first call has an
    /// effect.
    pub fn start_with_listener(self: &Arc<Self>, listener: TcpListener) {
        let Some(mut events) = self.lock_events().take() else {
            tracing::warn!("Game server already started");
            return;
        };

        let accept = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = accept.server.run_with_listener(listener).await {
                tracing::error!("Game server accept loop failed: {e}");
            }
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(this) = weak.upgrade() else { break };
                this.handle_event(event);
            }
            tracing::debug!("Server routing task finished");
        });
    }

    fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::SessionAccepted(session) => {
                let player_id =
                    PlayerId(self.next_player_id.fetch_add(1, Ordering::Relaxed));
                let session_id = session.id();
                tracing::info!(
                    "{player_id} joined on {session_id} from {}",
                    session.peer_addr()
                );
                self.lock_profiles().push(PlayerProfile { player_id, session });
                let _ = self.players.send(PlayerEvent::Joined {
                    player_id,
                    session: session_id,
                });
            }
            ServerEvent::MessageReceived { session, message } => {
                if message.content_type() == ContentType::UNDEFINED {
                    tracing::error!(
                        "{session} sent a message with undefined content type, dropping it"
                    );
                    return;
                }
                let sender = self
                    .player_profile_by_session(session)
                    .map_or(PlayerId::NEW_CLIENT, |profile| profile.player_id);
                self.handlers.dispatch(
                    &message,
                    &MessageContext {
                        sender,
                        session: Some(session),
                    },
                );
            }
            ServerEvent::SessionClosed(session) => {
                let removed = {
                    let mut profiles = self.lock_profiles();
                    let index = profiles
                        .iter()
                        .position(|profile| profile.session.id() == session);
                    index.map(|index| profiles.remove(index))
                };
                match removed {
                    Some(profile) => {
                        tracing::info!("{} left", profile.player_id);
                        let _ = self.players.send(PlayerEvent::Left {
                            player_id: profile.player_id,
                            session,
                        });
                    }
                    None => tracing::debug!("{session} closed without a player profile"),
                }
            }
        }
    }

    fn lock_events(&self) -> MutexGuard<'_, Option<mpsc::UnboundedReceiver<ServerEvent>>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_profiles(&self) -> MutexGuard<'_, Vec<PlayerProfile>> {
        self.profiles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive player events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.players.subscribe()
    }

    pub fn player_profile_by_id(&self, player_id: PlayerId) -> Option<PlayerProfile> {
        self.lock_profiles()
            .iter()
            .find(|profile| profile.player_id == player_id)
            .cloned()
    }

    pub fn player_profile_by_session(&self, session: SessionId) -> Option<PlayerProfile> {
        self.lock_profiles()
            .iter()
            .find(|profile| profile.session.id() == session)
            .cloned()
    }

    /// Every connected player, in join order.
    pub fn player_profiles(&self) -> Vec<PlayerProfile> {
        self.lock_profiles().clone()
    }

    /// Ids of every connected player, in join order.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.lock_profiles()
            .iter()
            .map(|profile| profile.player_id)
            .collect()
    }

    /// Drop every handler and shut the transport down.
    pub fn stop(&self) {
        self.handlers.clear();
        self.server.shutdown();
        tracing::info!("Game server stopped");
    }
}

impl NetworkInterface for GameNetworkServer {
    fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    fn message_ids(&self) -> &MessageIdAllocator {
        &self.message_ids
    }

    fn send(&self, message: WireMessage, receiver: PlayerId) -> bool {
        if !check_outgoing(&message) {
            return false;
        }
        match receiver {
            PlayerId::SERVER => {
                tracing::warn!(
                    "Ignoring {} addressed to the server itself",
                    message.content_type()
                );
                false
            }
            PlayerId::ALL_CLIENTS => {
                for profile in self.lock_profiles().iter() {
                    profile.session.send(message.clone());
                }
                true
            }
            receiver => match self.player_profile_by_id(receiver) {
                Some(profile) => {
                    profile.session.send(message);
                    true
                }
                None => {
                    tracing::error!(
                        "No player profile for {receiver}, dropping {}",
                        message.content_type()
                    );
                    false
                }
            },
        }
    }

    fn send_to_session(&self, message: WireMessage, session: SessionId) -> bool {
        if !check_outgoing(&message) {
            return false;
        }
        match self.player_profile_by_session(session) {
            Some(profile) => {
                profile.session.send(message);
                true
            }
            None => {
                tracing::error!(
                    "{session} is not connected, dropping {}",
                    message.content_type()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use uist_net::{GameObstacleData, MessageId, Payload, read_message, write_message};

    async fn start_server() -> (Arc<GameNetworkServer>, SocketAddr) {
        let network = GameNetworkServer::new(ServerConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        network.start_with_listener(listener);
        (network, addr)
    }

    async fn next_player_event(rx: &mut broadcast::Receiver<PlayerEvent>) -> PlayerEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for player event")
            .unwrap()
    }

    fn obstacle(id: u16) -> WireMessage {
        GameObstacleData {
            x: f32::from(id),
            y: 0.0,
            radius: 1.0,
        }
        .to_message(MessageId(id))
        .unwrap()
    }

    async fn read(stream: &mut TcpStream) -> WireMessage {
        tokio::time::timeout(Duration::from_secs(2), read_message(stream))
            .await
            .expect("timed out waiting for message")
            .unwrap()
    }

    #[tokio::test]
    async fn test_players_get_increasing_ids() {
        let (network, addr) = start_server().await;
        let mut players = network.subscribe();

        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();

        let joined: Vec<_> = vec![
            next_player_event(&mut players).await,
            next_player_event(&mut players).await,
        ];
        let ids: Vec<_> = joined
            .iter()
            .map(|event| match event {
                PlayerEvent::Joined { player_id, .. } => *player_id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![PlayerId(4), PlayerId(5)]);
        assert_eq!(network.player_ids(), ids);
    }

    #[tokio::test]
    async fn test_messages_carry_sender_player() {
        let (network, addr) = start_server().await;
        let mut players = network.subscribe();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        network.handlers().add(
            ContentType::GAME_OBSTACLE,
            MessageId::ALL,
            move |message: &WireMessage, ctx: &MessageContext| {
                let _ = seen_tx.send((message.message_id(), *ctx));
            },
        );

        let mut client = TcpStream::connect(addr).await.unwrap();
        let PlayerEvent::Joined { player_id, session } = next_player_event(&mut players).await
        else {
            panic!("expected a join");
        };
        write_message(&mut client, &obstacle(7)).await.unwrap();

        let (id, ctx) = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, MessageId(7));
        assert_eq!(ctx.sender, player_id);
        assert_eq!(ctx.session, Some(session));
    }

    #[tokio::test]
    async fn test_undefined_content_type_is_dropped_and_connection_kept() {
        let (network, addr) = start_server().await;
        let mut players = network.subscribe();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        network.handlers().add(
            ContentType::ALL_TYPES,
            MessageId::ALL,
            move |message: &WireMessage, _: &MessageContext| {
                let _ = seen_tx.send(message.content_type());
            },
        );

        let mut client = TcpStream::connect(addr).await.unwrap();
        next_player_event(&mut players).await;
        let undefined = WireMessage::new(MessageId(3), ContentType::UNDEFINED, vec![]).unwrap();
        write_message(&mut client, &undefined).await.unwrap();
        write_message(&mut client, &obstacle(3)).await.unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, ContentType::GAME_OBSTACLE);
        assert_eq!(network.player_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_send_addressing() {
        let (network, addr) = start_server().await;
        let mut players = network.subscribe();

        let mut first = TcpStream::connect(addr).await.unwrap();
        next_player_event(&mut players).await;
        let mut second = TcpStream::connect(addr).await.unwrap();
        let PlayerEvent::Joined {
            session: second_session,
            ..
        } = next_player_event(&mut players).await
        else {
            panic!("expected a join");
        };

        assert!(network.send(obstacle(10), PlayerId::ALL_CLIENTS));
        assert!(network.send(obstacle(11), PlayerId(5)));
        assert!(!network.send(obstacle(12), PlayerId(42)));
        assert!(!network.send(obstacle(13), PlayerId::SERVER));
        assert!(network.send_to_session(obstacle(14), second_session));
        assert!(!network.send_to_session(obstacle(16), SessionId(99)));

        assert_eq!(read(&mut first).await.message_id(), MessageId(10));
        assert_eq!(read(&mut second).await.message_id(), MessageId(10));
        assert_eq!(read(&mut second).await.message_id(), MessageId(11));
        assert_eq!(read(&mut second).await.message_id(), MessageId(14));

        // Nothing else reaches the first player.
        network.send(obstacle(15), PlayerId(4));
        assert_eq!(read(&mut first).await.message_id(), MessageId(15));
    }

    #[tokio::test]
    async fn test_closed_session_removes_profile() {
        let (network, addr) = start_server().await;
        let mut players = network.subscribe();

        let client = TcpStream::connect(addr).await.unwrap();
        next_player_event(&mut players).await;
        drop(client);

        assert_eq!(
            next_player_event(&mut players).await,
            PlayerEvent::Left {
                player_id: PlayerId(4),
                session: SessionId(1),
            }
        );
        assert!(network.player_profile_by_id(PlayerId(4)).is_none());

        // Ids are never reused.
        let _client = TcpStream::connect(addr).await.unwrap();
        match next_player_event(&mut players).await {
            PlayerEvent::Joined { player_id, .. } => assert_eq!(player_id, PlayerId(5)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_closes_sessions() {
        let (network, addr) = start_server().await;
        let mut players = network.subscribe();
        let mut client = TcpStream::connect(addr).await.unwrap();
        next_player_event(&mut players).await;

        network.stop();
        let result = tokio::time::timeout(Duration::from_secs(2), read_message(&mut client))
            .await
            .unwrap();
        assert!(result.is_err());
        assert!(network.handlers().is_empty());
    }
}
