//! Game server: the authoritative game behind a [`GameNetworkServer`].
//!
//! The tick task and [`GameServer::stop`] share one guard, so a stop never
//! interleaves with a half-finished tick.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use uist_net::{
    ContentType, HandlerId, MessageContext, MessageId, NewPlayerIdData, PlayerId, ServerConfig,
    SessionId, UpdateFrequency, WireMessage,
};

use crate::game::{Game, GameRules, SharedGame};
use crate::interface::NetworkInterface;
use crate::network_server::{GameNetworkServer, PlayerEvent};
use crate::replication::{Replicable, SyncTarget, lock};
use crate::requests::{HighlightRequest, MoveRequest, NewPlayerId};

pub struct GameServer {
    network: Arc<GameNetworkServer>,
    game: SharedGame,
    rules: GameRules,
    tick_guard: Arc<tokio::sync::Mutex<()>>,
    stop_tx: watch::Sender<bool>,
    handler_ids: Mutex<Vec<HandlerId>>,
}

impl GameServer {
    pub fn new(config: ServerConfig, rules: GameRules) -> Self {
        let network = GameNetworkServer::new(config);
        let interface: Arc<dyn NetworkInterface> = network.clone();
        let game = Arc::new(Mutex::new(Game::new(Some(interface), rules.clone())));
        let (stop_tx, _) = watch::channel(false);
        Self {
            network,
            game,
            rules,
            tick_guard: Arc::new(tokio::sync::Mutex::new(())),
            stop_tx,
            handler_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn game(&self) -> &SharedGame {
        &self.game
    }

    pub fn network(&self) -> &Arc<GameNetworkServer> {
        &self.network
    }

    /// Bind the configured address and start serving and ticking. Returns
    /// the bound address.
    pub async fn run(&self) -> io::Result<SocketAddr> {
        self.prepare();
        let addr = self.network.start().await?;
        self.spawn_tick_loop();
        Ok(addr)
    }

    /// Like [`GameServer::run`], with a pre-bound listener.
    pub fn run_with_listener(&self, listener: TcpListener) {
        self.prepare();
        self.network.start_with_listener(listener);
        self.spawn_tick_loop();
    }

    /// Load `level` and greet every connected player again, so each mirror
    /// swaps to the new level while players keep their ids.
    pub fn load_game(&self, level: u32) {
        let mut game = lock(&self.game);
        game.load(level);
        for profile in self.network.player_profiles() {
            welcome(&self.network, &game, profile.player_id, profile.session.id());
        }
    }

    pub fn start_game(&self) {
        lock(&self.game).start();
    }

    /// Stop ticking, drop the game and shut the network down.
    pub async fn stop(&self) {
        let _tick = self.tick_guard.lock().await;
        self.stop_tx.send_replace(true);

        let handler_ids = std::mem::take(
            &mut *self
                .handler_ids
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for id in handler_ids {
            self.network.handlers().remove(id);
        }
        lock(&self.game).stop();
        self.network.stop();
    }

    /// Install request handlers and greet joining players. Runs before the
    /// network starts so no early message or join is missed.
    fn prepare(&self) {
        let handlers = self.network.handlers();
        let move_game = Arc::downgrade(&self.game);
        let highlight_game = Arc::downgrade(&self.game);
        let ids = vec![
            handlers.add(
                ContentType::MOVE_REQUEST,
                MessageId::EVENT,
                move |message: &WireMessage, ctx: &MessageContext| {
                    let Some(game) = move_game.upgrade() else { return };
                    let Some(request) = MoveRequest::from_message(message) else {
                        tracing::error!("Malformed move request from {}", ctx.sender);
                        return;
                    };
                    if let Err(e) = lock(&game).apply_move_request(ctx.sender, &request) {
                        tracing::error!("Rejected move request: {e}");
                    }
                },
            ),
            handlers.add(
                ContentType::HIGHLIGHT_REQUEST,
                MessageId::EVENT,
                move |message: &WireMessage, ctx: &MessageContext| {
                    let Some(game) = highlight_game.upgrade() else { return };
                    let Some(request) = HighlightRequest::from_message(message) else {
                        tracing::error!("Malformed highlight request from {}", ctx.sender);
                        return;
                    };
                    if let Err(e) = lock(&game).apply_highlight_request(ctx.sender, &request) {
                        tracing::error!("Rejected highlight request: {e}");
                    }
                },
            ),
        ];
        self.handler_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);

        let mut players = self.network.subscribe();
        let mut stop_rx = self.stop_tx.subscribe();
        let network = Arc::clone(&self.network);
        let game = Arc::clone(&self.game);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = players.recv() => match event {
                        Ok(PlayerEvent::Joined { player_id, session }) => {
                            welcome(&network, &lock(&game), player_id, session);
                        }
                        Ok(PlayerEvent::Left { .. }) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!("Missed {missed} player events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = stop_rx.wait_for(|stopped| *stopped) => break,
                }
            }
        });
    }

    fn spawn_tick_loop(&self) {
        let guard = Arc::clone(&self.tick_guard);
        let game = Arc::clone(&self.game);
        let stop_rx = self.stop_tx.subscribe();
        let tick_interval = self.rules.tick_interval;

        tokio::spawn(async move {
            loop {
                let _tick = guard.lock().await;
                if *stop_rx.borrow() {
                    break;
                }
                tokio::time::sleep(tick_interval).await;
                {
                    let mut game = lock(&game);
                    game.proceed();
                    game.synchronize(
                        &SyncTarget::Player(PlayerId::ALL_CLIENTS),
                        UpdateFrequency::Always,
                    );
                }
            }
            tracing::debug!("Tick loop finished");
        });
    }
}

/// Tell a player its id and send it the complete game state. Holding the
/// game keeps tick broadcasts from interleaving with the greeting.
fn welcome(network: &Arc<GameNetworkServer>, game: &Game, player: PlayerId, session: SessionId) {
    let interface: Arc<dyn NetworkInterface> = network.clone();
    let target = SyncTarget::Session(session);

    NewPlayerId::new(
        Some(interface),
        NewPlayerIdData {
            player_id: player.0,
        },
    )
    .synchronize(&target, UpdateFrequency::Once);

    let sent = game.synchronize(&target, UpdateFrequency::Once);
    tracing::debug!("Sent {sent} entities to {player}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use uist_net::{GameUnitData, MoveRequestData, Payload, read_message, write_message};

    async fn start(level: u32) -> (GameServer, SocketAddr) {
        let server = GameServer::new(ServerConfig::default(), GameRules::default());
        server.load_game(level);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        server.run_with_listener(listener);
        (server, addr)
    }

    async fn read(stream: &mut TcpStream) -> WireMessage {
        tokio::time::timeout(Duration::from_secs(2), read_message(stream))
            .await
            .expect("timed out waiting for message")
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_player_gets_id_then_state() {
        let (server, addr) = start(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Tick broadcasts may reach the session before its greeting.
        let greeting = loop {
            let message = read(&mut client).await;
            if message.content_type() == ContentType::NEW_PLAYER_ID {
                break message;
            }
        };
        assert_eq!(
            NewPlayerIdData::from_bytes(&greeting.payload).unwrap().player_id,
            PlayerId::FIRST_CLIENT.0
        );

        let mut units = 0;
        let mut obstacles = 0;
        while units < 10 || obstacles < 6 {
            let message = read(&mut client).await;
            match message.content_type() {
                ContentType::GAME_UNIT => units += 1,
                ContentType::GAME_OBSTACLE => obstacles += 1,
                other => panic!("unexpected {other}"),
            }
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn test_move_request_applies_to_sender_units() {
        let (server, addr) = start(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        read(&mut client).await;

        let request = MoveRequestData {
            unit_index: 0,
            angle: 0.0,
            strength: 1.0,
        }
        .to_message(MessageId::EVENT)
        .unwrap();
        write_message(&mut client, &request).await.unwrap();

        let game = Arc::clone(server.game());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let unit = lock(&game).unit_by_index(PlayerId::FIRST_CLIENT, 0).unwrap();
            if lock(&unit).acceleration().x > 0.0 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "request never applied");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let hunter = lock(&game).unit_by_index(PlayerId(5), 0).unwrap();
        assert_eq!(lock(&hunter).acceleration(), glam::Vec2::ZERO);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_ticks_broadcast_unit_state() {
        let (server, addr) = start(2).await;
        server.start_game();
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Skip the greeting, then expect periodic unit updates.
        let mut updates = 0;
        while updates < 20 {
            let message = read(&mut client).await;
            if message.content_type() == ContentType::GAME_UNIT {
                let data = GameUnitData::from_bytes(&message.payload).unwrap();
                assert!(data.living);
                updates += 1;
            }
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn test_load_greets_connected_players_again() {
        let (server, addr) = start(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while server.network().player_ids().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "never joined");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        server.load_game(3);
        let new_obstacles = lock(server.game()).obstacles().len();

        // Skip to the second greeting, then expect the whole new level.
        let mut greetings = 0;
        while greetings < 2 {
            let message = read(&mut client).await;
            if message.content_type() == ContentType::NEW_PLAYER_ID {
                let data = NewPlayerIdData::from_bytes(&message.payload).unwrap();
                assert_eq!(data.player_id, PlayerId::FIRST_CLIENT.0);
                greetings += 1;
            }
        }
        let mut units = 0;
        let mut obstacles = 0;
        while units < 10 || obstacles < new_obstacles {
            let message = read(&mut client).await;
            let id = message.message_id();
            let game = lock(server.game());
            match message.content_type() {
                ContentType::GAME_UNIT => {
                    assert!(game.unit_by_id(id).is_some());
                    units += 1;
                }
                ContentType::GAME_OBSTACLE => {
                    assert!(game.obstacle_by_id(id).is_some());
                    obstacles += 1;
                }
                other => panic!("unexpected {other}"),
            }
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_resets_game_and_closes_clients() {
        let (server, addr) = start(1).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        read(&mut client).await;

        server.stop().await;
        assert!(lock(server.game()).units().is_empty());
        assert!(server.network().handlers().is_empty());

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if read_message(&mut client).await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(closed.is_ok());
    }
}
