//! Game client: a mirrored [`Game`] fed by a [`GameNetworkClient`].

use std::sync::Arc;

use uist_net::{ClientConfig, ConnectionEvent, PlayerId};

use crate::game::{Game, GameRules, SharedGame};
use crate::network_client::GameNetworkClient;
use crate::replication::lock;

pub struct GameClient {
    network: Arc<GameNetworkClient>,
    game: SharedGame,
}

impl GameClient {
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig, rules: GameRules) -> Self {
        let network = GameNetworkClient::new(config);
        let game = Game::mirror(network.clone(), rules);

        let weak_game = Arc::downgrade(&game);
        network.on_connection_event(move |event: &ConnectionEvent| match event {
            ConnectionEvent::Established { peer } => {
                tracing::info!("Joined game server at {peer}");
            }
            ConnectionEvent::Failed { reason } => {
                tracing::warn!("Could not reach the game server: {reason}");
            }
            ConnectionEvent::Closed { reason } => {
                if let Some(game) = weak_game.upgrade() {
                    lock(&game).clean_up_left_game();
                }
                tracing::info!("Left the game: {reason}");
            }
        });

        Self { network, game }
    }

    pub fn game(&self) -> &SharedGame {
        &self.game
    }

    pub fn network(&self) -> &Arc<GameNetworkClient> {
        &self.network
    }

    pub fn own_player_id(&self) -> PlayerId {
        lock(&self.game).own_player_id()
    }

    pub fn connect(&self, address: &str) {
        self.network.connect_to_server(address);
    }

    pub fn disconnect(&self) {
        self.network.disconnect_from_server();
    }

    pub fn reconnect(&self) {
        self.network.reconnect_to_server();
    }

    pub fn is_connected(&self) -> bool {
        self.network.is_connected()
    }

    pub fn accepts_connection(&self) -> bool {
        self.network.accepts_connection()
    }

    pub fn move_unit(&self, index: u8, angle: f32, strength: f32) {
        lock(&self.game).move_unit(index, angle, strength);
    }

    pub fn highlight_unit(&self, index: u8, highlighted: bool) {
        lock(&self.game).highlight_unit(index, highlighted);
    }

    /// Drop the mirrored game and stop the network for good.
    pub fn stop(&self) {
        lock(&self.game).stop();
        self.network.disconnect_from_server();
        self.network.stop();
    }
}
