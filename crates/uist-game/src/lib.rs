//! The UIST game: synchronizable entities, the tick-based simulation and the
//! server and client that keep it consistent across processes.

pub mod client;
pub mod game;
pub mod interface;
pub mod levels;
pub mod network_client;
pub mod network_server;
pub mod obstacle;
pub mod replication;
pub mod requests;
pub mod server;
pub mod unit;

pub use client::GameClient;
pub use game::{
    Game, GameOutcome, GamePhase, GameRules, RequestError, ScoreRule, SharedGame, SharedObstacle,
    SharedUnit,
};
pub use interface::NetworkInterface;
pub use levels::{LEVEL_COUNT, LevelLayout};
pub use network_client::GameNetworkClient;
pub use network_server::{GameNetworkServer, PlayerEvent, PlayerProfile};
pub use obstacle::{DEFAULT_OBSTACLE_RADIUS, GameObstacle};
pub use replication::{
    Registration, Replicable, Replication, ReplicationError, Shared, SyncTarget,
    create_from_data, generate_message_id, set_message_id, shared,
};
pub use requests::{HighlightRequest, MoveRequest, NewPlayerId, Request};
pub use server::GameServer;
pub use unit::{BRAKE_FACTOR, FIELD_SIZE, GameUnit, MAX_ACCELERATION, MAX_VELOCITY, UNIT_RADIUS};
