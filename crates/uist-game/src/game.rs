//! The game: entity collections, the simulation step and synchronization.
//!
//! On the server the [`Game`] is authoritative: it loads levels, advances the
//! physics every tick and applies validated requests. On a client it is a
//! mirror built with [`Game::mirror`]: units and obstacles are created the
//! first time the server mentions them and updated through their own message
//! handlers afterwards. Mirrors never simulate.
//!
//! Lock order is always game before unit, and units in collection order.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use uist_net::{
    ContentType, HandlerId, HighlightRequestData, MessageContext, MessageId, MoveRequestData,
    PlayerId, UpdateFrequency, WireMessage,
};

use crate::interface::NetworkInterface;
use crate::levels;
use crate::obstacle::GameObstacle;
use crate::replication::{
    Replicable, Shared, SyncTarget, create_from_data, generate_message_id, lock, shared,
};
use crate::requests::{HighlightRequest, MoveRequest, NewPlayerId};
use crate::unit::GameUnit;

pub type SharedGame = Arc<Mutex<Game>>;
pub type SharedUnit = Shared<GameUnit>;
pub type SharedObstacle = Shared<GameObstacle>;

// ---------------------------------------------------------------------------
// Rules and results
// ---------------------------------------------------------------------------

/// Round lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GamePhase {
    /// No level loaded.
    #[default]
    Empty,
    Loaded,
    Running,
    Finished,
}

/// How a finished round is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreRule {
    /// Only the prey side scores.
    #[default]
    PreyOnly,
    /// The hunters additionally score two points per caught unit.
    Versus,
}

/// Tunables for one game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRules {
    /// Length of a round. Default: 60 s.
    pub round_duration: Duration,
    /// Server tick interval. Default: 20 ms.
    pub tick_interval: Duration,
    pub score_rule: ScoreRule,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(60),
            tick_interval: Duration::from_millis(20),
            score_rule: ScoreRule::default(),
        }
    }
}

/// Result of a round, counted over the non-hunting units.
#[derive(Debug, Clone, PartialEq)]
pub struct GameOutcome {
    /// Living units that reached the goal line.
    pub arrived: u32,
    /// Living units still on the field.
    pub survived: u32,
    /// Units eliminated by a hunter.
    pub caught: u32,
    /// Round time in seconds at which the last unit arrived.
    pub last_arrival: Option<f32>,
    /// `2 * arrived + survived`.
    pub score: u32,
    /// Hunter score under [`ScoreRule::Versus`].
    pub hunter_score: Option<u32>,
}

/// Why a client request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("request from {0}, which is not a player")]
    NotAPlayer(PlayerId),

    #[error("{player} has no unit with index {index}")]
    UnknownUnit { player: PlayerId, index: u8 },
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

pub struct Game {
    rules: GameRules,
    network: Option<Arc<dyn NetworkInterface>>,
    units: Vec<SharedUnit>,
    obstacles: Vec<SharedObstacle>,
    phase: GamePhase,
    level: Option<u32>,
    own_player_id: PlayerId,
    round_elapsed: Duration,
    last_tick: Instant,
    last_arrival: Option<f32>,
    handler_ids: Vec<HandlerId>,
}

impl Game {
    /// An authoritative game. Entities get ids from `network`, if any.
    pub fn new(network: Option<Arc<dyn NetworkInterface>>, rules: GameRules) -> Self {
        Self {
            rules,
            network,
            units: Vec::new(),
            obstacles: Vec::new(),
            phase: GamePhase::Empty,
            level: None,
            own_player_id: PlayerId::NONE,
            round_elapsed: Duration::ZERO,
            last_tick: Instant::now(),
            last_arrival: None,
            handler_ids: Vec::new(),
        }
    }

    /// A client-side mirror fed by the handlers it installs on `network`.
    pub fn mirror(network: Arc<dyn NetworkInterface>, rules: GameRules) -> SharedGame {
        let game = Arc::new(Mutex::new(Self::new(Some(Arc::clone(&network)), rules)));
        let weak = Arc::downgrade(&game);

        let handler_ids = vec![
            network.handlers().add(
                ContentType::GAME_UNIT,
                MessageId::ALL,
                mirror_handler(&weak, Game::handle_game_unit),
            ),
            network.handlers().add(
                ContentType::GAME_OBSTACLE,
                MessageId::ALL,
                mirror_handler(&weak, Game::handle_game_obstacle),
            ),
            network.handlers().add(
                ContentType::NEW_PLAYER_ID,
                MessageId::ALL,
                mirror_handler(&weak, Game::handle_new_player_id),
            ),
        ];
        lock(&game).handler_ids = handler_ids;
        game
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn has_started(&self) -> bool {
        matches!(self.phase, GamePhase::Running | GamePhase::Finished)
    }

    pub fn has_finished(&self) -> bool {
        self.phase == GamePhase::Finished
    }

    pub fn level(&self) -> Option<u32> {
        self.level
    }

    pub fn units(&self) -> &[SharedUnit] {
        &self.units
    }

    pub fn obstacles(&self) -> &[SharedObstacle] {
        &self.obstacles
    }

    /// The player this process plays as. [`PlayerId::NONE`] on the server
    /// and on clients that have not been told yet.
    pub fn own_player_id(&self) -> PlayerId {
        self.own_player_id
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Replace the current entities with the layout of `level`.
    pub fn load(&mut self, level: u32) {
        self.reset();

        let layout = levels::layout(level);
        let sides = [
            (PlayerId::FIRST_CLIENT, false, &layout.prey),
            (PlayerId(PlayerId::FIRST_CLIENT.0 + 1), true, &layout.hunters),
        ];
        for (owner, hunting, positions) in sides {
            for (number, &position) in (1u8..).zip(positions.iter()) {
                let mut unit = GameUnit::new(self.network.clone());
                unit.set_number(number);
                unit.set_owner(owner);
                unit.set_position(position);
                unit.set_hunting(hunting);
                let unit = self.adopt(unit);
                self.units.push(unit);
            }
        }
        for &(position, radius) in &layout.obstacles {
            let mut obstacle = GameObstacle::new(self.network.clone());
            obstacle.set_position(position);
            obstacle.set_radius(radius);
            let obstacle = self.adopt(obstacle);
            self.obstacles.push(obstacle);
        }

        self.phase = GamePhase::Loaded;
        self.level = Some(level);
        self.last_tick = Instant::now();
        tracing::info!(
            "Loaded level {level} with {} units and {} obstacles",
            self.units.len(),
            self.obstacles.len()
        );
    }

    fn adopt<E: Replicable>(&self, entity: E) -> Shared<E> {
        let entity = shared(entity);
        if self.network.is_some() {
            generate_message_id(&entity);
        }
        entity
    }

    /// Drop every entity and return to [`GamePhase::Empty`].
    pub fn reset(&mut self) {
        self.units.clear();
        self.obstacles.clear();
        self.phase = GamePhase::Empty;
        self.level = None;
        self.round_elapsed = Duration::ZERO;
        self.last_arrival = None;
    }

    /// Start the round of the loaded level.
    pub fn start(&mut self) {
        match self.phase {
            GamePhase::Loaded => {
                self.phase = GamePhase::Running;
                self.round_elapsed = Duration::ZERO;
                self.last_tick = Instant::now();
                tracing::info!("Game started");
            }
            GamePhase::Running => tracing::debug!("Game already running"),
            GamePhase::Empty => tracing::warn!("Cannot start a game without a level"),
            GamePhase::Finished => tracing::warn!("Round is over, load a level to play again"),
        }
    }

    /// Stop the round and drop every entity.
    pub fn stop(&mut self) {
        if self.phase != GamePhase::Empty {
            tracing::info!("Game stopped");
        }
        self.reset();
    }

    /// Forget the round and the player id, e.g. after losing the server.
    pub fn clean_up_left_game(&mut self) {
        self.reset();
        self.own_player_id = PlayerId::NONE;
    }

    // -- Simulation ---------------------------------------------------------

    /// Advance by the wall time elapsed since the previous call.
    pub fn proceed(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick);
        self.last_tick = now;
        self.step(dt);
    }

    /// Advance the simulation by `dt`.
    pub fn step(&mut self, dt: Duration) {
        if self.phase != GamePhase::Running {
            return;
        }

        self.round_elapsed += dt;
        if self.round_elapsed >= self.rules.round_duration {
            self.finish();
            return;
        }

        let dt = dt.as_secs_f32();
        let round_time = self.round_elapsed.as_secs_f32();

        for unit in &self.units {
            let mut unit = lock(unit);
            unit.advance(dt);
            unit.reflect_on_walls();

            if !unit.has_arrived() && !unit.is_hunting() && unit.reached_goal_line() {
                unit.set_arrived(true);
                self.last_arrival = Some(round_time);
                tracing::info!(
                    "Unit {} of {} arrived after {round_time:.2} s",
                    unit.number(),
                    unit.owner()
                );
            }
        }

        for unit in &self.units {
            let mut unit = lock(unit);
            for obstacle in &self.obstacles {
                let obstacle = lock(obstacle);
                if unit.collides_with_obstacle(&obstacle) {
                    unit.separate_from(&obstacle);
                }
            }
        }

        for (i, first) in self.units.iter().enumerate() {
            for second in &self.units[i + 1..] {
                let mut a = lock(first);
                let mut b = lock(second);
                if !a.collides_with_unit(&b) {
                    continue;
                }
                for unit in [&mut *a, &mut *b] {
                    if !unit.is_hunting() && unit.is_living() {
                        unit.set_living(false);
                        tracing::info!("Unit {} of {} was caught", unit.number(), unit.owner());
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        self.phase = GamePhase::Finished;
        let outcome = self.outcome();
        tracing::info!(
            arrived = outcome.arrived,
            survived = outcome.survived,
            caught = outcome.caught,
            last_arrival = ?outcome.last_arrival,
            hunter_score = ?outcome.hunter_score,
            "Game finished with score {}",
            outcome.score
        );
    }

    /// Current tally of the round.
    pub fn outcome(&self) -> GameOutcome {
        let (mut arrived, mut survived, mut caught) = (0, 0, 0);
        for unit in &self.units {
            let unit = lock(unit);
            if unit.is_hunting() {
                continue;
            }
            match (unit.is_living(), unit.has_arrived()) {
                (true, true) => arrived += 1,
                (true, false) => survived += 1,
                (false, _) => caught += 1,
            }
        }
        GameOutcome {
            arrived,
            survived,
            caught,
            last_arrival: self.last_arrival,
            score: 2 * arrived + survived,
            hunter_score: match self.rules.score_rule {
                ScoreRule::PreyOnly => None,
                ScoreRule::Versus => Some(2 * caught),
            },
        }
    }

    // -- Synchronization ----------------------------------------------------

    /// Synchronize every unit and obstacle. Returns the number of messages
    /// handed to the network.
    pub fn synchronize(&self, target: &SyncTarget, threshold: UpdateFrequency) -> usize {
        let units: usize = self
            .units
            .iter()
            .map(|unit| lock(unit).synchronize(target, threshold))
            .sum();
        let obstacles: usize = self
            .obstacles
            .iter()
            .map(|obstacle| lock(obstacle).synchronize(target, threshold))
            .sum();
        units + obstacles
    }

    // -- Lookup -------------------------------------------------------------

    pub fn unit_by_id(&self, message_id: MessageId) -> Option<SharedUnit> {
        self.units
            .iter()
            .find(|unit| lock(unit).message_id() == message_id)
            .cloned()
    }

    pub fn obstacle_by_id(&self, message_id: MessageId) -> Option<SharedObstacle> {
        self.obstacles
            .iter()
            .find(|obstacle| lock(obstacle).message_id() == message_id)
            .cloned()
    }

    /// The `index`-th unit owned by `player`. Once this process knows its
    /// own player id, other players' units are not accessible.
    pub fn unit_by_index(&self, player: PlayerId, index: u8) -> Option<SharedUnit> {
        if self.own_player_id != PlayerId::NONE && self.own_player_id != player {
            return None;
        }
        self.units
            .iter()
            .filter(|unit| lock(unit).owner() == player)
            .nth(usize::from(index))
            .cloned()
    }

    /// The `index`-th unit of this process's own player.
    pub fn own_unit_by_index(&self, index: u8) -> Option<SharedUnit> {
        self.unit_by_index(self.own_player_id, index)
    }

    // -- Requests -----------------------------------------------------------

    /// Ask the server to accelerate one of our units.
    pub fn move_unit(&self, index: u8, angle: f32, strength: f32) {
        let request = MoveRequest::new(
            self.network.clone(),
            MoveRequestData {
                unit_index: index,
                angle,
                strength,
            },
        );
        request.synchronize(&SyncTarget::Player(PlayerId::SERVER), UpdateFrequency::Once);
    }

    /// Ask the server to (un)highlight one of our units.
    pub fn highlight_unit(&self, index: u8, highlighted: bool) {
        let request = HighlightRequest::new(
            self.network.clone(),
            HighlightRequestData {
                unit_index: index,
                highlighted,
            },
        );
        request.synchronize(&SyncTarget::Player(PlayerId::SERVER), UpdateFrequency::Once);
    }

    fn requested_unit(&self, sender: PlayerId, index: u8) -> Result<SharedUnit, RequestError> {
        if !sender.is_player() {
            return Err(RequestError::NotAPlayer(sender));
        }
        self.unit_by_index(sender, index)
            .ok_or(RequestError::UnknownUnit {
                player: sender,
                index,
            })
    }

    /// Apply a move request from `sender` to its own unit.
    pub fn apply_move_request(
        &self,
        sender: PlayerId,
        request: &MoveRequest,
    ) -> Result<(), RequestError> {
        let unit = self.requested_unit(sender, request.payload().unit_index)?;
        lock(&unit).set_acceleration(request.acceleration());
        Ok(())
    }

    /// Apply a highlight request from `sender` to its own unit.
    pub fn apply_highlight_request(
        &self,
        sender: PlayerId,
        request: &HighlightRequest,
    ) -> Result<(), RequestError> {
        let payload = request.payload();
        let unit = self.requested_unit(sender, payload.unit_index)?;
        lock(&unit).set_highlighted(payload.highlighted);
        Ok(())
    }

    // -- Mirror handlers ----------------------------------------------------

    fn handle_game_unit(&mut self, message: &WireMessage) {
        if self.unit_by_id(message.message_id()).is_some() {
            return;
        }
        if let Some(unit) = create_from_data(GameUnit::new(self.network.clone()), message) {
            tracing::debug!("Mirroring unit {}", message.message_id());
            self.units.push(unit);
        }
    }

    fn handle_game_obstacle(&mut self, message: &WireMessage) {
        if self.obstacle_by_id(message.message_id()).is_some() {
            return;
        }
        if let Some(obstacle) = create_from_data(GameObstacle::new(self.network.clone()), message)
        {
            tracing::debug!("Mirroring obstacle {}", message.message_id());
            self.obstacles.push(obstacle);
        }
    }

    /// A greeting precedes the complete state of the current level, so
    /// whatever was mirrored before it is stale.
    fn handle_new_player_id(&mut self, message: &WireMessage) {
        match NewPlayerId::from_message(message) {
            Some(request) => {
                self.reset();
                self.own_player_id = request.player_id();
                tracing::info!("Playing as {}", self.own_player_id);
            }
            None => tracing::error!("Malformed player id message, dropping it"),
        }
    }
}

/// Wrap a `Game` method into a handler that holds the game weakly.
fn mirror_handler(
    game: &Weak<Mutex<Game>>,
    handle: fn(&mut Game, &WireMessage),
) -> impl Fn(&WireMessage, &MessageContext) + Send + Sync + 'static {
    let game = Weak::clone(game);
    move |message: &WireMessage, _: &MessageContext| {
        if let Some(game) = game.upgrade() {
            handle(&mut lock(&game), message);
        }
    }
}

impl Drop for Game {
    fn drop(&mut self) {
        if let Some(network) = &self.network {
            for id in self.handler_ids.drain(..) {
                network.handlers().remove(id);
            }
        }
    }
}

impl std::fmt::Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("phase", &self.phase)
            .field("level", &self.level)
            .field("units", &self.units.len())
            .field("obstacles", &self.obstacles.len())
            .field("own_player_id", &self.own_player_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
