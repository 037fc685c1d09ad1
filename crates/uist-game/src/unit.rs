//! Game units: the replicated, physically simulated pieces on the field.

use std::sync::Arc;

use glam::Vec2;
use uist_net::{ContentType, GameUnitData, Payload, PlayerId, UpdateFrequency};

use crate::interface::NetworkInterface;
use crate::obstacle::GameObstacle;
use crate::replication::{Replicable, Replication, ReplicationError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum speed in field units per second.
pub const MAX_VELOCITY: f32 = 110.0;

/// Acceleration applied by a move request at full strength.
pub const MAX_ACCELERATION: f32 = 1000.0;

/// Velocity-proportional deceleration.
pub const BRAKE_FACTOR: f32 = 10.0;

pub const UNIT_RADIUS: f32 = 8.0;

/// Side length of the square playing field.
pub const FIELD_SIZE: f32 = 480.0;

/// Factor applied to the penetration depth when pushing a unit out of an
/// obstacle.
const SEPARATION_MARGIN: f32 = 1.2;

// ---------------------------------------------------------------------------
// GameUnit
// ---------------------------------------------------------------------------

/// One unit. Position and flags are replicated; kinematics and the hunting
/// role stay on the process that simulates it.
#[derive(Debug)]
pub struct GameUnit {
    replication: Replication,
    data: GameUnitData,
    velocity: Vec2,
    acceleration: Vec2,
    hunting: bool,
}

impl GameUnit {
    /// A living, non-arrived unit at the origin.
    pub fn new(network: Option<Arc<dyn NetworkInterface>>) -> Self {
        let mut replication = Replication::new(network);
        replication.register_message_type(
            ContentType::GAME_UNIT,
            GameUnitData::SIZE,
            UpdateFrequency::Always,
        );
        Self {
            replication,
            data: GameUnitData {
                living: true,
                ..GameUnitData::default()
            },
            velocity: Vec2::ZERO,
            acceleration: Vec2::ZERO,
            hunting: false,
        }
    }

    pub fn data(&self) -> &GameUnitData {
        &self.data
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.data.x, self.data.y)
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.data.x = position.x;
        self.data.y = position.y;
    }

    pub fn number(&self) -> u8 {
        self.data.number
    }

    pub fn set_number(&mut self, number: u8) {
        self.data.number = number;
    }

    pub fn owner(&self) -> PlayerId {
        PlayerId(self.data.owner)
    }

    pub fn set_owner(&mut self, owner: PlayerId) {
        self.data.owner = owner.0;
    }

    pub fn is_living(&self) -> bool {
        self.data.living
    }

    pub fn set_living(&mut self, living: bool) {
        self.data.living = living;
    }

    pub fn is_highlighted(&self) -> bool {
        self.data.highlighted
    }

    pub fn set_highlighted(&mut self, highlighted: bool) {
        self.data.highlighted = highlighted;
    }

    pub fn has_arrived(&self) -> bool {
        self.data.arrived
    }

    pub fn set_arrived(&mut self, arrived: bool) {
        self.data.arrived = arrived;
    }

    /// Hunting units eliminate non-hunting ones and never arrive.
    pub fn is_hunting(&self) -> bool {
        self.hunting
    }

    pub fn set_hunting(&mut self, hunting: bool) {
        self.hunting = hunting;
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec2) {
        self.velocity = velocity;
    }

    pub fn acceleration(&self) -> Vec2 {
        self.acceleration
    }

    /// Set the applied acceleration, kept until the next request.
    pub fn set_acceleration(&mut self, acceleration: Vec2) {
        self.acceleration = acceleration;
    }

    // -- Physics ------------------------------------------------------------

    /// Integrate one step of `dt` seconds. Dead and arrived units stand still.
    pub fn advance(&mut self, dt: f32) {
        if !self.is_living() || self.has_arrived() {
            self.velocity = Vec2::ZERO;
            self.acceleration = Vec2::ZERO;
            return;
        }

        let effective = self.acceleration - self.velocity * BRAKE_FACTOR;
        self.velocity += effective * dt;
        self.velocity = self.velocity.clamp_length_max(MAX_VELOCITY);

        let position = self.position() + self.velocity * dt;
        self.set_position(position);
    }

    /// Keep the unit inside the field, bouncing off the walls.
    pub fn reflect_on_walls(&mut self) {
        let min = UNIT_RADIUS / 2.0;
        let max = FIELD_SIZE - UNIT_RADIUS / 2.0;

        if self.data.x < min {
            self.data.x = min;
            self.velocity.x = -self.velocity.x;
        }
        if self.data.x > max {
            self.data.x = max;
            self.velocity.x = -self.velocity.x;
        }
        if self.data.y < min {
            self.data.y = min;
            self.velocity.y = -self.velocity.y;
        }
        if self.data.y > max {
            self.data.y = max;
            self.velocity.y = -self.velocity.y;
        }
    }

    /// Whether the unit touches the goal line at the bottom of the field.
    pub fn reached_goal_line(&self) -> bool {
        self.data.y >= FIELD_SIZE - UNIT_RADIUS
    }

    /// Only a hunting and a non-hunting unit can collide.
    pub fn collides_with_unit(&self, other: &GameUnit) -> bool {
        if self.hunting == other.hunting {
            return false;
        }
        self.position().distance(other.position()) < 2.0 * UNIT_RADIUS
    }

    pub fn collides_with_obstacle(&self, obstacle: &GameObstacle) -> bool {
        self.position().distance(obstacle.position()) < UNIT_RADIUS + obstacle.radius()
    }

    /// Bounce off `obstacle` and push the unit out of it along the line
    /// between both centers.
    pub fn separate_from(&mut self, obstacle: &GameObstacle) {
        self.reflect_on(obstacle);

        let offset = self.position() - obstacle.position();
        let distance = offset.length();
        let penetration = UNIT_RADIUS + obstacle.radius() - distance;
        if penetration <= 0.0 || distance <= f32::EPSILON {
            return;
        }
        let position = self.position() + offset / distance * (penetration * SEPARATION_MARGIN);
        self.set_position(position);
    }

    /// Turn the velocity component along the collision axis away from
    /// `obstacle`, keeping its magnitude.
    pub fn reflect_on(&mut self, obstacle: &GameObstacle) {
        let Some(axis) = (self.position() - obstacle.position()).try_normalize() else {
            return;
        };
        let speed_on_axis = self.velocity.dot(axis);
        self.velocity -= axis * speed_on_axis;
        self.velocity += axis * speed_on_axis.abs();
    }
}

impl Replicable for GameUnit {
    fn replication(&self) -> &Replication {
        &self.replication
    }

    fn replication_mut(&mut self) -> &mut Replication {
        &mut self.replication
    }

    fn encode_content(&self, content_type: ContentType) -> Result<Vec<u8>, ReplicationError> {
        match content_type {
            ContentType::GAME_UNIT => Ok(self.data.to_bytes()?),
            other => Err(ReplicationError::Unregistered(other)),
        }
    }

    fn decode_content(
        &mut self,
        content_type: ContentType,
        bytes: &[u8],
    ) -> Result<(), ReplicationError> {
        match content_type {
            ContentType::GAME_UNIT => {
                self.data = GameUnitData::from_bytes(bytes)?;
                Ok(())
            }
            other => Err(ReplicationError::Unregistered(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_at(x: f32, y: f32, hunting: bool) -> GameUnit {
        let mut unit = GameUnit::new(None);
        unit.set_position(Vec2::new(x, y));
        unit.set_hunting(hunting);
        unit
    }

    #[test]
    fn test_new_unit_is_living() {
        let unit = GameUnit::new(None);
        assert!(unit.is_living());
        assert!(!unit.has_arrived());
        assert!(!unit.is_highlighted());
    }

    #[test]
    fn test_advance_applies_brake_and_clamps_speed() {
        let mut unit = unit_at(100.0, 100.0, false);
        unit.set_acceleration(Vec2::new(MAX_ACCELERATION, 0.0));

        unit.advance(0.02);
        // a' = 1000 - 0 * brake, v = 20, x += 20 * 0.02.
        assert!((unit.velocity().x - 20.0).abs() < 1e-4);
        assert!((unit.position().x - 100.4).abs() < 1e-4);

        for _ in 0..100 {
            unit.advance(0.02);
        }
        assert!(unit.velocity().length() <= MAX_VELOCITY + 1e-3);
        assert!(unit.velocity().y.abs() < 1e-6);
    }

    #[test]
    fn test_dead_or_arrived_units_stand_still() {
        let mut dead = unit_at(100.0, 100.0, false);
        dead.set_velocity(Vec2::new(50.0, 0.0));
        dead.set_living(false);
        dead.advance(0.1);
        assert_eq!(dead.position(), Vec2::new(100.0, 100.0));
        assert_eq!(dead.velocity(), Vec2::ZERO);

        let mut arrived = unit_at(100.0, 474.0, false);
        arrived.set_acceleration(Vec2::new(0.0, 500.0));
        arrived.set_arrived(true);
        arrived.advance(0.1);
        assert_eq!(arrived.position(), Vec2::new(100.0, 474.0));
    }

    #[test]
    fn test_reflect_on_bottom_wall() {
        let mut unit = unit_at(200.0, FIELD_SIZE - UNIT_RADIUS / 2.0, true);
        unit.set_velocity(Vec2::new(0.0, 50.0));

        unit.advance(0.02);
        assert!(unit.position().y > FIELD_SIZE - UNIT_RADIUS / 2.0);
        let downward = unit.velocity().y;

        unit.reflect_on_walls();
        assert_eq!(unit.position().y, FIELD_SIZE - UNIT_RADIUS / 2.0);
        assert_eq!(unit.velocity().y, -downward);
    }

    #[test]
    fn test_reflect_on_left_and_top_walls() {
        let mut unit = unit_at(1.0, 2.0, false);
        unit.set_velocity(Vec2::new(-10.0, -5.0));
        unit.reflect_on_walls();
        assert_eq!(unit.position(), Vec2::new(UNIT_RADIUS / 2.0, UNIT_RADIUS / 2.0));
        assert_eq!(unit.velocity(), Vec2::new(10.0, 5.0));
    }

    #[test]
    fn test_unit_collision_needs_exactly_one_hunter() {
        let prey = unit_at(100.0, 100.0, false);
        let other_prey = unit_at(105.0, 100.0, false);
        let hunter = unit_at(110.0, 100.0, true);
        let other_hunter = unit_at(112.0, 100.0, true);
        let far_hunter = unit_at(200.0, 100.0, true);

        assert!(!prey.collides_with_unit(&other_prey));
        assert!(!hunter.collides_with_unit(&other_hunter));
        assert!(prey.collides_with_unit(&hunter));
        assert!(hunter.collides_with_unit(&prey));
        assert!(!prey.collides_with_unit(&far_hunter));
    }

    #[test]
    fn test_separate_from_obstacle() {
        let mut obstacle = GameObstacle::new(None);
        obstacle.set_position(Vec2::new(100.0, 100.0));
        obstacle.set_radius(20.0);

        let mut unit = unit_at(120.0, 100.0, false);
        unit.set_velocity(Vec2::new(-30.0, 10.0));
        assert!(unit.collides_with_obstacle(&obstacle));

        unit.separate_from(&obstacle);
        // Penetration 8, pushed out by 8 * 1.2 along +x.
        assert!((unit.position().x - 129.6).abs() < 1e-4);
        assert_eq!(unit.position().y, 100.0);
        assert_eq!(unit.velocity(), Vec2::new(30.0, 10.0));
        assert!(!unit.collides_with_obstacle(&obstacle));
    }

    #[test]
    fn test_reflect_keeps_outward_velocity() {
        let mut obstacle = GameObstacle::new(None);
        obstacle.set_position(Vec2::new(0.0, 0.0));
        obstacle.set_radius(10.0);

        let mut unit = unit_at(0.0, 15.0, false);
        unit.set_velocity(Vec2::new(3.0, 4.0));
        unit.reflect_on(&obstacle);
        assert_eq!(unit.velocity(), Vec2::new(3.0, 4.0));
    }

    #[test]
    fn test_replicated_data_round_trip() {
        let mut unit = unit_at(12.5, 300.0, false);
        unit.set_number(3);
        unit.set_owner(PlayerId(5));
        unit.set_highlighted(true);

        let bytes = unit.encode_content(ContentType::GAME_UNIT).unwrap();
        let mut mirror = GameUnit::new(None);
        mirror
            .decode_content(ContentType::GAME_UNIT, &bytes)
            .unwrap();
        assert_eq!(mirror.data(), unit.data());
        assert!(matches!(
            mirror.encode_content(ContentType::GAME_OBSTACLE),
            Err(ReplicationError::Unregistered(_))
        ));
    }
}
