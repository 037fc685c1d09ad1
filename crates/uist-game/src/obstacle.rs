//! Static circular obstacles.

use std::sync::Arc;

use glam::Vec2;
use uist_net::{ContentType, GameObstacleData, Payload, UpdateFrequency};

use crate::interface::NetworkInterface;
use crate::replication::{Replicable, Replication, ReplicationError};

/// Radius of an obstacle nobody has sized yet.
pub const DEFAULT_OBSTACLE_RADIUS: f32 = 64.0;

#[derive(Debug)]
pub struct GameObstacle {
    replication: Replication,
    data: GameObstacleData,
}

impl GameObstacle {
    pub fn new(network: Option<Arc<dyn NetworkInterface>>) -> Self {
        let mut replication = Replication::new(network);
        replication.register_message_type(
            ContentType::GAME_OBSTACLE,
            GameObstacleData::SIZE,
            UpdateFrequency::Always,
        );
        Self {
            replication,
            data: GameObstacleData {
                x: 0.0,
                y: 0.0,
                radius: DEFAULT_OBSTACLE_RADIUS,
            },
        }
    }

    pub fn data(&self) -> &GameObstacleData {
        &self.data
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.data.x, self.data.y)
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.data.x = position.x;
        self.data.y = position.y;
    }

    pub fn radius(&self) -> f32 {
        self.data.radius
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.data.radius = radius;
    }
}

impl Replicable for GameObstacle {
    fn replication(&self) -> &Replication {
        &self.replication
    }

    fn replication_mut(&mut self) -> &mut Replication {
        &mut self.replication
    }

    fn encode_content(&self, content_type: ContentType) -> Result<Vec<u8>, ReplicationError> {
        match content_type {
            ContentType::GAME_OBSTACLE => Ok(self.data.to_bytes()?),
            other => Err(ReplicationError::Unregistered(other)),
        }
    }

    fn decode_content(
        &mut self,
        content_type: ContentType,
        bytes: &[u8],
    ) -> Result<(), ReplicationError> {
        match content_type {
            ContentType::GAME_OBSTACLE => {
                self.data = GameObstacleData::from_bytes(bytes)?;
                Ok(())
            }
            other => Err(ReplicationError::Unregistered(other)),
        }
    }
}
