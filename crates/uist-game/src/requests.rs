//! One-shot command entities sent under [`MessageId::EVENT`].
//!
//! Requests are built, synchronized once and dropped. They never get an
//! assigned id, so no handler is installed for them.

use std::sync::Arc;

use glam::Vec2;
use uist_net::{
    ContentType, HighlightRequestData, MoveRequestData, NewPlayerIdData, Payload, PlayerId,
    UpdateFrequency, WireMessage,
};

use crate::interface::NetworkInterface;
use crate::replication::{Replicable, Replication, ReplicationError};
use crate::unit::MAX_ACCELERATION;

/// A single-payload event.
#[derive(Debug)]
pub struct Request<P> {
    replication: Replication,
    payload: P,
}

/// Steer one of the sender's units.
pub type MoveRequest = Request<MoveRequestData>;

/// Toggle the highlight of one of the sender's units.
pub type HighlightRequest = Request<HighlightRequestData>;

/// Tell a client its player id.
pub type NewPlayerId = Request<NewPlayerIdData>;

impl<P: Payload + Send + 'static> Request<P> {
    pub fn new(network: Option<Arc<dyn NetworkInterface>>, payload: P) -> Self {
        let mut replication = Replication::event(network);
        replication.register_message_type(P::CONTENT_TYPE, P::SIZE, UpdateFrequency::Once);
        Self {
            replication,
            payload,
        }
    }

    /// Decode a received request. Returns `None` for a foreign or malformed
    /// message.
    pub fn from_message(message: &WireMessage) -> Option<Self>
    where
        P: Default,
    {
        let mut request = Self::new(None, P::default());
        request.update_data(message).then_some(request)
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

impl Request<MoveRequestData> {
    /// Acceleration requested for the unit: `(cos θ, −sin θ)` scaled by the
    /// clamped strength.
    pub fn acceleration(&self) -> Vec2 {
        let strength = self.payload.strength.clamp(0.0, 1.0);
        let angle = self.payload.angle;
        Vec2::new(angle.cos(), -angle.sin()) * strength * MAX_ACCELERATION
    }
}

impl Request<NewPlayerIdData> {
    pub fn player_id(&self) -> PlayerId {
        PlayerId(self.payload.player_id)
    }
}

impl<P: Payload + Send + 'static> Replicable for Request<P> {
    fn replication(&self) -> &Replication {
        &self.replication
    }

    fn replication_mut(&mut self) -> &mut Replication {
        &mut self.replication
    }

    fn encode_content(&self, content_type: ContentType) -> Result<Vec<u8>, ReplicationError> {
        if content_type != P::CONTENT_TYPE {
            return Err(ReplicationError::Unregistered(content_type));
        }
        Ok(self.payload.to_bytes()?)
    }

    fn decode_content(
        &mut self,
        content_type: ContentType,
        bytes: &[u8],
    ) -> Result<(), ReplicationError> {
        if content_type != P::CONTENT_TYPE {
            return Err(ReplicationError::Unregistered(content_type));
        }
        self.payload = P::from_bytes(bytes)?;
        Ok(())
    }
}
