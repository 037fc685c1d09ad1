//! Message catalogue: identifiers, content types, update frequencies and the
//! fixed-size payloads carried by each content type.
//!
//! Payloads are encoded with [`postcard`]. Every integer wider than a byte is
//! encoded as fixed-width little-endian so each content type has exactly one
//! valid body length, which the wire layer checks before dispatching.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::wire::{MessageHeader, WireError, WireMessage};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier shared by every message belonging to one replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MessageId(pub u16);

impl MessageId {
    /// No identifier assigned.
    pub const NONE: MessageId = MessageId(0);
    /// Handler filter matching any message id.
    pub const ALL: MessageId = MessageId(1);
    /// One-shot requests and notifications that belong to no entity.
    pub const EVENT: MessageId = MessageId(2);
    /// First id handed out to entities.
    pub const FIRST: MessageId = MessageId(3);

    /// Whether this id belongs to an entity rather than a reserved slot.
    pub fn is_assigned(self) -> bool {
        self >= Self::FIRST
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a participant in a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PlayerId(pub u16);

impl PlayerId {
    /// No player.
    pub const NONE: PlayerId = PlayerId(0);
    /// The authoritative server.
    pub const SERVER: PlayerId = PlayerId(1);
    /// Every connected client.
    pub const ALL_CLIENTS: PlayerId = PlayerId(2);
    /// A client whose player id has not been assigned yet.
    pub const NEW_CLIENT: PlayerId = PlayerId(3);
    /// First id handed out to connecting clients.
    pub const FIRST_CLIENT: PlayerId = PlayerId(4);

    /// Whether this id names an actual player.
    pub fn is_player(self) -> bool {
        self >= Self::FIRST_CLIENT
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => f.write_str("none"),
            Self::SERVER => f.write_str("server"),
            Self::ALL_CLIENTS => f.write_str("all-clients"),
            Self::NEW_CLIENT => f.write_str("new-client"),
            PlayerId(id) => write!(f, "player-{id}"),
        }
    }
}

/// Tag identifying the layout of a message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContentType(pub u8);

impl ContentType {
    /// Unset content type. Never sent.
    pub const UNDEFINED: ContentType = ContentType(0);
    /// Handler filter matching any content type.
    pub const ALL_TYPES: ContentType = ContentType(1);
    /// [`GameUnitData`].
    pub const GAME_UNIT: ContentType = ContentType(2);
    /// [`MoveRequestData`].
    pub const MOVE_REQUEST: ContentType = ContentType(3);
    /// [`HighlightRequestData`].
    pub const HIGHLIGHT_REQUEST: ContentType = ContentType(4);
    /// [`GameObstacleData`].
    pub const GAME_OBSTACLE: ContentType = ContentType(5);
    /// [`NewPlayerIdData`].
    pub const NEW_PLAYER_ID: ContentType = ContentType(6);

    /// Encoded payload size for the known content types.
    pub fn payload_size(self) -> Option<u16> {
        match self {
            Self::GAME_UNIT => Some(GameUnitData::SIZE),
            Self::MOVE_REQUEST => Some(MoveRequestData::SIZE),
            Self::HIGHLIGHT_REQUEST => Some(HighlightRequestData::SIZE),
            Self::GAME_OBSTACLE => Some(GameObstacleData::SIZE),
            Self::NEW_PLAYER_ID => Some(NewPlayerIdData::SIZE),
            _ => None,
        }
    }

    /// Human-readable name for logging.
    pub fn name(self) -> &'static str {
        match self {
            Self::UNDEFINED => "undefined",
            Self::ALL_TYPES => "all-types",
            Self::GAME_UNIT => "game-unit",
            Self::MOVE_REQUEST => "move-request",
            Self::HIGHLIGHT_REQUEST => "highlight-request",
            Self::GAME_OBSTACLE => "game-obstacle",
            Self::NEW_PLAYER_ID => "new-player-id",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// How urgently a registered payload needs to be replicated.
///
/// Ordered from least to most urgent. Synchronizing with a threshold sends
/// every payload whose frequency is at least that threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UpdateFrequency {
    /// Sent when explicitly requested for a full state transfer.
    Once,
    /// Sent on demand.
    OnDemand,
    /// Sent whenever the data changes.
    OnChange,
    /// Sent on every tick.
    Always,
}

// ---------------------------------------------------------------------------
// Message id allocation
// ---------------------------------------------------------------------------

/// Monotonic allocator for entity [`MessageId`]s, owned by one network
/// interface.
#[derive(Debug)]
pub struct MessageIdAllocator {
    next: AtomicU16,
}

impl MessageIdAllocator {
    /// Create an allocator whose first id is [`MessageId::FIRST`].
    pub fn new() -> Self {
        Self {
            next: AtomicU16::new(MessageId::FIRST.0),
        }
    }

    /// Return the next unused id. Reserved ids are skipped on wrap-around.
    pub fn next_id(&self) -> MessageId {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id >= MessageId::FIRST.0 {
                return MessageId(id);
            }
        }
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A fixed-size message body bound to one content type.
pub trait Payload: Serialize + DeserializeOwned {
    /// Content type this payload travels under.
    const CONTENT_TYPE: ContentType;
    /// Exact encoded size in bytes.
    const SIZE: u16;

    /// Encode into the wire representation.
    fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let bytes = postcard::to_allocvec(self)?;
        if bytes.len() != usize::from(Self::SIZE) {
            return Err(WireError::LengthMismatch {
                content_type: Self::CONTENT_TYPE,
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Decode from a body of exactly [`Self::SIZE`] bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != usize::from(Self::SIZE) {
            return Err(WireError::LengthMismatch {
                content_type: Self::CONTENT_TYPE,
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Wrap the payload into a message addressed with `message_id`.
    fn to_message(&self, message_id: MessageId) -> Result<WireMessage, WireError> {
        let payload = self.to_bytes()?;
        Ok(WireMessage {
            header: MessageHeader {
                message_id,
                content_type: Self::CONTENT_TYPE,
                content_length: Self::SIZE,
            },
            payload,
        })
    }
}

/// Replicated state of one game unit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GameUnitData {
    /// Horizontal position.
    pub x: f32,
    /// Vertical position, growing towards the goal line.
    pub y: f32,
    /// Number displayed on the unit, 1-based per owner.
    pub number: u8,
    /// Owning player.
    #[serde(with = "postcard::fixint::le")]
    pub owner: u16,
    pub highlighted: bool,
    pub living: bool,
    pub arrived: bool,
}

impl Payload for GameUnitData {
    const CONTENT_TYPE: ContentType = ContentType::GAME_UNIT;
    const SIZE: u16 = 14;
}

/// Request to steer one of the sender's units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveRequestData {
    /// Index of the unit among the sender's units.
    pub unit_index: u8,
    /// Direction in radians, counter-clockwise with y pointing down.
    pub angle: f32,
    /// Fraction of the maximum acceleration, clamped to `0..=1`.
    pub strength: f32,
}

impl Payload for MoveRequestData {
    const CONTENT_TYPE: ContentType = ContentType::MOVE_REQUEST;
    const SIZE: u16 = 9;
}

/// Request to toggle the highlight of one of the sender's units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HighlightRequestData {
    pub unit_index: u8,
    pub highlighted: bool,
}

impl Payload for HighlightRequestData {
    const CONTENT_TYPE: ContentType = ContentType::HIGHLIGHT_REQUEST;
    const SIZE: u16 = 2;
}

/// Replicated state of one static obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GameObstacleData {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

impl Payload for GameObstacleData {
    const CONTENT_TYPE: ContentType = ContentType::GAME_OBSTACLE;
    const SIZE: u16 = 12;
}

/// Tells a freshly connected client which player id it plays as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewPlayerIdData {
    #[serde(with = "postcard::fixint::le")]
    pub player_id: u16,
}

impl Payload for NewPlayerIdData {
    const CONTENT_TYPE: ContentType = ContentType::NEW_PLAYER_ID;
    const SIZE: u16 = 2;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_sizes_match_encoding() {
        let unit = GameUnitData {
            x: 20.0,
            y: 96.0,
            number: 1,
            owner: u16::MAX,
            highlighted: true,
            living: true,
            arrived: false,
        };
        assert_eq!(unit.to_bytes().unwrap().len(), 14);
        assert_eq!(MoveRequestData::default().to_bytes().unwrap().len(), 9);
        assert_eq!(HighlightRequestData::default().to_bytes().unwrap().len(), 2);
        assert_eq!(GameObstacleData::default().to_bytes().unwrap().len(), 12);
        let new_player = NewPlayerIdData { player_id: 4000 };
        assert_eq!(new_player.to_bytes().unwrap().len(), 2);
    }

    #[test]
    fn test_player_id_is_little_endian() {
        let bytes = NewPlayerIdData { player_id: 0x0104 }.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x04, 0x01]);
    }

    #[test]
    fn test_unit_payload_decodes() {
        let unit = GameUnitData {
            x: 1.5,
            y: -3.25,
            number: 5,
            owner: 5,
            highlighted: false,
            living: false,
            arrived: true,
        };
        let decoded = GameUnitData::from_bytes(&unit.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, unit);
    }

    #[test]
    fn test_short_body_rejected() {
        let result = GameObstacleData::from_bytes(&[0u8; 8]);
        assert!(matches!(
            result,
            Err(WireError::LengthMismatch {
                expected: 12,
                actual: 8,
                ..
            })
        ));
    }

    #[test]
    fn test_to_message_fills_header() {
        let message = HighlightRequestData {
            unit_index: 2,
            highlighted: true,
        }
        .to_message(MessageId::EVENT)
        .unwrap();
        assert_eq!(message.header.message_id, MessageId::EVENT);
        assert_eq!(message.header.content_type, ContentType::HIGHLIGHT_REQUEST);
        assert_eq!(message.header.content_length, 2);
        assert_eq!(message.payload, vec![2, 1]);
    }

    #[test]
    fn test_payload_size_lookup() {
        assert_eq!(ContentType::GAME_UNIT.payload_size(), Some(14));
        assert_eq!(ContentType::NEW_PLAYER_ID.payload_size(), Some(2));
        assert_eq!(ContentType::UNDEFINED.payload_size(), None);
        assert_eq!(ContentType::ALL_TYPES.payload_size(), None);
        assert_eq!(ContentType(200).payload_size(), None);
    }

    #[test]
    fn test_update_frequency_ordering() {
        assert!(UpdateFrequency::Once < UpdateFrequency::OnDemand);
        assert!(UpdateFrequency::OnDemand < UpdateFrequency::OnChange);
        assert!(UpdateFrequency::OnChange < UpdateFrequency::Always);
    }

    #[test]
    fn test_message_ids_are_unique_and_skip_reserved() {
        let ids = MessageIdAllocator::new();
        let first = ids.next_id();
        let second = ids.next_id();
        assert_eq!(first, MessageId::FIRST);
        assert_eq!(second, MessageId(4));

        let wrapping = MessageIdAllocator {
            next: AtomicU16::new(u16::MAX),
        };
        assert_eq!(wrapping.next_id(), MessageId(u16::MAX));
        assert_eq!(wrapping.next_id(), MessageId::FIRST);
    }

    #[test]
    fn test_reserved_ids() {
        assert!(!MessageId::EVENT.is_assigned());
        assert!(MessageId::FIRST.is_assigned());
        assert!(!PlayerId::NEW_CLIENT.is_player());
        assert!(PlayerId::FIRST_CLIENT.is_player());
        assert_eq!(PlayerId::SERVER.to_string(), "server");
        assert_eq!(PlayerId(7).to_string(), "player-7");
    }
}
