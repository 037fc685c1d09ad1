//! Synchronizable entities: typed data blocks replicated under one message id.
//!
//! An entity registers one or more content types, each with an update
//! frequency. [`Replicable::synchronize`] encodes every registration whose
//! frequency reaches the requested threshold and hands it to the network.
//! Once an entity has an assigned id, [`set_message_id`] installs a handler
//! that routes every incoming message with that id back into
//! [`Replicable::update_data`]. Dropping the entity removes that handler.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uist_net::{
    ContentType, MessageContext, MessageId, PlayerId, SessionId, UpdateFrequency, WireError,
    WireMessage,
};

use crate::interface::NetworkInterface;

// ---------------------------------------------------------------------------
// Targets and registrations
// ---------------------------------------------------------------------------

/// Who receives a synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    /// One player, or one of the reserved addresses such as
    /// [`PlayerId::SERVER`] and [`PlayerId::ALL_CLIENTS`].
    Player(PlayerId),
    /// Several players.
    Players(Vec<PlayerId>),
    /// One server session directly, whether or not it has a player profile.
    Session(SessionId),
}

/// One content type an entity replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub content_type: ContentType,
    /// Exact payload size in bytes.
    pub size: u16,
    pub frequency: UpdateFrequency,
    pub sending_enabled: bool,
}

/// Errors while encoding or applying entity data.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("content type {0} is not registered on this entity")]
    Unregistered(ContentType),

    #[error(transparent)]
    Wire(#[from] WireError),
}

// ---------------------------------------------------------------------------
// Replication state
// ---------------------------------------------------------------------------

/// Replication bookkeeping embedded in every synchronizable entity.
pub struct Replication {
    message_id: MessageId,
    registrations: Vec<Registration>,
    network: Option<Arc<dyn NetworkInterface>>,
}

impl Replication {
    /// State for an entity that will be given its own message id.
    pub fn new(network: Option<Arc<dyn NetworkInterface>>) -> Self {
        Self {
            message_id: MessageId::NONE,
            registrations: Vec::new(),
            network,
        }
    }

    /// State for a fire-and-forget request travelling under
    /// [`MessageId::EVENT`].
    pub fn event(network: Option<Arc<dyn NetworkInterface>>) -> Self {
        let mut replication = Self::new(network);
        replication.message_id = MessageId::EVENT;
        replication
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn network(&self) -> Option<&Arc<dyn NetworkInterface>> {
        self.network.as_ref()
    }

    /// Register a content type. Re-registering a type replaces its entry.
    pub fn register_message_type(
        &mut self,
        content_type: ContentType,
        size: u16,
        frequency: UpdateFrequency,
    ) {
        let registration = Registration {
            content_type,
            size,
            frequency,
            sending_enabled: true,
        };
        match self.registration_mut(content_type) {
            Some(existing) => *existing = registration,
            None => self.registrations.push(registration),
        }
    }

    pub fn enable_sending(&mut self, content_type: ContentType) {
        self.set_sending(content_type, true);
    }

    pub fn disable_sending(&mut self, content_type: ContentType) {
        self.set_sending(content_type, false);
    }

    fn set_sending(&mut self, content_type: ContentType, enabled: bool) {
        match self.registration_mut(content_type) {
            Some(registration) => registration.sending_enabled = enabled,
            None => tracing::warn!(
                "Cannot toggle sending of unregistered {content_type} on {}",
                self.message_id
            ),
        }
    }

    pub fn registration(&self, content_type: ContentType) -> Option<&Registration> {
        self.registrations
            .iter()
            .find(|registration| registration.content_type == content_type)
    }

    fn registration_mut(&mut self, content_type: ContentType) -> Option<&mut Registration> {
        self.registrations
            .iter_mut()
            .find(|registration| registration.content_type == content_type)
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }
}

impl fmt::Debug for Replication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replication")
            .field("message_id", &self.message_id)
            .field("registrations", &self.registrations)
            .field("networked", &self.network.is_some())
            .finish()
    }
}

impl Drop for Replication {
    fn drop(&mut self) {
        if self.message_id.is_assigned()
            && let Some(network) = &self.network
        {
            network.remove_all_message_handlers(self.message_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Replicable
// ---------------------------------------------------------------------------

/// An entity whose state is replicated through a [`Replication`].
pub trait Replicable: Send + 'static {
    fn replication(&self) -> &Replication;

    fn replication_mut(&mut self) -> &mut Replication;

    /// Encode the current data registered under `content_type`.
    fn encode_content(&self, content_type: ContentType) -> Result<Vec<u8>, ReplicationError>;

    /// Overwrite the data registered under `content_type`.
    fn decode_content(
        &mut self,
        content_type: ContentType,
        bytes: &[u8],
    ) -> Result<(), ReplicationError>;

    /// Called after incoming data has been applied.
    fn on_update(&mut self, _content_type: ContentType) {}

    fn message_id(&self) -> MessageId {
        self.replication().message_id()
    }

    /// Apply an incoming message to the matching registration. The entity's
    /// message id is left unchanged.
    ///
    /// Returns `false` if the message was dropped.
    fn update_data(&mut self, message: &WireMessage) -> bool {
        let content_type = message.content_type();
        let Some(registration) = self.replication().registration(content_type) else {
            tracing::error!(
                "{} has no registration for {content_type}, dropping update",
                self.message_id()
            );
            return false;
        };
        if message.payload.len() != usize::from(registration.size) {
            tracing::error!(
                "{content_type} update for {} has {} bytes, expected {}",
                self.message_id(),
                message.payload.len(),
                registration.size
            );
            return false;
        }
        if let Err(e) = self.decode_content(content_type, &message.payload) {
            tracing::error!("Failed to apply {content_type} to {}: {e}", self.message_id());
            return false;
        }
        self.on_update(content_type);
        true
    }

    /// Send every registration with `frequency >= threshold` and sending
    /// enabled to `target`. Returns the number of messages handed to the
    /// network.
    fn synchronize(&self, target: &SyncTarget, threshold: UpdateFrequency) -> usize {
        let replication = self.replication();
        if replication.registrations().is_empty() {
            tracing::error!("{} has no registered data to synchronize", self.message_id());
            return 0;
        }
        let Some(network) = replication.network() else {
            tracing::error!("{} has no network to synchronize with", self.message_id());
            return 0;
        };

        let mut sent = 0;
        for registration in replication.registrations() {
            if !registration.sending_enabled || registration.frequency < threshold {
                continue;
            }
            let message = match self
                .encode_content(registration.content_type)
                .and_then(|payload| {
                    WireMessage::new(self.message_id(), registration.content_type, payload)
                        .map_err(ReplicationError::from)
                }) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(
                        "Failed to encode {} for {}: {e}",
                        registration.content_type,
                        self.message_id()
                    );
                    continue;
                }
            };

            sent += match target {
                SyncTarget::Player(player) => usize::from(network.send(message, *player)),
                SyncTarget::Players(players) => players
                    .iter()
                    .filter(|player| network.send(message.clone(), **player))
                    .count(),
                SyncTarget::Session(session) => {
                    usize::from(network.send_to_session(message, *session))
                }
            };
        }
        sent
    }
}

// ---------------------------------------------------------------------------
// Shared entities
// ---------------------------------------------------------------------------

/// An entity shared between its owner and the handler that updates it.
pub type Shared<E> = Arc<Mutex<E>>;

pub fn shared<E>(entity: E) -> Shared<E> {
    Arc::new(Mutex::new(entity))
}

/// Lock a shared entity, recovering from poisoning.
pub(crate) fn lock<E>(entity: &Mutex<E>) -> MutexGuard<'_, E> {
    entity.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Give `entity` a new message id.
///
/// Handlers for the previous id are removed. For assignable ids a handler is
/// installed that feeds every message with the new id into
/// [`Replicable::update_data`]. The handler holds only a weak reference.
pub fn set_message_id<E: Replicable>(entity: &Shared<E>, message_id: MessageId) {
    let network = {
        let mut guard = lock(entity);
        let previous = guard.message_id();
        if previous == message_id {
            return;
        }
        let network = guard.replication().network().cloned();
        if previous.is_assigned()
            && let Some(network) = &network
        {
            network.remove_all_message_handlers(previous);
        }
        guard.replication_mut().message_id = message_id;
        network
    };

    if message_id.is_assigned()
        && let Some(network) = network
    {
        let weak = Arc::downgrade(entity);
        network.handlers().add(
            ContentType::ALL_TYPES,
            message_id,
            move |message: &WireMessage, _: &MessageContext| {
                if let Some(entity) = weak.upgrade() {
                    lock(&entity).update_data(message);
                }
            },
        );
    }
}

/// Allocate a fresh id from the entity's network and assign it.
pub fn generate_message_id<E: Replicable>(entity: &Shared<E>) -> Option<MessageId> {
    let Some(network) = lock(entity).replication().network().cloned() else {
        tracing::error!("Cannot generate a message id without a network");
        return None;
    };
    let message_id = network.message_ids().next_id();
    set_message_id(entity, message_id);
    Some(message_id)
}

/// Adopt the id of an incoming message and apply its data to `entity`.
///
/// Returns `None` if the message does not fit the entity.
pub fn create_from_data<E: Replicable>(entity: E, message: &WireMessage) -> Option<Shared<E>> {
    let entity = shared(entity);
    if !lock(&entity).update_data(message) {
        return None;
    }
    set_message_id(&entity, message.message_id());
    Some(entity)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
