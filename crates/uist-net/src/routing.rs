//! Message routing: dispatch incoming messages to every matching handler.
//!
//! A [`HandlerRegistry`] holds an ordered list of handlers, each filtered by
//! content type and message id. [`ContentType::ALL_TYPES`] and
//! [`MessageId::ALL`] act as wildcards. Dispatch copies the matching handlers
//! out of the lock before running them, so a handler may register or remove
//! handlers (including itself) without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::messages::{ContentType, MessageId, PlayerId};
use crate::tcp_server::SessionId;
use crate::wire::WireMessage;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Context provided to every message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageContext {
    /// The player that sent the message. [`PlayerId::SERVER`] on clients,
    /// [`PlayerId::NEW_CLIENT`] for server sessions without a player profile.
    pub sender: PlayerId,
    /// The server session the message arrived on, if any.
    pub session: Option<SessionId>,
}

impl MessageContext {
    /// Context for messages received from the server.
    pub fn from_server() -> Self {
        Self {
            sender: PlayerId::SERVER,
            session: None,
        }
    }
}

/// Trait for message handlers. Implemented for plain closures.
///
/// Handlers run on the network routing task and must not block.
pub trait MessageHandler: Send + Sync {
    /// Process a single incoming message.
    fn handle(&self, message: &WireMessage, ctx: &MessageContext);
}

/// Blanket implementation for closures.
impl<F> MessageHandler for F
where
    F: Fn(&WireMessage, &MessageContext) + Send + Sync,
{
    fn handle(&self, message: &WireMessage, ctx: &MessageContext) {
        self(message, ctx);
    }
}

/// Handle returned by [`HandlerRegistry::add`], used to remove one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

struct Registration {
    id: HandlerId,
    content_type: ContentType,
    message_id: MessageId,
    handler: Arc<dyn MessageHandler>,
}

impl Registration {
    fn matches(&self, message: &WireMessage) -> bool {
        (self.content_type == ContentType::ALL_TYPES
            || self.content_type == message.content_type())
            && (self.message_id == MessageId::ALL || self.message_id == message.message_id())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered, thread-safe list of message handlers.
pub struct HandlerRegistry {
    handlers: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handler for messages matching both filters.
    pub fn add<H: MessageHandler + 'static>(
        &self,
        content_type: ContentType,
        message_id: MessageId,
        handler: H,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Registration {
            id,
            content_type,
            message_id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a single handler. Returns `false` if it was already gone.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|registration| registration.id != id);
        handlers.len() != before
    }

    /// Remove every handler registered for exactly `message_id`.
    pub fn remove_all_for(&self, message_id: MessageId) -> usize {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|registration| registration.message_id != message_id);
        before - handlers.len()
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Return whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Invoke every handler matching `message`, in registration order.
    ///
    /// Returns the number of handlers invoked. A message nobody handles is
    /// logged and dropped.
    pub fn dispatch(&self, message: &WireMessage, ctx: &MessageContext) -> usize {
        let matching: Vec<Arc<dyn MessageHandler>> = self
            .lock()
            .iter()
            .filter(|registration| registration.matches(message))
            .map(|registration| Arc::clone(&registration.handler))
            .collect();

        if matching.is_empty() {
            tracing::error!(
                message_id = %message.message_id(),
                content_type = %message.content_type(),
                sender = %ctx.sender,
                "No handler for incoming message, dropping it"
            );
            return 0;
        }

        for handler in &matching {
            handler.handle(message, ctx);
        }
        matching.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn message(id: u16, content_type: ContentType) -> WireMessage {
        WireMessage::new(MessageId(id), content_type, vec![0; 2]).unwrap()
    }

    fn counter(registry: &HandlerRegistry, ct: ContentType, id: MessageId) -> Arc<AtomicU32> {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        registry.add(ct, id, move |_: &WireMessage, _: &MessageContext| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_message_routed_to_matching_handlers() {
        let registry = HandlerRegistry::new();
        let exact = counter(&registry, ContentType::NEW_PLAYER_ID, MessageId(7));
        let any_id = counter(&registry, ContentType::NEW_PLAYER_ID, MessageId::ALL);
        let any_type = counter(&registry, ContentType::ALL_TYPES, MessageId(7));
        let other = counter(&registry, ContentType::HIGHLIGHT_REQUEST, MessageId::ALL);

        let invoked = registry.dispatch(
            &message(7, ContentType::NEW_PLAYER_ID),
            &MessageContext::from_server(),
        );

        assert_eq!(invoked, 3);
        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(any_id.load(Ordering::SeqCst), 1);
        assert_eq!(any_type.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_orphan_message_is_dropped() {
        let registry = HandlerRegistry::new();
        let count = counter(&registry, ContentType::GAME_UNIT, MessageId(3));
        let invoked = registry.dispatch(
            &message(4, ContentType::GAME_UNIT),
            &MessageContext::from_server(),
        );
        assert_eq!(invoked, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_receives_context() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        registry.add(
            ContentType::ALL_TYPES,
            MessageId::ALL,
            move |_: &WireMessage, ctx: &MessageContext| {
                *seen_clone.lock().unwrap() = Some(*ctx);
            },
        );

        let ctx = MessageContext {
            sender: PlayerId(4),
            session: Some(SessionId(9)),
        };
        registry.dispatch(&message(3, ContentType::MOVE_REQUEST), &ctx);
        assert_eq!(*seen.lock().unwrap(), Some(ctx));
    }

    #[test]
    fn test_remove_all_for_message_id() {
        let registry = HandlerRegistry::new();
        counter(&registry, ContentType::ALL_TYPES, MessageId(5));
        counter(&registry, ContentType::GAME_UNIT, MessageId(5));
        let survivor = counter(&registry, ContentType::GAME_UNIT, MessageId::ALL);

        assert_eq!(registry.remove_all_for(MessageId(5)), 2);
        assert_eq!(registry.len(), 1);

        registry.dispatch(
            &message(5, ContentType::GAME_UNIT),
            &MessageContext::from_server(),
        );
        assert_eq!(survivor.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_single_handler() {
        let registry = HandlerRegistry::new();
        let id = registry.add(
            ContentType::GAME_UNIT,
            MessageId::ALL,
            |_: &WireMessage, _: &MessageContext| {},
        );
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handler_may_modify_registry_during_dispatch() {
        let registry = Arc::new(HandlerRegistry::new());
        let inner = Arc::clone(&registry);
        registry.add(
            ContentType::GAME_UNIT,
            MessageId::ALL,
            move |message: &WireMessage, _: &MessageContext| {
                inner.add(
                    ContentType::ALL_TYPES,
                    message.message_id(),
                    |_: &WireMessage, _: &MessageContext| {},
                );
            },
        );

        // The handler added during dispatch is not part of the snapshot.
        let invoked = registry.dispatch(
            &message(3, ContentType::GAME_UNIT),
            &MessageContext::from_server(),
        );
        assert_eq!(invoked, 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_clear() {
        let registry = HandlerRegistry::new();
        counter(&registry, ContentType::GAME_UNIT, MessageId::ALL);
        counter(&registry, ContentType::GAME_OBSTACLE, MessageId::ALL);
        registry.clear();
        assert!(registry.is_empty());
    }
}
