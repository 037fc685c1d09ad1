//! The contract simulation code uses to talk to the network.
//!
//! Both endpoints, [`GameNetworkClient`](crate::GameNetworkClient) and
//! [`GameNetworkServer`](crate::GameNetworkServer), expose the same handler
//! registry, message id allocator and addressed `send`.

use uist_net::{
    ContentType, HandlerRegistry, MessageId, MessageIdAllocator, PlayerId, SessionId, WireMessage,
};

/// A routing layer over one transport endpoint.
pub trait NetworkInterface: Send + Sync {
    /// Handlers invoked for every incoming message.
    fn handlers(&self) -> &HandlerRegistry;

    /// Allocator for entity message ids on this endpoint.
    fn message_ids(&self) -> &MessageIdAllocator;

    /// Send `message` to `receiver`. Invalid messages and unknown receivers
    /// are logged and dropped.
    ///
    /// Returns whether the message was queued for delivery.
    fn send(&self, message: WireMessage, receiver: PlayerId) -> bool;

    /// Send `message` directly to one server session. Returns whether the
    /// message was queued.
    fn send_to_session(&self, message: WireMessage, session: SessionId) -> bool {
        tracing::error!(
            "Cannot send {} for {} to {session}: this endpoint has no sessions",
            message.content_type(),
            message.message_id()
        );
        false
    }

    /// Remove every handler registered for exactly `message_id`.
    fn remove_all_message_handlers(&self, message_id: MessageId) -> usize {
        self.handlers().remove_all_for(message_id)
    }
}

/// Reject messages that must never go out: undefined content type or no id.
pub(crate) fn check_outgoing(message: &WireMessage) -> bool {
    if message.content_type() == ContentType::UNDEFINED {
        tracing::error!(
            "Refusing to send message {} with undefined content type",
            message.message_id()
        );
        return false;
    }
    if message.message_id() == MessageId::NONE {
        tracing::error!(
            "Refusing to send {} without a message id",
            message.content_type()
        );
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------
