//! Client-side network interface: routes server messages into the handler
//! registry and rebroadcasts connection lifecycle events.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use uist_net::{
    ClientConfig, ClientEvent, ConnectionEvent, ConnectionStateWatch, HandlerRegistry,
    MessageContext, MessageIdAllocator, NetworkClient, PlayerId, WireMessage,
};

use crate::interface::{NetworkInterface, check_outgoing};

/// Capacity of the lifecycle broadcast channel.
const LIFECYCLE_CAPACITY: usize = 64;

type LifecycleHook = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

pub struct GameNetworkClient {
    client: NetworkClient,
    handlers: HandlerRegistry,
    message_ids: MessageIdAllocator,
    hooks: Mutex<Vec<LifecycleHook>>,
    lifecycle: broadcast::Sender<ConnectionEvent>,
}

impl GameNetworkClient {
    /// Spawn the transport and the routing task. Must be called from within
    /// a Tokio runtime.
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let (client, mut events) = NetworkClient::new(config);
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        let this = Arc::new(Self {
            client,
            handlers: HandlerRegistry::new(),
            message_ids: MessageIdAllocator::new(),
            hooks: Mutex::new(Vec::new()),
            lifecycle,
        });

        let weak = Arc::downgrade(&this);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(this) = weak.upgrade() else { break };
                match event {
                    ClientEvent::MessageReceived(message) => {
                        this.handlers
                            .dispatch(&message, &MessageContext::from_server());
                    }
                    ClientEvent::Connection(event) => {
                        tracing::debug!("Connection event: {event:?}");
                        let hooks = this.lock_hooks().clone();
                        for hook in &hooks {
                            hook(&event);
                        }
                        let _ = this.lifecycle.send(event);
                    }
                }
            }
            tracing::debug!("Client routing task finished");
        });

        this
    }

    /// Receive connection lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.lifecycle.subscribe()
    }

    /// Run `hook` on the routing task for every lifecycle event, ordered
    /// with the messages around it. Hooks must not block.
    pub fn on_connection_event<F>(&self, hook: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.lock_hooks().push(Arc::new(hook));
    }

    fn lock_hooks(&self) -> std::sync::MutexGuard<'_, Vec<LifecycleHook>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        self.client.state()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn accepts_connection(&self) -> bool {
        self.client.accepts_connection()
    }

    pub fn connect_to_server(&self, address: &str) {
        tracing::info!("Connecting to {address}");
        self.client.connect_to_server(address);
    }

    pub fn disconnect_from_server(&self) {
        self.client.disconnect_from_server();
    }

    pub fn reconnect_to_server(&self) {
        self.client.reconnect_to_server();
    }

    /// Drop every handler and hook and stop the transport for good.
    pub fn stop(&self) {
        self.handlers.clear();
        self.lock_hooks().clear();
        self.client.shutdown();
    }
}

impl NetworkInterface for GameNetworkClient {
    fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    fn message_ids(&self) -> &MessageIdAllocator {
        &self.message_ids
    }

    fn send(&self, message: WireMessage, receiver: PlayerId) -> bool {
        if !check_outgoing(&message) {
            return false;
        }
        if receiver != PlayerId::SERVER {
            tracing::error!(
                "Clients can only send to the server, dropping {} for {receiver}",
                message.content_type()
            );
            return false;
        }
        match self.client.send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to queue message for the server: {e}");
                false
            }
        }
    }
}
