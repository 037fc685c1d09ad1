//! TCP networking for the UIST game: the wire envelope and framing, the
//! message catalogue, handler dispatch, and the client and server endpoints.

pub mod messages;
pub mod reconnection;
pub mod routing;
pub mod session;
pub mod tcp_client;
pub mod tcp_server;
pub mod wire;

pub use messages::{
    ContentType, GameObstacleData, GameUnitData, HighlightRequestData, MessageId,
    MessageIdAllocator, MoveRequestData, NewPlayerIdData, Payload, PlayerId, UpdateFrequency,
};
pub use reconnection::{ReconnectConfig, ReconnectState};
pub use routing::{HandlerId, HandlerRegistry, MessageContext, MessageHandler};
pub use session::NetworkServerSession;
pub use tcp_client::{
    ClientConfig, ClientEvent, ConnectionEvent, ConnectionState, ConnectionStateWatch,
    NetworkClient, SendError, with_default_port,
};
pub use tcp_server::{
    ConnectionLimitReached, DEFAULT_PORT, IdGenerator, NetworkServer, ServerConfig, ServerEvent,
    SessionId, SessionMap,
};
pub use wire::{
    HEADER_LEN, MAX_MESSAGE_LENGTH, MessageHeader, WireError, WireMessage, read_message,
    write_message,
};
