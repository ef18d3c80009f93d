// Haske - realtime messaging for the Haske web framework
//
// This library exposes the full-duplex WebSocket core: frame codec,
// connections, groups, broadcast and session-targeted delivery.

// Re-export the messaging core
pub use haske_websocket as websocket;

pub use haske_websocket::{
    Broadcaster, CloseCode, Connection, ConnectionHandle, ConnectionId, ConnectionRegistry,
    ConnectionState, Frame, LoggingHandler, Message, OpCode, ProtocolError, SessionId,
    SessionManager, WebSocketConfig, WebSocketError, WebSocketHandler, WebSocketResult,
    WebSocketServer, WebSocketServerBuilder,
};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Broadcaster,
        CloseCode,
        Connection,
        ConnectionRegistry,
        Message,
        SessionManager,
        WebSocketConfig,
        WebSocketError,
        WebSocketHandler,
        WebSocketResult,
        WebSocketServer,
    };
    pub use crate::websocket::handshake::accept_key;
    pub use crate::websocket::logging::{LogConfig, LogFormat, LogLevel};

    // Re-export async_trait for handler implementations
    pub use async_trait::async_trait;
}
