//! # Haske WebSocket
//!
//! Full-duplex WebSocket messaging core for the Haske framework.
//!
//! ## Features
//!
//! - RFC 6455 frame codec with role-based masking rules
//! - Connection state machine with serialized writes
//! - Connection registry with named groups
//! - Best-effort broadcast that evicts dead peers
//! - Session-to-connection binding for targeted unicast
//! - Per-connection handler loop with panic isolation
//! - Heartbeat pings
//!
//! ## Example
//!
//! ```rust,no_run
//! use haske_websocket::{
//!     CloseCode, Connection, Message, WebSocketConfig, WebSocketHandler, WebSocketResult,
//!     WebSocketServer,
//! };
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct ChatHandler {
//!     broadcaster: Arc<haske_websocket::Broadcaster>,
//! }
//!
//! #[async_trait]
//! impl WebSocketHandler for ChatHandler {
//!     async fn on_message(&self, connection: &Connection, message: Message) -> WebSocketResult<()> {
//!         self.broadcaster.broadcast_except(message, None, connection.id()).await;
//!         Ok(())
//!     }
//!
//!     async fn on_disconnect(&self, connection: &Connection, code: CloseCode) {
//!         println!("{} left with {}", connection.id(), u16::from(code));
//!     }
//! }
//!
//! let builder = WebSocketServer::<ChatHandler>::builder(WebSocketConfig::default());
//! let handler = ChatHandler { broadcaster: builder.broadcaster() };
//! let server = builder.build(handler);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod frame;
pub mod handshake;
pub mod logging;

mod broadcast;
mod connection;
mod error;
mod handler;
mod message;
mod registry;
mod server;
mod session;

pub use broadcast::Broadcaster;
pub use config::{WebSocketConfig, WebSocketConfigBuilder};
pub use connection::{Connection, ConnectionId, ConnectionState, Transport};
pub use error::{ProtocolError, WebSocketError, WebSocketResult};
pub use frame::{Frame, FrameCodec, OpCode, Rfc6455Codec, Role};
pub use handler::{LoggingHandler, WebSocketHandler, run_handler_loop};
pub use message::Message;
pub use registry::{ConnectionRegistry, GroupName};
pub use server::{ConnectionHandle, WebSocketServer, WebSocketServerBuilder};
pub use session::{SessionId, SessionManager};

// Re-export the close code type from tungstenite
pub use tungstenite::protocol::frame::coding::CloseCode;
