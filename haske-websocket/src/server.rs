//! Composition root for the messaging core.
//!
//! The HTTP layer performs the upgrade, writes the accept value computed by
//! [`WebSocketServer::accept_key`], and hands the raw stream to
//! [`WebSocketServer::serve`]. From then on the server owns the stream.

use crate::broadcast::Broadcaster;
use crate::config::WebSocketConfig;
use crate::connection::{Connection, ConnectionId, Transport};
use crate::error::WebSocketResult;
use crate::handler::{WebSocketHandler, run_handler_loop};
use crate::handshake;
use crate::registry::ConnectionRegistry;
use crate::session::{SessionId, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tungstenite::protocol::frame::coding::CloseCode;

/// Builder for [`WebSocketServer`].
///
/// Shared components exist as soon as the builder does, so a handler can be
/// constructed with the broadcaster or registry it needs before `build`.
pub struct WebSocketServerBuilder {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    sessions: Arc<SessionManager>,
}

impl WebSocketServerBuilder {
    /// Create a builder with the given configuration.
    pub fn new(config: WebSocketConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone(), &config));
        let sessions = Arc::new(SessionManager::new(
            broadcaster.clone(),
            config.send_timeout(),
        ));
        Self {
            config,
            registry,
            broadcaster,
            sessions,
        }
    }

    /// Connection registry.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Broadcaster.
    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.broadcaster.clone()
    }

    /// Session manager.
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Build the server with the given handler.
    pub fn build<H: WebSocketHandler>(self, handler: H) -> WebSocketServer<H> {
        WebSocketServer {
            config: self.config,
            handler: Arc::new(handler),
            registry: self.registry,
            broadcaster: self.broadcaster,
            sessions: self.sessions,
        }
    }
}

impl Default for WebSocketServerBuilder {
    fn default() -> Self {
        Self::new(WebSocketConfig::default())
    }
}

/// Handle to a connection being served.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection id
    pub id: ConnectionId,
    /// Handler task; resolves to the close code
    pub task: JoinHandle<CloseCode>,
}

/// WebSocket server.
pub struct WebSocketServer<H: WebSocketHandler> {
    config: WebSocketConfig,
    handler: Arc<H>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    sessions: Arc<SessionManager>,
}

impl<H: WebSocketHandler> WebSocketServer<H> {
    /// Create a server with its own registry, broadcaster and session manager.
    pub fn new(config: WebSocketConfig, handler: H) -> Self {
        WebSocketServerBuilder::new(config).build(handler)
    }

    /// Create a builder for the server.
    pub fn builder(config: WebSocketConfig) -> WebSocketServerBuilder {
        WebSocketServerBuilder::new(config)
    }

    /// Accept value for the upgrade response.
    pub fn accept_key(&self, client_key: &str) -> String {
        handshake::accept_key(client_key)
    }

    /// Take ownership of an upgraded stream and serve it on its own task.
    ///
    /// The connection is registered (and bound to `session_id`, if given)
    /// before this returns.
    pub fn serve<S: Transport>(
        &self,
        stream: S,
        session_id: Option<SessionId>,
    ) -> WebSocketResult<ConnectionHandle> {
        let connection = Connection::new(stream, &self.config);
        connection.mark_open()?;
        let id = connection.id().to_string();

        match session_id {
            Some(session_id) => self.sessions.add_session(session_id, connection.clone()),
            None => {
                self.registry.add(connection.clone());
            }
        }

        if let Some(interval) = self.config.heartbeat_interval() {
            tokio::spawn(heartbeat(connection.clone(), interval));
        }

        let handler = self.handler.clone();
        let registry = self.registry.clone();
        let sessions = self.sessions.clone();
        let task = tokio::spawn(async move {
            run_handler_loop(handler.as_ref(), connection, &registry, &sessions).await
        });

        tracing::debug!(connection_id = %id, "Serving connection");
        Ok(ConnectionHandle { id, task })
    }

    /// Configuration.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Handler.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Broadcaster.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}

/// Ping the peer every `interval` until the connection starts closing.
async fn heartbeat(connection: Connection, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = connection.closed() => break,
            _ = ticker.tick() => {
                if let Err(e) = connection.ping(bytes::Bytes::new()).await {
                    tracing::debug!(connection_id = %connection.id(), error = %e, "Heartbeat stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Role;
    use crate::handler::LoggingHandler;
    use crate::message::Message;

    fn config() -> WebSocketConfig {
        WebSocketConfig::builder()
            .heartbeat_interval(None)
            .build()
            .unwrap()
    }

    #[test]
    fn test_accept_key() {
        let server = WebSocketServer::new(config(), LoggingHandler);
        assert_eq!(
            server.accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[tokio::test]
    async fn test_serve_registers_and_cleans_up() {
        let server = WebSocketServer::new(config(), LoggingHandler);
        let (server_end, client_end) = tokio::io::duplex(4096);

        let handle = server.serve(server_end, Some("user-7".into())).unwrap();
        assert!(server.registry().contains(&handle.id));
        assert!(server.sessions().has_session("user-7"));

        let peer = Connection::with_role("peer", client_end, Role::Client, &config());
        peer.mark_open().unwrap();
        assert_eq!(server.broadcaster().broadcast("hi", None).await, 1);
        assert_eq!(peer.receive_message().await.unwrap(), Some(Message::text("hi")));

        peer.close(CloseCode::Away, None).await.unwrap();
        assert_eq!(handle.task.await.unwrap(), CloseCode::Away);
        assert_eq!(server.registry().connection_count(), 0);
        assert_eq!(server.sessions().session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings() {
        let config = WebSocketConfig::builder()
            .heartbeat_interval(Some(Duration::from_secs(1)))
            .build()
            .unwrap();
        let server = WebSocketServer::new(config.clone(), LoggingHandler);
        let (server_end, mut client_end) = tokio::io::duplex(4096);
        let _handle = server.serve(server_end, None).unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let mut header = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut client_end, &mut header)
            .await
            .unwrap();
        assert_eq!(header, [0x89, 0x00]);
    }
}
