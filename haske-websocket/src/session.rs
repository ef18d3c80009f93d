//! Session management
//!
//! Binds an opaque session identifier, supplied by whatever authenticated the
//! upgrade, to exactly one live connection.

use crate::broadcast::Broadcaster;
use crate::connection::Connection;
use crate::message::Message;
use crate::registry::ConnectionRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tungstenite::protocol::frame::coding::CloseCode;

/// External session identifier.
pub type SessionId = String;

/// Maps session ids to connections.
pub struct SessionManager {
    /// Session to connection binding
    sessions: DashMap<SessionId, Connection>,
    /// Registry every session connection is registered with
    registry: Arc<ConnectionRegistry>,
    /// Fan-out for `broadcast_to_all`
    broadcaster: Arc<Broadcaster>,
    /// Deadline for unicast sends
    send_timeout: Duration,
}

impl SessionManager {
    /// Create a session manager sharing the server's registry and broadcaster.
    pub fn new(broadcaster: Arc<Broadcaster>, send_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            registry: broadcaster.registry().clone(),
            broadcaster,
            send_timeout,
        }
    }

    /// Bind `session_id` to `connection` and register the connection.
    ///
    /// A session that was already bound now points at the new connection.
    pub fn add_session(&self, session_id: impl Into<SessionId>, connection: Connection) {
        let session_id = session_id.into();
        self.registry.add(connection.clone());
        let connection_id = connection.id().to_string();
        if let Some(previous) = self.sessions.insert(session_id.clone(), connection) {
            if previous.id() != connection_id {
                tracing::info!(
                    session_id = %session_id,
                    old_connection = %previous.id(),
                    new_connection = %connection_id,
                    "Session rebound"
                );
            }
        }
        tracing::debug!(session_id = %session_id, connection_id = %connection_id, "Session added");
    }

    /// Unbind a session and unregister its connection.
    pub fn remove_session(&self, session_id: &str) -> Option<Connection> {
        let (_, connection) = self.sessions.remove(session_id)?;
        self.registry.remove(connection.id());
        tracing::debug!(session_id = %session_id, connection_id = %connection.id(), "Session removed");
        Some(connection)
    }

    /// Drop any session bound to `connection_id`.
    pub fn remove_connection(&self, connection_id: &str) {
        self.sessions.retain(|_, conn| conn.id() != connection_id);
    }

    /// Send to one session. Returns false if the session is unknown or the
    /// send failed. A session whose peer is gone is evicted; a message the
    /// connection refuses to frame leaves the session bound.
    pub async fn send_to_session(&self, session_id: &str, message: impl Into<Message>) -> bool {
        // Clone out of the map so no shard lock is held across the await.
        let Some(connection) = self.sessions.get(session_id).map(|c| c.clone()) else {
            return false;
        };

        let message = message.into();
        let result = match tokio::time::timeout(self.send_timeout, connection.send_message(&message)).await {
            Ok(result) => result,
            Err(_) => Err(crate::error::WebSocketError::Timeout),
        };

        match result {
            Ok(()) => true,
            Err(e) if !e.is_peer_failure() => {
                tracing::warn!(session_id = %session_id, error = %e, "Session send rejected");
                false
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Evicting session after failed send");
                // Only evict if the session was not rebound in the meantime.
                if self
                    .sessions
                    .remove_if(session_id, |_, c| c.id() == connection.id())
                    .is_some()
                {
                    self.registry.remove(connection.id());
                }
                connection.abort(CloseCode::Abnormal);
                false
            }
        }
    }

    /// Broadcast to every registered connection.
    pub async fn broadcast_to_all(&self, message: impl Into<Message>) -> usize {
        self.broadcaster.broadcast(message, None).await
    }

    /// Connection bound to a session.
    pub fn connection_for(&self, session_id: &str) -> Option<Connection> {
        self.sessions.get(session_id).map(|c| c.clone())
    }

    /// Session bound to a connection, if any.
    pub fn session_of(&self, connection_id: &str) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|entry| entry.value().id() == connection_id)
            .map(|entry| entry.key().clone())
    }

    /// Whether a session is bound.
    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Number of bound sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// All bound session ids.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebSocketConfig;
    use crate::frame::Role;
    use tokio::io::DuplexStream;

    fn setup() -> (Arc<ConnectionRegistry>, SessionManager) {
        let config = WebSocketConfig::builder()
            .send_timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone(), &config));
        (registry, SessionManager::new(broadcaster, config.send_timeout()))
    }

    fn open(id: &str) -> (Connection, DuplexStream) {
        let (server, client) = tokio::io::duplex(4096);
        let conn = Connection::with_id(id, server, &WebSocketConfig::default());
        conn.mark_open().unwrap();
        (conn, client)
    }

    fn peer(stream: DuplexStream) -> Connection {
        let conn = Connection::with_role("peer", stream, Role::Client, &WebSocketConfig::default());
        conn.mark_open().unwrap();
        conn
    }

    #[tokio::test]
    async fn test_add_registers_connection() {
        let (registry, sessions) = setup();
        let (conn, _client) = open("c1");
        sessions.add_session("user-1", conn);

        assert!(registry.contains("c1"));
        assert!(sessions.has_session("user-1"));
        assert_eq!(sessions.session_of("c1").as_deref(), Some("user-1"));
        assert_eq!(sessions.session_count(), 1);

        assert!(sessions.remove_session("user-1").is_some());
        assert!(!registry.contains("c1"));
        assert!(sessions.remove_session("user-1").is_none());
    }

    #[tokio::test]
    async fn test_send_to_session() {
        let (_registry, sessions) = setup();
        let (conn, client) = open("c1");
        sessions.add_session("user-1", conn);

        assert!(sessions.send_to_session("user-1", "direct").await);
        assert!(!sessions.send_to_session("nobody", "direct").await);

        let peer = peer(client);
        assert_eq!(peer.receive_text().await.unwrap(), Some("direct".to_string()));
    }

    #[tokio::test]
    async fn test_failed_send_evicts_session() {
        let (registry, sessions) = setup();
        let (conn, client) = open("c1");
        drop(client);
        sessions.add_session("user-1", conn);

        assert!(!sessions.send_to_session("user-1", "lost").await);
        assert!(!sessions.has_session("user-1"));
        assert!(!registry.contains("c1"));
    }

    #[tokio::test]
    async fn test_oversized_send_keeps_session() {
        let (registry, sessions) = setup();
        let config = WebSocketConfig::builder().max_frame_size(64).build().unwrap();
        let (server, client) = tokio::io::duplex(4096);
        let conn = Connection::with_id("c1", server, &config);
        conn.mark_open().unwrap();
        sessions.add_session("user-1", conn.clone());

        assert!(!sessions.send_to_session("user-1", "x".repeat(128)).await);
        assert!(sessions.has_session("user-1"));
        assert!(registry.contains("c1"));
        assert!(conn.is_open());

        assert!(sessions.send_to_session("user-1", "fits").await);
        let peer = peer(client);
        assert_eq!(peer.receive_text().await.unwrap(), Some("fits".to_string()));
    }

    #[tokio::test]
    async fn test_rebinding_and_broadcast() {
        let (registry, sessions) = setup();
        let (first, _first_client) = open("c1");
        let (second, _second_client) = open("c2");
        sessions.add_session("user-1", first);
        sessions.add_session("user-1", second);

        assert_eq!(sessions.connection_for("user-1").unwrap().id(), "c2");
        assert_eq!(registry.connection_count(), 2);
        assert_eq!(sessions.broadcast_to_all("all").await, 2);

        sessions.remove_connection("c2");
        assert!(sessions.session_ids().is_empty());
    }
}
