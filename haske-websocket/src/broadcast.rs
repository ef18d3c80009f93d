//! Best-effort fan-out to groups or to every connection.

use crate::config::WebSocketConfig;
use crate::connection::Connection;
use crate::error::{WebSocketError, WebSocketResult};
use crate::frame::Frame;
use crate::message::Message;
use crate::registry::ConnectionRegistry;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tungstenite::protocol::frame::coding::CloseCode;

/// Delivers one message to many connections.
///
/// Targets are snapshotted from the registry when a broadcast starts. Sends
/// run concurrently, each under its own deadline. A connection whose peer
/// turns out to be gone is removed from the registry and aborted; delivery to
/// the others continues. A message too large to frame is rejected before any
/// send.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
    concurrency: usize,
    max_frame_size: usize,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, config: &WebSocketConfig) -> Self {
        Self {
            registry,
            send_timeout: config.send_timeout(),
            concurrency: config.broadcast_concurrency.max(1),
            max_frame_size: config.max_frame_size,
        }
    }

    /// Registry this broadcaster reads targets from.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send to every member of `group`, or to all connections when `None`.
    ///
    /// Returns the number of successful deliveries. A missing group yields 0.
    pub async fn broadcast(&self, message: impl Into<Message>, group: Option<&str>) -> usize {
        self.deliver(message.into(), group, None).await
    }

    /// Like [`Broadcaster::broadcast`], skipping the connection `except`.
    pub async fn broadcast_except(
        &self,
        message: impl Into<Message>,
        group: Option<&str>,
        except: &str,
    ) -> usize {
        self.deliver(message.into(), group, Some(except)).await
    }

    /// Serialize `value` as JSON text and broadcast it.
    pub async fn broadcast_json<T: Serialize>(
        &self,
        value: &T,
        group: Option<&str>,
    ) -> WebSocketResult<usize> {
        let message = Message::json(value)?;
        Ok(self.deliver(message, group, None).await)
    }

    async fn deliver(&self, message: Message, group: Option<&str>, except: Option<&str>) -> usize {
        let frame = message.to_frame();
        let size = frame.payload().len();
        if size > self.max_frame_size {
            tracing::error!(
                group = group.unwrap_or("*"),
                size,
                max = self.max_frame_size,
                "Broadcast message exceeds the frame size limit"
            );
            return 0;
        }

        let targets: Vec<Connection> = self
            .registry
            .snapshot(group)
            .into_iter()
            .filter(|conn| except != Some(conn.id()))
            .collect();
        if targets.is_empty() {
            return 0;
        }
        let attempted = targets.len();

        let delivered = stream::iter(targets)
            .map(|conn| {
                let frame = frame.clone();
                async move {
                    let result = send_with_deadline(&conn, frame, self.send_timeout).await;
                    (conn, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .fold(0usize, |delivered, (conn, result)| async move {
                match result {
                    Ok(()) => delivered + 1,
                    Err(e) if e.is_peer_failure() => {
                        self.evict(&conn, &e);
                        delivered
                    }
                    Err(e) => {
                        tracing::warn!(connection_id = %conn.id(), error = %e, "Broadcast send rejected");
                        delivered
                    }
                }
            })
            .await;

        tracing::debug!(
            group = group.unwrap_or("*"),
            kind = message.kind(),
            attempted,
            delivered,
            "Broadcast complete"
        );
        delivered
    }

    fn evict(&self, conn: &Connection, error: &WebSocketError) {
        tracing::warn!(connection_id = %conn.id(), error = %error, "Evicting connection after failed send");
        self.registry.remove(conn.id());
        let code = match error {
            WebSocketError::Timeout => CloseCode::Away,
            _ => CloseCode::Abnormal,
        };
        conn.abort(code);
    }
}

async fn send_with_deadline(conn: &Connection, frame: Frame, deadline: Duration) -> WebSocketResult<()> {
    match tokio::time::timeout(deadline, conn.send_frame(frame)).await {
        Ok(result) => result,
        Err(_) => Err(WebSocketError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::frame::Role;
    use tokio::io::DuplexStream;

    fn config() -> WebSocketConfig {
        WebSocketConfig::builder()
            .send_timeout(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    fn open(id: &str, buffer: usize) -> (Connection, DuplexStream) {
        let (server, client) = tokio::io::duplex(buffer);
        let conn = Connection::with_id(id, server, &config());
        conn.mark_open().unwrap();
        (conn, client)
    }

    fn peer(stream: DuplexStream) -> Connection {
        let conn = Connection::with_role("peer", stream, Role::Client, &config());
        conn.mark_open().unwrap();
        conn
    }

    #[tokio::test]
    async fn test_broadcast_to_all() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), &config());

        let mut peers = Vec::new();
        for i in 0..3 {
            let (conn, client) = open(&format!("c{}", i), 4096);
            registry.add(conn);
            peers.push(peer(client));
        }

        assert_eq!(broadcaster.broadcast("hello", None).await, 3);
        for p in &peers {
            assert_eq!(p.receive_text().await.unwrap(), Some("hello".to_string()));
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_missing_group_is_zero() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), &config());
        let (conn, _client) = open("a", 4096);
        registry.add(conn);

        assert_eq!(broadcaster.broadcast("x", Some("nobody")).await, 0);
    }

    #[tokio::test]
    async fn test_dead_member_is_evicted() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), &config());

        let (alive, alive_client) = open("alive", 4096);
        let (dead, dead_client) = open("dead", 4096);
        drop(dead_client);
        registry.add(alive);
        registry.add(dead.clone());
        registry.join_group("alive", "room");
        registry.join_group("dead", "room");

        let delivered = broadcaster
            .broadcast(Message::binary(vec![1u8, 2, 3]), Some("room"))
            .await;
        assert_eq!(delivered, 1);
        assert!(!registry.contains("dead"));
        assert_eq!(registry.members("room"), vec!["alive".to_string()]);
        assert_eq!(dead.state(), ConnectionState::Closed);

        let alive_peer = peer(alive_client);
        assert_eq!(
            alive_peer.receive_bytes().await.unwrap().as_deref(),
            Some(&[1u8, 2, 3][..])
        );
    }

    #[tokio::test]
    async fn test_stalled_member_times_out() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), &config());

        // Nobody reads this pipe, so a large frame cannot be written.
        let (stalled, _stalled_client) = open("stalled", 16);
        let (fast, _fast_client) = open("fast", 1 << 20);
        registry.add(stalled);
        registry.add(fast);

        let delivered = broadcaster.broadcast("y".repeat(4096), None).await;
        assert_eq!(delivered, 1);
        assert!(!registry.contains("stalled"));
        assert!(registry.contains("fast"));
    }

    #[tokio::test]
    async fn test_oversized_broadcast_keeps_members() {
        let config = WebSocketConfig::builder()
            .send_timeout(Duration::from_millis(200))
            .max_frame_size(1024)
            .build()
            .unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), &config);

        let mut peers = Vec::new();
        for i in 0..3 {
            let (server, client) = tokio::io::duplex(8192);
            let conn = Connection::with_id(format!("c{}", i), server, &config);
            conn.mark_open().unwrap();
            registry.add(conn);
            peers.push(peer(client));
        }

        assert_eq!(broadcaster.broadcast("x".repeat(2048), None).await, 0);
        assert_eq!(registry.connection_count(), 3);
        for conn in registry.snapshot(None) {
            assert!(conn.is_open());
        }

        assert_eq!(broadcaster.broadcast("small", None).await, 3);
        for p in &peers {
            assert_eq!(p.receive_text().await.unwrap(), Some("small".to_string()));
        }
    }

    #[tokio::test]
    async fn test_broadcast_except_and_json() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), &config());
        let (a, a_client) = open("a", 4096);
        let (b, b_client) = open("b", 4096);
        registry.add(a);
        registry.add(b);

        assert_eq!(broadcaster.broadcast_except("hi", None, "a").await, 1);
        let b_peer = peer(b_client);
        assert_eq!(b_peer.receive_text().await.unwrap(), Some("hi".to_string()));

        let sent = broadcaster
            .broadcast_json(&serde_json::json!({"event": "tick"}), None)
            .await
            .unwrap();
        assert_eq!(sent, 2);
        let a_peer = peer(a_client);
        let value: serde_json::Value = a_peer.receive_json().await.unwrap().unwrap();
        assert_eq!(value["event"], "tick");
    }
}
