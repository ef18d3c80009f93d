//! WebSocket handler trait and the per-connection driver loop.

use crate::connection::Connection;
use crate::error::{WebSocketError, WebSocketResult};
use crate::message::Message;
use crate::registry::ConnectionRegistry;
use crate::session::SessionManager;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tungstenite::protocol::frame::coding::CloseCode;

/// Trait for handling WebSocket events.
///
/// Implement this trait to define custom behavior for WebSocket connections.
/// Handlers that need to broadcast or manage groups hold the `Arc`s handed
/// out by [`WebSocketServerBuilder`](crate::WebSocketServerBuilder).
#[async_trait]
pub trait WebSocketHandler: Send + Sync + 'static {
    /// Called once, before the first message is read.
    async fn on_connect(&self, connection: &Connection) {
        let _ = connection;
    }

    /// Called for every complete message.
    ///
    /// Errors are passed to [`WebSocketHandler::on_error`]; unless fatal, the
    /// connection keeps reading.
    async fn on_message(&self, connection: &Connection, message: Message) -> WebSocketResult<()>;

    /// Called exactly once when the connection ends, with the close code.
    async fn on_disconnect(&self, connection: &Connection, code: CloseCode) {
        let _ = (connection, code);
    }

    /// Called when receiving or handling a message fails.
    async fn on_error(&self, connection: &Connection, error: &WebSocketError) {
        tracing::error!(connection_id = %connection.id(), error = %error, "WebSocket error");
    }
}

/// A handler that only logs events.
#[derive(Debug, Default, Clone)]
pub struct LoggingHandler;

#[async_trait]
impl WebSocketHandler for LoggingHandler {
    async fn on_connect(&self, connection: &Connection) {
        tracing::info!(connection_id = %connection.id(), "Client connected");
    }

    async fn on_message(&self, connection: &Connection, message: Message) -> WebSocketResult<()> {
        tracing::debug!(
            connection_id = %connection.id(),
            kind = message.kind(),
            "Received message"
        );
        Ok(())
    }

    async fn on_disconnect(&self, connection: &Connection, code: CloseCode) {
        tracing::info!(connection_id = %connection.id(), code = u16::from(code), "Client disconnected");
    }
}

/// Drive one connection from connect to disconnect.
///
/// Reads messages until end-of-stream or a fatal error, dispatching each to
/// `handler`. Handler errors and panics are logged and do not end the loop.
/// On exit the transport is released and the connection leaves the registry
/// and any session. Returns the close code passed to `on_disconnect`.
pub async fn run_handler_loop<H>(
    handler: &H,
    connection: Connection,
    registry: &ConnectionRegistry,
    sessions: &SessionManager,
) -> CloseCode
where
    H: WebSocketHandler + ?Sized,
{
    let id = connection.id().to_string();
    tracing::debug!(connection_id = %id, "Handler loop started");

    match AssertUnwindSafe(handler.on_connect(&connection)).catch_unwind().await {
        Ok(()) => read_loop(handler, &connection).await,
        Err(_) => {
            tracing::error!(connection_id = %id, "on_connect panicked");
            let _ = connection.close(CloseCode::Error, None).await;
        }
    }

    connection.release().await;
    registry.remove(&id);
    sessions.remove_connection(&id);

    let code = connection.close_code().unwrap_or(CloseCode::Abnormal);
    if AssertUnwindSafe(handler.on_disconnect(&connection, code))
        .catch_unwind()
        .await
        .is_err()
    {
        tracing::error!(connection_id = %id, "on_disconnect panicked");
    }

    tracing::debug!(connection_id = %id, code = u16::from(code), "Handler loop finished");
    code
}

async fn read_loop<H>(handler: &H, connection: &Connection)
where
    H: WebSocketHandler + ?Sized,
{
    loop {
        let message = match connection.receive_message().await {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                handler.on_error(connection, &e).await;
                if e.is_fatal() {
                    return;
                }
                continue;
            }
        };

        match AssertUnwindSafe(handler.on_message(connection, message))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                handler.on_error(connection, &e).await;
                if e.is_fatal() && !connection.is_open() {
                    return;
                }
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let error = WebSocketError::Handler(detail);
                handler.on_error(connection, &error).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::config::WebSocketConfig;
    use crate::frame::Role;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WebSocketHandler for Recorder {
        async fn on_connect(&self, _connection: &Connection) {
            self.events.lock().push("connect".into());
        }

        async fn on_message(&self, connection: &Connection, message: Message) -> WebSocketResult<()> {
            match message.as_text() {
                Some("panic") => panic!("handler blew up"),
                Some("fail") => return Err(WebSocketError::Handler("bad input".into())),
                _ => {}
            }
            self.events.lock().push(format!("message:{}", message.kind()));
            connection.send_message(&message).await
        }

        async fn on_disconnect(&self, _connection: &Connection, code: CloseCode) {
            self.events.lock().push(format!("disconnect:{}", u16::from(code)));
        }

        async fn on_error(&self, _connection: &Connection, error: &WebSocketError) {
            self.events.lock().push(format!("error:{}", error));
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, SessionManager) {
        let config = WebSocketConfig::default();
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone(), &config));
        (registry, SessionManager::new(broadcaster, config.send_timeout()))
    }

    #[tokio::test]
    async fn test_lifecycle_and_error_isolation() {
        let (registry, sessions) = setup();
        let (server, client) = tokio::io::duplex(4096);
        let conn = Connection::with_id("c1", server, &WebSocketConfig::default());
        conn.mark_open().unwrap();
        sessions.add_session("s1", conn.clone());

        let peer = Connection::with_role("peer", client, Role::Client, &WebSocketConfig::default());
        peer.mark_open().unwrap();

        let handler = Arc::new(Recorder::default());
        let task = {
            let handler = handler.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                run_handler_loop(handler.as_ref(), conn, &registry, &sessions).await
            })
        };

        peer.send_text("panic").await.unwrap();
        peer.send_text("fail").await.unwrap();
        peer.send_json(&serde_json::json!({"n": 1})).await.unwrap();
        let echoed: serde_json::Value = peer.receive_json().await.unwrap().unwrap();
        assert_eq!(echoed["n"], 1);

        peer.close(CloseCode::Normal, None).await.unwrap();
        let code = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, CloseCode::Normal);
        assert!(!registry.contains("c1"));

        let events = handler.events.lock().clone();
        assert_eq!(events.first().map(String::as_str), Some("connect"));
        assert!(events.iter().any(|e| e.contains("handler blew up")));
        assert!(events.iter().any(|e| e.contains("bad input")));
        assert!(events.contains(&"message:structured".to_string()));
        assert_eq!(
            events.iter().filter(|e| e.starts_with("disconnect")).count(),
            1
        );
        assert_eq!(events.last().map(String::as_str), Some("disconnect:1000"));
    }

    #[tokio::test]
    async fn test_abrupt_disconnect_reports_1006() {
        let (registry, sessions) = setup();
        let (server, client) = tokio::io::duplex(1024);
        let conn = Connection::with_id("c2", server, &WebSocketConfig::default());
        conn.mark_open().unwrap();
        registry.add(conn.clone());
        drop(client);

        let handler = Recorder::default();
        let code = run_handler_loop(&handler, conn, &registry, &sessions).await;
        assert_eq!(code, CloseCode::Abnormal);
        assert_eq!(registry.connection_count(), 0);
    }
}
