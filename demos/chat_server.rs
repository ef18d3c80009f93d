//! Chat room demo.
//!
//! Accepts WebSocket upgrades on a bare TCP listener, joins every client to a
//! shared room and relays each message to everyone else in it. A client can
//! pass `?user=<name>` on the request line to bind a session.
//!
//! Run with:
//!   cargo run --example chat_server
//!
//! then connect with any WebSocket client to ws://127.0.0.1:9001/.

use haske::prelude::*;
use haske::websocket::handshake;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const ROOM: &str = "lobby";
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Room notices sent by the server itself.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum RoomEvent<'a> {
    Welcome { id: &'a str, online: usize },
    Left { id: &'a str },
}

struct ChatHandler {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
}

#[async_trait]
impl WebSocketHandler for ChatHandler {
    async fn on_connect(&self, connection: &Connection) {
        self.registry.join_group(connection.id(), ROOM);
        let _ = connection
            .send_json(&RoomEvent::Welcome {
                id: connection.id(),
                online: self.registry.group_size(ROOM),
            })
            .await;
    }

    async fn on_message(&self, connection: &Connection, message: Message) -> WebSocketResult<()> {
        let relayed = self
            .broadcaster
            .broadcast_except(message, Some(ROOM), connection.id())
            .await;
        tracing::debug!(connection_id = %connection.id(), relayed, "Relayed chat message");
        Ok(())
    }

    async fn on_disconnect(&self, connection: &Connection, code: CloseCode) {
        tracing::info!(connection_id = %connection.id(), code = u16::from(code), "Left the room");
        self.broadcaster
            .broadcast_json(&RoomEvent::Left { id: connection.id() }, Some(ROOM))
            .await
            .ok();
    }
}

struct Upgrade {
    key: String,
    user: Option<String>,
}

async fn read_upgrade(stream: &mut TcpStream) -> WebSocketResult<Upgrade> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(WebSocketError::Handshake("connection closed during upgrade".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(WebSocketError::Handshake("request head too large".into()));
        }
    }

    let mut raw_headers = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut raw_headers);
    request
        .parse(&buf)
        .map_err(|e| WebSocketError::Handshake(e.to_string()))?;

    let mut headers = HeaderMap::new();
    for header in request.headers.iter() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(header.name.as_bytes()),
            HeaderValue::from_bytes(header.value),
        ) {
            headers.append(name, value);
        }
    }

    let key = handshake::validate_upgrade_request(&headers)?.to_string();
    let user = request
        .path
        .and_then(|path| path.split_once("user="))
        .map(|(_, rest)| rest.split('&').next().unwrap_or_default().to_string())
        .filter(|user| !user.is_empty());

    Ok(Upgrade { key, user })
}

async fn accept(server: Arc<WebSocketServer<ChatHandler>>, mut stream: TcpStream) -> WebSocketResult<()> {
    let upgrade = match read_upgrade(&mut stream).await {
        Ok(upgrade) => upgrade,
        Err(e) => {
            stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await?;
            return Err(e);
        }
    };

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        server.accept_key(&upgrade.key)
    );
    stream.write_all(response.as_bytes()).await?;

    let handle = server.serve(stream, upgrade.user)?;
    tracing::info!(connection_id = %handle.id, "Client joined");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = LogConfig::new()
        .level(LogLevel::Info)
        .format(LogFormat::Compact)
        .init()?;

    let config = WebSocketConfig::from_env()?;
    let builder = WebSocketServer::<ChatHandler>::builder(config);
    let handler = ChatHandler {
        registry: builder.registry(),
        broadcaster: builder.broadcaster(),
    };
    let server = Arc::new(builder.build(handler));

    let listener = TcpListener::bind("127.0.0.1:9001").await?;
    tracing::info!(addr = %listener.local_addr()?, "Chat server listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = accept(server, stream).await {
                tracing::warn!(addr = %addr, error = %e, "Upgrade failed");
            }
        });
    }
}
