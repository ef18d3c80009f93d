//! Opening handshake helpers.
//!
//! Upgrade negotiation belongs to the router. This module derives the
//! `Sec-WebSocket-Accept` value and offers checks the router can run on the
//! request headers before handing the raw stream over.

use crate::error::{WebSocketError, WebSocketResult};
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderMap, Response, StatusCode};

/// Magic GUID appended to the client key before hashing (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version this implementation speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// Compute `base64(sha1(client_key + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    tungstenite::handshake::derive_accept_key(client_key.as_bytes())
}

fn header_has_token(headers: &HeaderMap, name: http::header::HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

/// Whether the headers ask for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    header_has_token(headers, CONNECTION, "upgrade") && header_has_token(headers, UPGRADE, "websocket")
}

/// Validate an upgrade request and return its `Sec-WebSocket-Key`.
pub fn validate_upgrade_request(headers: &HeaderMap) -> WebSocketResult<&str> {
    if !is_upgrade_request(headers) {
        return Err(WebSocketError::Handshake("not a websocket upgrade request".to_string()));
    }

    let version = headers
        .get(SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebSocketError::Handshake("missing Sec-WebSocket-Version".to_string()))?;
    if version.trim() != WEBSOCKET_VERSION {
        return Err(WebSocketError::Handshake(format!(
            "unsupported Sec-WebSocket-Version: {}",
            version
        )));
    }

    let key = headers
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| WebSocketError::Handshake("missing Sec-WebSocket-Key".to_string()))?;

    Ok(key)
}

/// Build the `101 Switching Protocols` response for `client_key`.
pub fn upgrade_response(client_key: &str) -> WebSocketResult<Response<()>> {
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "Upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, accept_key(client_key))
        .body(())
        .map_err(|e| WebSocketError::Handshake(e.to_string()))
}
