//! WebSocket connection management.
//!
//! A [`Connection`] owns one duplex transport and walks the state machine
//!
//! ```text
//! Connecting --mark_open--> Open --close sent/received--> Closing --release--> Closed
//!                            |                                                   ^
//!                            +------------- transport failure -------------------+
//! ```
//!
//! Handles are cheap to clone; every clone refers to the same transport.
//! Writes are serialized per connection behind an async mutex, so frames from
//! concurrent senders never interleave on the wire.

use crate::config::WebSocketConfig;
use crate::error::{ProtocolError, WebSocketError, WebSocketResult};
use crate::frame::{Frame, MaskPolicy, OpCode, Rfc6455Codec, Role};
use crate::message::Message;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tungstenite::protocol::frame::coding::CloseCode;

/// Unique identifier for a connection.
pub type ConnectionId = String;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake not yet acknowledged
    Connecting,
    /// Connection is open and ready
    Open,
    /// Close frame sent or received
    Closing,
    /// Transport released
    Closed,
}

/// Any duplex byte stream a connection can own.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Reader {
    frames: FramedRead<BoxedReader, Rfc6455Codec>,
    // Opcode and bytes of a fragmented message still being assembled
    partial: Option<(OpCode, BytesMut)>,
}

struct Inner {
    id: ConnectionId,
    state: RwLock<ConnectionState>,
    close_sent: AtomicBool,
    close_code: Mutex<Option<CloseCode>>,
    reader: tokio::sync::Mutex<Reader>,
    writer: tokio::sync::Mutex<Option<FramedWrite<BoxedWriter, Rfc6455Codec>>>,
    cancel: CancellationToken,
    send_timeout: Duration,
    max_message_size: usize,
}

/// A WebSocket connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wrap a server-side transport with a fresh random id.
    pub fn new<S: Transport>(stream: S, config: &WebSocketConfig) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), stream, config)
    }

    /// Wrap a server-side transport with a caller-chosen id.
    pub fn with_id<S: Transport>(
        id: impl Into<ConnectionId>,
        stream: S,
        config: &WebSocketConfig,
    ) -> Self {
        Self::with_role(id, stream, Role::Server, config)
    }

    /// Wrap a transport for either side of the protocol.
    pub fn with_role<S: Transport>(
        id: impl Into<ConnectionId>,
        stream: S,
        role: Role,
        config: &WebSocketConfig,
    ) -> Self {
        let mut codec = Rfc6455Codec::new(role).max_payload_size(config.max_frame_size);
        if role == Role::Server && !config.require_masked_frames {
            codec = codec.inbound_masking(MaskPolicy::Optional);
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(read_half);
        let writer: BoxedWriter = Box::new(write_half);

        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                state: RwLock::new(ConnectionState::Connecting),
                close_sent: AtomicBool::new(false),
                close_code: Mutex::new(None),
                reader: tokio::sync::Mutex::new(Reader {
                    frames: FramedRead::new(reader, codec.clone()),
                    partial: None,
                }),
                writer: tokio::sync::Mutex::new(Some(FramedWrite::new(writer, codec))),
                cancel: CancellationToken::new(),
                send_timeout: config.send_timeout(),
                max_message_size: config.max_message_size,
            }),
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Get the connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Check if the connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Status code that ended (or is ending) the connection.
    pub fn close_code(&self) -> Option<CloseCode> {
        *self.inner.close_code.lock()
    }

    /// Resolves once the connection starts closing, locally or remotely.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Record that the handshake acknowledgement was sent.
    pub fn mark_open(&self) -> WebSocketResult<()> {
        let mut state = self.inner.state.write();
        match *state {
            ConnectionState::Connecting => {
                *state = ConnectionState::Open;
                tracing::debug!(connection_id = %self.inner.id, "Connection open");
                Ok(())
            }
            ConnectionState::Open => Ok(()),
            _ => Err(WebSocketError::ConnectionClosed),
        }
    }

    fn transition(&self, to: ConnectionState) -> ConnectionState {
        let mut state = self.inner.state.write();
        let from = *state;
        if from != ConnectionState::Closed && from != to {
            *state = to;
            tracing::trace!(connection_id = %self.inner.id, ?from, ?to, "State transition");
        }
        from
    }

    fn record_close_code(&self, code: CloseCode) {
        self.inner.close_code.lock().get_or_insert(code);
    }

    fn ensure_open(&self) -> WebSocketResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(WebSocketError::ConnectionClosed)
        }
    }

    /// Abrupt failure: jump straight to Closed and wake any pending receive.
    pub(crate) fn abort(&self, code: CloseCode) {
        self.record_close_code(code);
        let from = self.transition(ConnectionState::Closed);
        self.inner.cancel.cancel();
        if from != ConnectionState::Closed {
            tracing::debug!(connection_id = %self.inner.id, code = u16::from(code), "Connection aborted");
        }
    }

    async fn write(&self, frame: Frame) -> WebSocketResult<()> {
        let mut guard = self.inner.writer.lock().await;
        let sink = guard.as_mut().ok_or(WebSocketError::ConnectionClosed)?;

        match tokio::time::timeout(self.inner.send_timeout, sink.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(WebSocketError::Protocol(e))) => Err(e.into()),
            Ok(Err(e)) => {
                drop(guard);
                tracing::debug!(connection_id = %self.inner.id, error = %e, "Write failed");
                self.abort(CloseCode::Abnormal);
                Err(e)
            }
            Err(_) => {
                // A cancelled write may have left half a frame on the wire.
                drop(guard);
                self.abort(CloseCode::Away);
                Err(WebSocketError::Timeout)
            }
        }
    }

    /// Send a frame. Close frames go through [`Connection::close`].
    pub async fn send_frame(&self, frame: Frame) -> WebSocketResult<()> {
        if frame.opcode() == OpCode::Close {
            let code = frame.close_code().unwrap_or(CloseCode::Normal);
            return self.close(code, frame.close_reason()).await;
        }
        self.ensure_open()?;
        self.write(frame).await
    }

    /// Send an application message.
    pub async fn send_message(&self, message: &Message) -> WebSocketResult<()> {
        self.ensure_open()?;
        self.write(message.to_frame()).await
    }

    /// Send a text message.
    pub async fn send_text<S: Into<String>>(&self, text: S) -> WebSocketResult<()> {
        self.send_frame(Frame::text(text)).await
    }

    /// Send a binary message.
    pub async fn send_bytes<B: Into<Bytes>>(&self, data: B) -> WebSocketResult<()> {
        self.send_frame(Frame::binary(data)).await
    }

    /// Send a value serialized as JSON text.
    pub async fn send_json<T: Serialize>(&self, value: &T) -> WebSocketResult<()> {
        let text = serde_json::to_string(value)?;
        self.send_frame(Frame::text(text)).await
    }

    /// Send a ping.
    pub async fn ping<B: Into<Bytes>>(&self, data: B) -> WebSocketResult<()> {
        self.send_frame(Frame::ping(data)).await
    }

    /// Send an unsolicited pong.
    pub async fn pong<B: Into<Bytes>>(&self, data: B) -> WebSocketResult<()> {
        self.send_frame(Frame::pong(data)).await
    }

    /// Send a close frame and move to Closing. Repeated calls are no-ops.
    ///
    /// Codes that must not appear on the wire (1005, 1006, 1015) are recorded
    /// locally and sent as an empty Close. Any receive in flight on this
    /// connection returns end-of-stream.
    pub async fn close(&self, code: CloseCode, reason: Option<&str>) -> WebSocketResult<()> {
        if self.inner.close_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self.transition(ConnectionState::Closing) {
            ConnectionState::Open => {}
            ConnectionState::Connecting => {
                self.abort(code);
                return Ok(());
            }
            _ => return Ok(()),
        }

        self.record_close_code(code);
        tracing::debug!(connection_id = %self.inner.id, code = u16::from(code), "Sending close");
        let frame = if code.is_allowed() {
            Frame::close(Some(code), reason)
        } else {
            Frame::close(None, None)
        };
        let result = self.write(frame).await;
        self.inner.cancel.cancel();
        result
    }

    /// Flush and shut down the transport, then mark the connection Closed.
    pub async fn release(&self) {
        self.inner.cancel.cancel();
        let sink = self.inner.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = tokio::time::timeout(self.inner.send_timeout, sink.close()).await;
        }
        self.record_close_code(CloseCode::Abnormal);
        self.transition(ConnectionState::Closed);
    }

    /// Receive the next data frame.
    ///
    /// Pings are answered and pongs swallowed. A close frame moves the
    /// connection to Closing and yields `Ok(None)`, as does a local close or
    /// the transport ending.
    pub async fn receive_frame(&self) -> WebSocketResult<Option<Frame>> {
        let mut reader = self.inner.reader.lock().await;
        self.next_data_frame(&mut reader).await
    }

    async fn next_data_frame(&self, reader: &mut Reader) -> WebSocketResult<Option<Frame>> {
        loop {
            if !self.is_open() {
                return Ok(None);
            }

            let next = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return Ok(None),
                next = reader.frames.next() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(WebSocketError::Protocol(e))) => {
                    tracing::warn!(connection_id = %self.inner.id, error = %e, "Protocol violation");
                    let _ = self.close(e.close_code(), Some(&e.to_string())).await;
                    return Err(e.into());
                }
                Some(Err(e)) => {
                    self.abort(CloseCode::Abnormal);
                    return Err(e);
                }
                None => {
                    tracing::debug!(connection_id = %self.inner.id, "Transport ended without close");
                    self.abort(CloseCode::Abnormal);
                    return Ok(None);
                }
            };

            match frame.opcode() {
                OpCode::Ping => {
                    tracing::trace!(connection_id = %self.inner.id, "Answering ping");
                    self.write(Frame::pong(frame.into_payload())).await?;
                }
                OpCode::Pong => {
                    tracing::trace!(connection_id = %self.inner.id, "Pong received");
                }
                OpCode::Close => {
                    self.handle_remote_close(&frame).await;
                    return Ok(None);
                }
                _ => return Ok(Some(frame)),
            }
        }
    }

    async fn handle_remote_close(&self, frame: &Frame) {
        let code = frame.close_code().unwrap_or(CloseCode::Status);
        tracing::debug!(
            connection_id = %self.inner.id,
            code = u16::from(code),
            reason = frame.close_reason().unwrap_or(""),
            "Close received"
        );
        self.record_close_code(code);
        self.transition(ConnectionState::Closing);

        if !self.inner.close_sent.swap(true, Ordering::SeqCst) {
            // 1005, 1006 and 1015 must never appear on the wire.
            let reply = if code.is_allowed() {
                Frame::close(Some(code), None)
            } else {
                Frame::close(None, None)
            };
            let _ = self.write(reply).await;
        }
        self.inner.cancel.cancel();
    }

    /// Receive the next complete message, reassembling fragments.
    ///
    /// Text that is not valid UTF-8 is dropped and reading continues.
    pub async fn receive_message(&self) -> WebSocketResult<Option<Message>> {
        let mut reader = self.inner.reader.lock().await;
        loop {
            let Some(frame) = self.next_data_frame(&mut reader).await? else {
                return Ok(None);
            };

            let assembled = match self.assemble(&mut reader, frame) {
                Ok(assembled) => assembled,
                Err(e) => {
                    tracing::warn!(connection_id = %self.inner.id, error = %e, "Message assembly failed");
                    let _ = self.close(e.close_code(), Some(&e.to_string())).await;
                    return Err(e.into());
                }
            };

            match assembled {
                Some((OpCode::Text, payload)) => match String::from_utf8(payload.to_vec()) {
                    Ok(text) => return Ok(Some(Message::from_text_payload(text))),
                    Err(_) => {
                        tracing::warn!(
                            connection_id = %self.inner.id,
                            len = payload.len(),
                            "Dropping text message with invalid UTF-8"
                        );
                    }
                },
                Some((_, payload)) => return Ok(Some(Message::Binary(payload))),
                None => {}
            }
        }
    }

    fn assemble(
        &self,
        reader: &mut Reader,
        frame: Frame,
    ) -> Result<Option<(OpCode, Bytes)>, ProtocolError> {
        let max = self.inner.max_message_size;

        if frame.opcode() != OpCode::Continuation {
            if reader.partial.is_some() {
                reader.partial = None;
                return Err(ProtocolError::UnexpectedContinuation);
            }
            if frame.payload().len() > max {
                return Err(ProtocolError::MessageTooLarge {
                    size: frame.payload().len(),
                    max,
                });
            }
            if frame.is_final() {
                let opcode = frame.opcode();
                return Ok(Some((opcode, frame.into_payload())));
            }
            reader.partial = Some((frame.opcode(), BytesMut::from(&frame.payload()[..])));
            return Ok(None);
        }

        let size = match reader.partial.as_ref() {
            Some((_, buf)) => buf.len() + frame.payload().len(),
            None => return Err(ProtocolError::UnexpectedContinuation),
        };
        if size > max {
            reader.partial = None;
            return Err(ProtocolError::MessageTooLarge { size, max });
        }
        if let Some((_, buf)) = reader.partial.as_mut() {
            buf.extend_from_slice(frame.payload());
        }
        if !frame.is_final() {
            return Ok(None);
        }
        Ok(reader.partial.take().map(|(opcode, buf)| (opcode, buf.freeze())))
    }

    /// Receive the next message as text, exactly as the peer sent it.
    pub async fn receive_text(&self) -> WebSocketResult<Option<String>> {
        match self.receive_message().await? {
            None => Ok(None),
            Some(message) => message.into_wire_text().map(Some).map_err(|other| {
                WebSocketError::UnexpectedMessage {
                    expected: "text",
                    actual: other.kind(),
                }
            }),
        }
    }

    /// Receive the next message and deserialize it as `T`.
    pub async fn receive_json<T: DeserializeOwned>(&self) -> WebSocketResult<Option<T>> {
        match self.receive_message().await? {
            None => Ok(None),
            Some(message) => Ok(Some(message.parse_json()?)),
        }
    }

    /// Receive the next message as raw bytes.
    pub async fn receive_bytes(&self) -> WebSocketResult<Option<Bytes>> {
        match self.receive_message().await? {
            None => Ok(None),
            Some(Message::Binary(data)) => Ok(Some(data)),
            Some(Message::Text(text)) | Some(Message::Structured { raw: text, .. }) => {
                Ok(Some(Bytes::from(text)))
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
