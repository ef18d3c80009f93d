//! Error types for WebSocket operations.

use thiserror::Error;
use tungstenite::protocol::frame::coding::CloseCode;

/// Wire-level violations detected while decoding or encoding frames.
///
/// Every protocol error is fatal to the connection it occurred on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before a complete frame was available
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required to finish the frame
        needed: usize,
        /// Bytes that were available
        available: usize,
    },

    /// One of RSV1-RSV3 was set without a negotiated extension
    #[error("Reserved bits set in frame header")]
    ReservedBitsSet,

    /// Opcode outside the defined set
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpCode(u8),

    /// A masked frame arrived where masking is forbidden
    #[error("Received masked frame where masking is not allowed")]
    MaskedFrame,

    /// An unmasked frame arrived where masking is required
    #[error("Received unmasked frame where masking is required")]
    UnmaskedFrame,

    /// Control frame without the FIN bit
    #[error("Control frames must not be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload above 125 bytes
    #[error("Control frame payload too large: {0} bytes")]
    ControlFrameTooLarge(usize),

    /// Frame payload above the configured limit
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Announced payload size
        size: u64,
        /// Configured maximum
        max: usize,
    },

    /// Close payload of length 1 or with a non-UTF-8 reason
    #[error("Malformed close frame payload")]
    InvalidClosePayload,

    /// Continuation without a started message, or a new data frame mid-message
    #[error("Unexpected continuation state")]
    UnexpectedContinuation,

    /// Reassembled message above the configured limit
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Size reached so far
        size: usize,
        /// Configured maximum
        max: usize,
    },
}

impl ProtocolError {
    /// Status code to send in the Close frame that ends the connection.
    pub fn close_code(&self) -> CloseCode {
        match self {
            ProtocolError::PayloadTooLarge { .. } | ProtocolError::MessageTooLarge { .. } => {
                CloseCode::Size
            }
            _ => CloseCode::Protocol,
        }
    }
}

/// WebSocket error type.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Malformed frame or protocol violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation attempted on a connection that is not open
    #[error("Connection closed")]
    ConnectionClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Invalid upgrade request
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Received message of a different kind than requested
    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Requested kind
        expected: &'static str,
        /// Kind that arrived
        actual: &'static str,
    },

    /// Error raised by an application handler
    #[error("Handler error: {0}")]
    Handler(String),
}

impl WebSocketError {
    /// Whether this error ends the connection it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WebSocketError::Protocol(_)
                | WebSocketError::ConnectionClosed
                | WebSocketError::Io(_)
                | WebSocketError::Timeout
        )
    }

    /// Whether a failed send means the peer is gone, rather than that the
    /// message itself could not be sent.
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            WebSocketError::ConnectionClosed | WebSocketError::Io(_) | WebSocketError::Timeout
        )
    }

    /// Status code used when this error closes a connection.
    pub fn close_code(&self) -> CloseCode {
        match self {
            WebSocketError::Protocol(e) => e.close_code(),
            WebSocketError::ConnectionClosed | WebSocketError::Io(_) => CloseCode::Abnormal,
            WebSocketError::Timeout => CloseCode::Away,
            _ => CloseCode::Error,
        }
    }
}

/// Result type for WebSocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;
