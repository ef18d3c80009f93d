//! Application-level message types.

use crate::frame::Frame;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

/// A complete application message.
///
/// Text payloads that parse as JSON arrive as [`Message::Structured`]; other
/// valid UTF-8 arrives as [`Message::Text`]. A structured message keeps the
/// exact text it was parsed from, and that text is what goes back on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Plain UTF-8 text
    Text(String),
    /// Structured JSON value, sent as a text frame
    Structured {
        /// Text the value was parsed from or serialized to
        raw: String,
        /// Parsed value
        value: Value,
    },
    /// Raw bytes, sent as a binary frame
    Binary(Bytes),
}

impl Message {
    /// Create a text message.
    pub fn text<S: Into<String>>(text: S) -> Self {
        Message::Text(text.into())
    }

    /// Create a binary message.
    pub fn binary<B: Into<Bytes>>(data: B) -> Self {
        Message::Binary(data.into())
    }

    /// Create a structured message from a serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(Message::Structured {
            raw: value.to_string(),
            value,
        })
    }

    /// Classify a UTF-8 text payload: JSON first, plain text otherwise.
    pub fn from_text_payload(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Message::Structured { raw: text, value },
            Err(_) => Message::Text(text),
        }
    }

    /// Deserialize the message body as `T`.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Message::Structured { value, .. } => T::deserialize(value),
            Message::Text(text) => serde_json::from_str(text),
            Message::Binary(data) => serde_json::from_slice(data),
        }
    }

    /// Text content, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Text carried on the wire for text and structured messages.
    pub fn as_wire_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) | Message::Structured { raw: text, .. } => Some(text),
            Message::Binary(_) => None,
        }
    }

    /// Consume the message, yielding its wire text if it has one.
    pub fn into_wire_text(self) -> Result<String, Self> {
        match self {
            Message::Text(text) | Message::Structured { raw: text, .. } => Ok(text),
            other => Err(other),
        }
    }

    /// Structured content, if this is a structured message.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Message::Structured { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Check if this is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Check if this is a structured message.
    pub fn is_structured(&self) -> bool {
        matches!(self, Message::Structured { .. })
    }

    /// Check if this is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Short name of the variant, for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Text(_) => "text",
            Message::Structured { .. } => "structured",
            Message::Binary(_) => "binary",
        }
    }

    /// Build the frame that carries this message.
    pub fn to_frame(&self) -> Frame {
        match self {
            Message::Text(text) | Message::Structured { raw: text, .. } => Frame::text(text.clone()),
            Message::Binary(data) => Frame::binary(data.clone()),
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Structured {
            raw: value.to_string(),
            value,
        }
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(data))
    }
}
