//! RFC 6455 frames and the frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16/64 bits)          |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Masking-key (0 or 4 bytes)    |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```
//!
//! [`Frame`] is an immutable value. Decoding and encoding go through the
//! [`FrameCodec`] trait; [`Rfc6455Codec`] is the implementation used by
//! connections and also plugs into `tokio_util::codec` framing.

use crate::error::{ProtocolError, WebSocketError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tungstenite::protocol::frame::coding::CloseCode;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest close reason that fits next to the 2-byte status code.
const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation of a fragmented message (0x0)
    Continuation,
    /// UTF-8 text data (0x1)
    Text,
    /// Binary data (0x2)
    Binary,
    /// Connection close (0x8)
    Close,
    /// Ping (0x9)
    Ping,
    /// Pong (0xA)
    Pong,
}

impl OpCode {
    /// Close, Ping and Pong are control frames.
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Continuation, Text and Binary carry application data.
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(ProtocolError::InvalidOpCode(other)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(opcode: OpCode) -> Self {
        match opcode {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A single WebSocket frame.
///
/// Payloads are always stored unmasked. `is_masked` records whether the frame
/// arrived masked on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: OpCode,
    payload: Bytes,
    is_final: bool,
    is_masked: bool,
}

impl Frame {
    /// Create a frame with an explicit opcode and FIN flag.
    pub fn new<B: Into<Bytes>>(opcode: OpCode, payload: B, is_final: bool) -> Self {
        Self {
            opcode,
            payload: payload.into(),
            is_final,
            is_masked: false,
        }
    }

    /// Create a final text frame.
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::new(OpCode::Text, Bytes::from(text.into()), true)
    }

    /// Create a final binary frame.
    pub fn binary<B: Into<Bytes>>(data: B) -> Self {
        Self::new(OpCode::Binary, data, true)
    }

    /// Create a close frame.
    ///
    /// The reason is only encoded together with a status code and is cut to
    /// 123 bytes on a character boundary.
    pub fn close(code: Option<CloseCode>, reason: Option<&str>) -> Self {
        let mut payload = BytesMut::new();
        if let Some(code) = code {
            payload.put_u16(code.into());
            if let Some(reason) = reason {
                payload.put_slice(truncate_utf8(reason, MAX_CLOSE_REASON).as_bytes());
            }
        }
        Self::new(OpCode::Close, payload.freeze(), true)
    }

    /// Create a ping frame.
    pub fn ping<B: Into<Bytes>>(data: B) -> Self {
        Self::new(OpCode::Ping, data, true)
    }

    /// Create a pong frame.
    pub fn pong<B: Into<Bytes>>(data: B) -> Self {
        Self::new(OpCode::Pong, data, true)
    }

    /// Frame opcode.
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Unmasked payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// FIN flag.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Whether the frame was masked on the wire.
    pub fn is_masked(&self) -> bool {
        self.is_masked
    }

    /// Payload as UTF-8, for text and close frames alike.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Status code carried by a close frame.
    pub fn close_code(&self) -> Option<CloseCode> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(CloseCode::from(u16::from_be_bytes([
            self.payload[0],
            self.payload[1],
        ])))
    }

    /// Reason text carried by a close frame.
    pub fn close_reason(&self) -> Option<&str> {
        if self.opcode != OpCode::Close || self.payload.len() <= 2 {
            return None;
        }
        std::str::from_utf8(&self.payload[2..]).ok()
    }

    /// Parse one frame from the start of `bytes`.
    ///
    /// No masking direction is enforced here; use [`Rfc6455Codec`] with a
    /// [`Role`] when direction rules apply.
    pub fn parse(bytes: &[u8]) -> Result<Frame, ProtocolError> {
        match Rfc6455Codec::permissive().decode_inner(bytes)? {
            Decoded::Frame(frame, _) => Ok(frame),
            Decoded::Incomplete(needed) => Err(ProtocolError::Truncated {
                needed,
                available: bytes.len(),
            }),
        }
    }

    /// Serialize as an unmasked frame, the form a server sends.
    pub fn serialize(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(header_len(self.payload.len(), false) + self.payload.len());
        write_frame(self, None, &mut dst);
        dst.freeze()
    }
}

/// Whether `bytes` starts with a complete, well-formed frame.
pub fn validate(bytes: &[u8]) -> bool {
    Frame::parse(bytes).is_ok()
}

/// Read the opcode of the frame at the start of `bytes` without decoding it.
pub fn frame_type(bytes: &[u8]) -> Result<OpCode, ProtocolError> {
    let first = bytes.first().ok_or(ProtocolError::Truncated {
        needed: 2,
        available: 0,
    })?;
    OpCode::try_from(first & 0x0F)
}

/// XOR `buf` with the rolling 4-byte mask key. Masking and unmasking are the same operation.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn header_len(payload_len: usize, masked: bool) -> usize {
    let ext = if payload_len > u16::MAX as usize {
        8
    } else if payload_len > MAX_CONTROL_PAYLOAD {
        2
    } else {
        0
    };
    2 + ext + if masked { 4 } else { 0 }
}

fn write_frame(frame: &Frame, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
    let len = frame.payload.len();
    dst.reserve(header_len(len, mask.is_some()) + len);

    let fin = if frame.is_final { 0x80 } else { 0 };
    dst.put_u8(fin | u8::from(frame.opcode));

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if len <= MAX_CONTROL_PAYLOAD {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(&frame.payload);
            apply_mask(&mut dst[start..], key);
        }
        None => dst.put_slice(&frame.payload),
    }
}

fn validate_close_payload(payload: &[u8]) -> Result<(), ProtocolError> {
    match payload.len() {
        0 => Ok(()),
        1 => Err(ProtocolError::InvalidClosePayload),
        _ => std::str::from_utf8(&payload[2..])
            .map(|_| ())
            .map_err(|_| ProtocolError::InvalidClosePayload),
    }
}

/// Which side of the connection a codec serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepting side; never masks outgoing frames
    Server,
    /// Initiating side; masks every outgoing frame
    Client,
}

/// How inbound frames must be masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskPolicy {
    /// Reject unmasked frames
    Required,
    /// Reject masked frames
    Forbidden,
    /// Accept either
    Optional,
}

/// Frame encoding and decoding contract.
pub trait FrameCodec: Send + Sync {
    /// Decode one frame from the front of `src`.
    ///
    /// Returns the frame and the number of bytes it occupied, or `None` when
    /// `src` does not yet hold a complete frame.
    fn decode_frame(&self, src: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError>;

    /// Append the wire form of `frame` to `dst`.
    fn encode_frame(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError>;
}

enum Decoded {
    Frame(Frame, usize),
    Incomplete(usize),
}

/// RFC 6455 frame codec.
#[derive(Debug, Clone)]
pub struct Rfc6455Codec {
    role: Role,
    inbound_masking: MaskPolicy,
    max_payload_size: usize,
}

impl Rfc6455Codec {
    /// Default maximum payload size (16 MiB).
    pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

    /// Create a codec for `role` with the RFC's masking rules.
    pub fn new(role: Role) -> Self {
        let inbound_masking = match role {
            Role::Server => MaskPolicy::Required,
            Role::Client => MaskPolicy::Forbidden,
        };
        Self {
            role,
            inbound_masking,
            max_payload_size: Self::DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Server-role codec.
    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    /// Client-role codec.
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    /// Codec that accepts any masking and any size; writes like a server.
    pub fn permissive() -> Self {
        Self {
            role: Role::Server,
            inbound_masking: MaskPolicy::Optional,
            max_payload_size: usize::MAX,
        }
    }

    /// Set the maximum accepted payload size.
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Override the inbound masking policy.
    pub fn inbound_masking(mut self, policy: MaskPolicy) -> Self {
        self.inbound_masking = policy;
        self
    }

    /// Codec role.
    pub fn role(&self) -> Role {
        self.role
    }

    fn decode_inner(&self, src: &[u8]) -> Result<Decoded, ProtocolError> {
        let available = src.len();
        if available < 2 {
            return Ok(Decoded::Incomplete(2));
        }

        let first = src[0];
        let second = src[1];

        if first & 0x70 != 0 {
            return Err(ProtocolError::ReservedBitsSet);
        }
        let is_final = first & 0x80 != 0;
        let opcode = OpCode::try_from(first & 0x0F)?;

        let masked = second & 0x80 != 0;
        match (self.inbound_masking, masked) {
            (MaskPolicy::Required, false) => return Err(ProtocolError::UnmaskedFrame),
            (MaskPolicy::Forbidden, true) => return Err(ProtocolError::MaskedFrame),
            _ => {}
        }

        let len7 = second & 0x7F;
        if opcode.is_control() {
            if !is_final {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if len7 as usize > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::ControlFrameTooLarge(len7 as usize));
            }
        }

        let (payload_len, mut offset) = match len7 {
            126 => {
                if available < 4 {
                    return Ok(Decoded::Incomplete(4));
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 4)
            }
            127 => {
                if available < 10 {
                    return Ok(Decoded::Incomplete(10));
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                (u64::from_be_bytes(raw), 10)
            }
            n => (u64::from(n), 2),
        };

        if payload_len > self.max_payload_size as u64 {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload_size,
            });
        }

        let mask_key = if masked {
            if available < offset + 4 {
                return Ok(Decoded::Incomplete(offset + 4));
            }
            let key = [src[offset], src[offset + 1], src[offset + 2], src[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let end = usize::try_from(payload_len)
            .ok()
            .and_then(|len| offset.checked_add(len))
            .ok_or(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload_size,
            })?;
        if available < end {
            return Ok(Decoded::Incomplete(end));
        }

        let mut payload = BytesMut::from(&src[offset..end]);
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }
        let payload = payload.freeze();

        if opcode == OpCode::Close {
            validate_close_payload(&payload)?;
        }

        Ok(Decoded::Frame(
            Frame {
                opcode,
                payload,
                is_final,
                is_masked: masked,
            },
            end,
        ))
    }
}

impl Default for Rfc6455Codec {
    fn default() -> Self {
        Self::server()
    }
}

impl FrameCodec for Rfc6455Codec {
    fn decode_frame(&self, src: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
        match self.decode_inner(src)? {
            Decoded::Frame(frame, used) => Ok(Some((frame, used))),
            Decoded::Incomplete(_) => Ok(None),
        }
    }

    fn encode_frame(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = frame.payload.len();
        if frame.opcode.is_control() {
            if !frame.is_final {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if len > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::ControlFrameTooLarge(len));
            }
        }
        if len > self.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: len as u64,
                max: self.max_payload_size,
            });
        }

        let mask = match self.role {
            Role::Client => Some(rand::random::<[u8; 4]>()),
            Role::Server => None,
        };
        write_frame(frame, mask, dst);
        Ok(())
    }
}

impl Decoder for Rfc6455Codec {
    type Item = Frame;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WebSocketError> {
        match self.decode_inner(src)? {
            Decoded::Frame(frame, used) => {
                src.advance(used);
                Ok(Some(frame))
            }
            Decoded::Incomplete(needed) => {
                src.reserve(needed.saturating_sub(src.len()));
                Ok(None)
            }
        }
    }
}

impl Encoder<Frame> for Rfc6455Codec {
    type Error = WebSocketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WebSocketError> {
        self.encode_frame(&frame, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn masked_bytes(frame: &Frame, key: [u8; 4]) -> Vec<u8> {
        let mut dst = BytesMut::new();
        write_frame(frame, Some(key), &mut dst);
        dst.to_vec()
    }

    #[test]
    fn test_round_trip_length_boundaries() {
        for (size, header) in [
            (0usize, 2usize),
            (1, 2),
            (125, 2),
            (126, 4),
            (65535, 4),
            (65536, 10),
        ] {
            let frame = Frame::text("a".repeat(size));
            let bytes = frame.serialize();
            assert_eq!(bytes.len(), header + size, "size {}", size);
            assert_eq!(Frame::parse(&bytes).unwrap(), frame, "size {}", size);
        }
    }

    #[test]
    fn test_length_field_encoding() {
        assert_eq!(Frame::binary(vec![0u8; 125]).serialize()[1], 125);
        assert_eq!(Frame::binary(vec![0u8; 126]).serialize()[1], 126);
        let bytes = Frame::binary(vec![0u8; 126]).serialize();
        assert_eq!(&bytes[2..4], &[0x00, 0x7E]);
        let bytes = Frame::binary(vec![0u8; 65536]).serialize();
        assert_eq!(bytes[1], 127);
        assert_eq!(&bytes[2..10], &[0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_parse_masked_frame() {
        // RFC 6455 section 5.7: masked "Hello"
        let bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let frame = Frame::parse(&bytes).unwrap();
        assert_eq!(frame.opcode(), OpCode::Text);
        assert_eq!(frame.as_text(), Some("Hello"));
        assert!(frame.is_final());
        assert!(frame.is_masked());
    }

    #[test]
    fn test_parse_fragment_headers() {
        let first = Frame::parse(&[0x01, 0x03, b'H', b'e', b'l']).unwrap();
        assert_eq!(first.opcode(), OpCode::Text);
        assert!(!first.is_final());

        let last = Frame::parse(&[0x80, 0x02, b'l', b'o']).unwrap();
        assert_eq!(last.opcode(), OpCode::Continuation);
        assert!(last.is_final());
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(
            Frame::parse(&[0x81]),
            Err(ProtocolError::Truncated {
                needed: 2,
                available: 1
            })
        );
        assert_eq!(
            Frame::parse(&[0x81, 0x7E, 0x00]),
            Err(ProtocolError::Truncated {
                needed: 4,
                available: 3
            })
        );
        assert_eq!(
            Frame::parse(&[0x81, 0x85, 0x37, 0xfa]),
            Err(ProtocolError::Truncated {
                needed: 6,
                available: 4
            })
        );
        assert_eq!(
            Frame::parse(&[0x82, 0x03, 0x01]),
            Err(ProtocolError::Truncated {
                needed: 5,
                available: 3
            })
        );
    }

    #[test]
    fn test_reserved_bits_rejected() {
        for rsv in [0x40u8, 0x20, 0x10] {
            assert_eq!(
                Frame::parse(&[0x81 | rsv, 0x00]),
                Err(ProtocolError::ReservedBitsSet)
            );
        }
    }

    #[test]
    fn test_reserved_opcodes_rejected() {
        for opcode in [0x3u8, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert_eq!(
                Frame::parse(&[0x80 | opcode, 0x00]),
                Err(ProtocolError::InvalidOpCode(opcode))
            );
        }
    }

    #[test]
    fn test_control_frame_rules() {
        assert_eq!(
            Frame::parse(&[0x09, 0x00]),
            Err(ProtocolError::FragmentedControlFrame)
        );
        assert_eq!(
            Frame::parse(&[0x89, 0x7E, 0x00, 0x7E]),
            Err(ProtocolError::ControlFrameTooLarge(126))
        );

        let mut dst = BytesMut::new();
        let err = Rfc6455Codec::server()
            .encode_frame(&Frame::ping(vec![0u8; 126]), &mut dst)
            .unwrap_err();
        assert_eq!(err, ProtocolError::ControlFrameTooLarge(126));
    }

    #[test]
    fn test_mask_policy_by_role() {
        let frame = Frame::text("hi");
        let masked = masked_bytes(&frame, [1, 2, 3, 4]);
        let unmasked = frame.serialize();

        let server = Rfc6455Codec::server();
        assert!(server.decode_frame(&masked).unwrap().is_some());
        assert_eq!(
            server.decode_frame(&unmasked),
            Err(ProtocolError::UnmaskedFrame)
        );

        let client = Rfc6455Codec::client();
        assert!(client.decode_frame(&unmasked).unwrap().is_some());
        assert_eq!(client.decode_frame(&masked), Err(ProtocolError::MaskedFrame));

        let relaxed = Rfc6455Codec::server().inbound_masking(MaskPolicy::Optional);
        assert!(relaxed.decode_frame(&unmasked).unwrap().is_some());
    }

    #[test]
    fn test_client_encode_is_decoded_by_server() {
        let frame = Frame::binary(vec![7u8; 300]);
        let mut dst = BytesMut::new();
        Rfc6455Codec::client().encode_frame(&frame, &mut dst).unwrap();
        assert_eq!(dst[1] & 0x80, 0x80);

        let (decoded, used) = Rfc6455Codec::server().decode_frame(&dst).unwrap().unwrap();
        assert_eq!(used, dst.len());
        assert_eq!(decoded.payload(), frame.payload());
        assert!(decoded.is_masked());
    }

    #[test]
    fn test_payload_limit() {
        let codec = Rfc6455Codec::permissive().max_payload_size(100);
        let bytes = Frame::binary(vec![0u8; 101]).serialize();
        assert_eq!(
            codec.decode_frame(&bytes),
            Err(ProtocolError::PayloadTooLarge { size: 101, max: 100 })
        );
    }

    #[test]
    fn test_close_frame_payload() {
        let frame = Frame::close(Some(CloseCode::Normal), Some("bye"));
        assert_eq!(&frame.payload()[..], &[0x03, 0xE8, b'b', b'y', b'e']);

        let parsed = Frame::parse(&frame.serialize()).unwrap();
        assert_eq!(parsed.close_code(), Some(CloseCode::Normal));
        assert_eq!(parsed.close_reason(), Some("bye"));

        let empty = Frame::close(None, Some("ignored"));
        assert!(empty.payload().is_empty());
        assert_eq!(empty.close_code(), None);

        assert_eq!(
            Frame::parse(&[0x88, 0x01, 0x03]),
            Err(ProtocolError::InvalidClosePayload)
        );
        assert_eq!(
            Frame::parse(&[0x88, 0x03, 0x03, 0xE8, 0xFF]),
            Err(ProtocolError::InvalidClosePayload)
        );
    }

    #[test]
    fn test_close_reason_truncated() {
        let reason = "é".repeat(100);
        let frame = Frame::close(Some(CloseCode::Away), Some(&reason));
        assert!(frame.payload().len() <= MAX_CONTROL_PAYLOAD);
        assert!(frame.close_reason().is_some());
    }

    #[test]
    fn test_validate_and_frame_type() {
        let bytes = Frame::ping("x").serialize();
        assert!(validate(&bytes));
        assert!(!validate(&bytes[..1]));
        assert_eq!(frame_type(&bytes), Ok(OpCode::Ping));
        assert_eq!(frame_type(&[0x8A]), Ok(OpCode::Pong));
        assert_eq!(frame_type(&[0x83]), Err(ProtocolError::InvalidOpCode(3)));
        assert!(frame_type(&[]).is_err());
    }

    #[test]
    fn test_decoder_handles_partial_input() {
        let mut codec = Rfc6455Codec::permissive();
        let wire = [Frame::text("one").serialize(), Frame::text("two").serialize()].concat();

        let mut buf = BytesMut::from(&wire[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[3..]);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.as_text(), Some("one"));
        assert_eq!(second.as_text(), Some("two"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_apply_mask_is_involution() {
        let mut data = b"payload bytes".to_vec();
        apply_mask(&mut data, [0xAA, 0x55, 0x0F, 0xF0]);
        assert_ne!(&data[..], b"payload bytes");
        apply_mask(&mut data, [0xAA, 0x55, 0x0F, 0xF0]);
        assert_eq!(&data[..], b"payload bytes");
    }

    proptest! {
        #[test]
        fn prop_masked_data_frames_decode(
            payload in proptest::collection::vec(any::<u8>(), 0..70_000),
            key in any::<[u8; 4]>(),
            binary in any::<bool>(),
            fin in any::<bool>(),
        ) {
            let opcode = if binary { OpCode::Binary } else { OpCode::Text };
            let frame = Frame::new(opcode, payload.clone(), fin);
            let wire = masked_bytes(&frame, key);
            let (decoded, used) = Rfc6455Codec::server().decode_frame(&wire).unwrap().unwrap();
            prop_assert_eq!(used, wire.len());
            prop_assert_eq!(&decoded.payload()[..], &payload[..]);
            prop_assert_eq!(decoded.opcode(), opcode);
            prop_assert_eq!(decoded.is_final(), fin);
        }
    }
}
