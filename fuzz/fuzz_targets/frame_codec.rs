//! Fuzz target for the streaming frame decoder.
//!
//! Feeds arbitrary input in arbitrary chunk sizes through the server-role
//! codec. Decoding must never panic and never consume more than it was given.

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use haske_websocket::frame::{Frame, FrameCodec, OpCode, Rfc6455Codec};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzStream {
    /// Raw bytes from the peer
    bytes: Vec<u8>,
    /// Chunk sizes the bytes arrive in
    chunks: Vec<u8>,
    /// Payload to round-trip through a client encoder
    payload: Vec<u8>,
}

fuzz_target!(|input: FuzzStream| {
    let server = Rfc6455Codec::server().max_payload_size(1 << 20);
    let mut buf = BytesMut::new();
    let mut offset = 0;

    for chunk in input.chunks.iter().map(|c| *c as usize + 1) {
        let end = (offset + chunk).min(input.bytes.len());
        buf.extend_from_slice(&input.bytes[offset..end]);
        offset = end;

        match server.decode_frame(&buf) {
            Ok(Some((_, used))) => {
                assert!(used <= buf.len());
                let _ = buf.split_to(used);
            }
            Ok(None) => {}
            Err(_) => break,
        }
        if offset == input.bytes.len() {
            break;
        }
    }

    // Client-encoded data frames always decode on the server side.
    let client = Rfc6455Codec::client();
    let frame = Frame::new(OpCode::Binary, input.payload.clone(), true);
    let mut wire = BytesMut::new();
    if client.encode_frame(&frame, &mut wire).is_ok() {
        let (decoded, used) = Rfc6455Codec::server()
            .decode_frame(&wire)
            .expect("client frame must decode")
            .expect("client frame must be complete");
        assert_eq!(used, wire.len());
        assert_eq!(decoded.payload().as_ref(), input.payload.as_slice());
        assert!(decoded.is_masked());
    }
});
