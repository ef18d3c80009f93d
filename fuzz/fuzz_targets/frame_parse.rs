//! Fuzz target for frame parsing.
//!
//! Arbitrary bytes must either parse or fail with a protocol error, and
//! anything that parses must survive re-serialization unchanged.

#![no_main]

use haske_websocket::frame::{self, Frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parsed = Frame::parse(data);
    assert_eq!(parsed.is_ok(), frame::validate(data));

    if let Ok(frame) = parsed {
        // Opcode peek agrees with the full decode
        assert_eq!(frame::frame_type(data).ok(), Some(frame.opcode()));

        let reparsed = Frame::parse(&frame.serialize()).expect("serialized frame must parse");
        assert_eq!(reparsed.opcode(), frame.opcode());
        assert_eq!(reparsed.payload(), frame.payload());
        assert_eq!(reparsed.is_final(), frame.is_final());
        assert!(!reparsed.is_masked());
    }
});
