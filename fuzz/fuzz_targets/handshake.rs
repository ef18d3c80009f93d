//! Fuzz target for upgrade request validation.

#![no_main]

use arbitrary::Arbitrary;
use haske_websocket::handshake;
use http::{HeaderMap, HeaderName, HeaderValue};
use libfuzzer_sys::fuzz_target;

/// Arbitrary headers for fuzzing.
#[derive(Debug, Arbitrary)]
struct FuzzHeaders {
    /// Key-value pairs
    pairs: Vec<(String, String)>,
    /// Client key fed directly to the accept derivation
    key: String,
}

fuzz_target!(|data: FuzzHeaders| {
    let mut headers = HeaderMap::new();
    for (name, value) in &data.pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }

    if let Ok(key) = handshake::validate_upgrade_request(&headers) {
        assert!(handshake::is_upgrade_request(&headers));
        assert!(!key.is_empty());
        let response = handshake::upgrade_response(key).expect("valid key builds a response");
        assert_eq!(response.status(), http::StatusCode::SWITCHING_PROTOCOLS);
    }

    // Accept values are always 28 base64 characters.
    assert_eq!(handshake::accept_key(&data.key).len(), 28);
});
