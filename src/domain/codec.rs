//! JSON message codec.
//!
//! Every inbound frame must hold one UTF-8 JSON value of any type. The
//! value is decoded once, then re-encoded once per broadcast; all
//! recipients receive the same encoded bytes.

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// One decoded client message.
///
/// No schema is imposed: objects, arrays, strings, numbers, booleans and
/// `null` are all valid. Object key order is preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayMessage(serde_json::Value);

impl RelayMessage {
    /// Wraps an already-built JSON value.
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Returns the decoded JSON value.
    #[must_use]
    pub const fn value(&self) -> &serde_json::Value {
        &self.0
    }

}

/// Parses one raw frame.
///
/// # Errors
///
/// Returns [`RelayError::Decode`] if the bytes are not UTF-8 or not a
/// single well-formed JSON value. Values nested 128 or more arrays or
/// objects deep are rejected, as are strings holding an unpaired UTF-16
/// surrogate escape such as `"\ud800"`.
pub fn decode(raw: &[u8]) -> Result<RelayMessage, RelayError> {
    serde_json::from_slice(raw).map_err(RelayError::Decode)
}

/// Serializes a message into the text frame sent to every recipient.
///
/// # Errors
///
/// Returns [`RelayError::Encode`] if serialization fails.
pub fn encode(message: &RelayMessage) -> Result<Utf8Bytes, RelayError> {
    serde_json::to_string(message)
        .map(Utf8Bytes::from)
        .map_err(RelayError::Encode)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn decodes_any_json_type() {
        for raw in [
            r#"{"text":"hi"}"#,
            "[1,2,3]",
            r#""plain string""#,
            "42",
            "true",
            "null",
        ] {
            assert_ok!(decode(raw.as_bytes()));
        }
    }

    #[test]
    fn rejects_malformed_input() {
        assert_err!(decode(b"not json"));
        assert_err!(decode(b""));
        assert_err!(decode(br#"{"text":"#));
        assert_err!(decode(&[0xff, 0xfe]));
    }

    #[test]
    fn rejects_trailing_values() {
        assert_err!(decode(b"{} {}"));
    }

    #[test]
    fn surrounding_whitespace_is_accepted() {
        let Ok(msg) = decode(b"  {\"a\": 1}\n") else {
            panic!("expected decode to succeed");
        };
        assert_eq!(msg.value(), &json!({"a": 1}));
    }

    #[test]
    fn encode_is_compact_and_keeps_key_order() {
        let Ok(msg) = decode(br#"{ "z": 1, "a": [true, null] }"#) else {
            panic!("expected decode to succeed");
        };
        let Ok(frame) = encode(&msg) else {
            panic!("expected encode to succeed");
        };
        assert_eq!(frame.as_str(), r#"{"z":1,"a":[true,null]}"#);
    }

    #[test]
    fn encoded_frame_decodes_to_equal_value() {
        let original = RelayMessage::new(json!({"text": "hi", "n": [1.5, -2]}));
        let Ok(frame) = encode(&original) else {
            panic!("expected encode to succeed");
        };
        let Ok(decoded) = decode(frame.as_bytes()) else {
            panic!("expected decode to succeed");
        };
        assert_eq!(decoded, original);
    }

    #[test]
    fn nesting_is_limited_to_127_levels() {
        let nested = |depth: usize| format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        assert_ok!(decode(nested(100).as_bytes()));
        assert_ok!(decode(nested(127).as_bytes()));
        assert_err!(decode(nested(128).as_bytes()));
        assert_err!(decode(nested(200).as_bytes()));
    }

    #[test]
    fn unpaired_surrogate_escape_is_rejected() {
        assert_err!(decode(br#""\ud800""#));
        assert_err!(decode(br#"{"text":"\udc00x"}"#));
        let Ok(msg) = decode(br#""\ud83d\ude00""#) else {
            panic!("expected surrogate pair to decode");
        };
        assert_eq!(msg.value(), &json!("\u{1f600}"));
    }
}
