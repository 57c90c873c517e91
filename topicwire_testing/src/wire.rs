//! Byte-level builders and parsers for the default wire format.

use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use topicwire::{LengthDelimitedMessageCodec, MessageCodec, Payload};

/// Build an upgrade request for `path`.
///
/// When `origin` is given it is sent as `Origin: http://{origin}`.
#[must_use]
pub fn handshake(path: &str, origin: Option<&str>) -> Bytes {
    let mut text = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nUpgrade: topicwire\r\nConnection: Upgrade\r\n"
    );
    if let Some(origin) = origin {
        text.push_str(&format!("Origin: http://{origin}\r\n"));
    }
    text.push_str("\r\n");
    Bytes::from(text)
}

/// Split a byte stream after the handshake response head.
///
/// Returns the whole input as the head when no terminator is present.
#[must_use]
pub fn split_response(bytes: &[u8]) -> (&[u8], &[u8]) {
    bytes
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map_or((bytes, &[][..]), |at| bytes.split_at(at + 4))
}

/// Encode `payload` as one frame of the default codec.
///
/// # Panics
///
/// Panics if the payload exceeds the default maximum frame length.
#[must_use]
pub fn frame(payload: impl Into<Payload>) -> Bytes {
    let mut buf = BytesMut::new();
    LengthDelimitedMessageCodec::default()
        .encoder()
        .encode(payload.into(), &mut buf)
        .expect("payload fits in a frame");
    buf.freeze()
}

/// Encode a JSON envelope as a text frame.
#[must_use]
pub fn envelope(value: &Value) -> Bytes { frame(value.to_string()) }

/// Decode every complete frame in `bytes`, ignoring a trailing partial one.
///
/// # Panics
///
/// Panics if `bytes` holds a malformed frame.
#[must_use]
pub fn frames(bytes: &[u8]) -> Vec<Payload> {
    let mut decoder = LengthDelimitedMessageCodec::default().decoder();
    let mut buf = BytesMut::from(bytes);
    let mut out = Vec::new();
    while let Some(payload) = decoder.decode(&mut buf).expect("well-formed frames") {
        out.push(payload);
    }
    out
}

/// Decode every complete frame as a JSON envelope.
///
/// # Panics
///
/// Panics if a frame is binary or not valid JSON.
#[must_use]
pub fn envelopes(bytes: &[u8]) -> Vec<Value> {
    frames(bytes)
        .into_iter()
        .map(|payload| match payload {
            Payload::Text(text) => serde_json::from_str(&text).expect("envelope is JSON"),
            other => panic!("expected a text frame, got {other:?}"),
        })
        .collect()
}
