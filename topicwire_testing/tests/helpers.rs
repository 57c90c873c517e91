//! Tests for the testing helpers themselves.

use rstest::rstest;
use serde_json::json;
use topicwire::{ConnectionId, Payload, Transport};
use topicwire_testing::{Delivery, RecordingTransport, wire};

#[test]
fn recorder_keeps_order() {
    let mut transport = RecordingTransport::new();
    let id = ConnectionId::new(3);
    transport.send(id, Payload::from("a"));
    transport.close(id);
    assert_eq!(
        transport.deliveries(),
        [Delivery::Sent(id, Payload::from("a")), Delivery::Closed(id)]
    );
    assert!(transport.is_closed(id));
    assert!(!transport.is_closed(ConnectionId::new(4)));
}

#[rstest]
#[case(&b"HTTP/1.1 101 OK\r\n\r\nrest"[..], 19)]
#[case(&b"HTTP/1.1 101 OK\r\n"[..], 17)]
fn split_response_finds_head(#[case] bytes: &[u8], #[case] head_len: usize) {
    let (head, body) = wire::split_response(bytes);
    assert_eq!(head.len(), head_len);
    assert_eq!(head.len() + body.len(), bytes.len());
}

#[test]
fn frames_ignore_a_trailing_partial_frame() {
    let mut bytes = wire::envelope(&json!([5, "t"])).to_vec();
    let second = wire::envelope(&json!([6, "t"]));
    bytes.extend_from_slice(&second[..3]);
    assert_eq!(wire::envelopes(&bytes), [json!([5, "t"])]);
}

#[test]
fn handshake_carries_origin() {
    let request = wire::handshake("/ws", Some("a.example"));
    let text = std::str::from_utf8(&request).expect("ascii request");
    assert!(text.starts_with("GET /ws HTTP/1.1\r\n"));
    assert!(text.contains("Origin: http://a.example\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}
