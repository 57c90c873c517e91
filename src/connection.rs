//! Connection identity and the outbound transport seam.
//!
//! Every stage of the pipeline receives a [`Context`] naming the connection an
//! event belongs to and a [`Transport`] through which it can send payloads to
//! (or close) any live connection. Stages that transform outbound traffic wrap
//! the transport they were handed before passing a new context inward.

use std::fmt;

use bytes::Bytes;

/// Identifier assigned to a connection by the transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "conn-{}", self.0) }
}

/// A discrete unit of data moving through the pipeline.
///
/// Before the handshake completes, payloads are raw byte chunks. After the
/// framing stage they are whole messages, either text or binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text message.
    Text(String),
    /// Raw bytes or a binary message.
    Binary(Bytes),
}

impl Payload {
    /// Borrow the payload as bytes regardless of its kind.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Length of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.as_bytes().len() }

    /// Returns `true` when the payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.as_bytes().is_empty() }

    /// Consume the payload, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self { Self::Text(value) }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self { Self::Text(value.to_owned()) }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self { Self::Binary(value) }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self { Self::Binary(Bytes::copy_from_slice(value)) }
}

/// Outbound half of the transport collaborator.
///
/// Implementations deliver payloads to connections and honour close
/// requests. A close is a request: the pipeline root tears down the
/// connection's state once the current event finishes.
pub trait Transport {
    /// Queue `payload` for delivery to `id`.
    fn send(&mut self, id: ConnectionId, payload: Payload);

    /// Request that `id` be closed.
    fn close(&mut self, id: ConnectionId);

    /// Returns `true` once a close of `id` has been requested.
    ///
    /// Stages stop delivering a connection's buffered input when this holds.
    fn is_closing(&self, _id: ConnectionId) -> bool { false }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, id: ConnectionId, payload: Payload) { (**self).send(id, payload); }

    fn close(&mut self, id: ConnectionId) { (**self).close(id); }

    fn is_closing(&self, id: ConnectionId) -> bool { (**self).is_closing(id) }
}

/// Per-event view of a connection handed to each pipeline stage.
pub struct Context<'a> {
    id: ConnectionId,
    transport: &'a mut dyn Transport,
}

impl<'a> Context<'a> {
    /// Create a context for `id` sending through `transport`.
    pub fn new(id: ConnectionId, transport: &'a mut dyn Transport) -> Self { Self { id, transport } }

    /// Identifier of the connection this event belongs to.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Send a payload to this connection.
    pub fn send(&mut self, payload: impl Into<Payload>) { self.transport.send(self.id, payload.into()); }

    /// Send a payload to another connection.
    pub fn send_to(&mut self, id: ConnectionId, payload: impl Into<Payload>) {
        self.transport.send(id, payload.into());
    }

    /// Request closure of this connection.
    pub fn close(&mut self) { self.transport.close(self.id); }

    /// Returns `true` once this connection has been asked to close.
    #[must_use]
    pub fn is_closing(&self) -> bool { self.transport.is_closing(self.id) }

    /// Borrow the underlying transport.
    pub fn transport(&mut self) -> &mut dyn Transport { &mut *self.transport }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[derive(Default)]
    struct Sink(Vec<(ConnectionId, Payload)>, Vec<ConnectionId>);

    impl Transport for Sink {
        fn send(&mut self, id: ConnectionId, payload: Payload) { self.0.push((id, payload)); }

        fn close(&mut self, id: ConnectionId) { self.1.push(id); }
    }

    #[rstest]
    #[case(Payload::from("hey"), b"hey".as_slice())]
    #[case(Payload::from(Bytes::from_static(b"\x00\x01")), b"\x00\x01".as_slice())]
    fn payload_exposes_bytes(#[case] payload: Payload, #[case] expected: &[u8]) {
        assert_eq!(payload.as_bytes(), expected);
        assert_eq!(payload.len(), expected.len());
        assert_eq!(payload.into_bytes().as_ref(), expected);
    }

    #[test]
    fn context_routes_to_own_connection() {
        let mut sink = Sink::default();
        let id = ConnectionId::new(3);
        let mut ctx = Context::new(id, &mut sink);
        ctx.send("a");
        ctx.send_to(ConnectionId::new(4), "b");
        ctx.close();

        assert_eq!(
            sink.0,
            vec![
                (id, Payload::from("a")),
                (ConnectionId::new(4), Payload::from("b")),
            ]
        );
        assert_eq!(sink.1, vec![id]);
    }

    #[test]
    fn connection_id_displays_compactly() {
        assert_eq!(ConnectionId::from(9).to_string(), "conn-9");
    }
}
