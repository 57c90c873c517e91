//! A transport that records instead of writing.

use topicwire::{ConnectionId, Payload, Transport};

/// One outbound action taken by a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// A payload was sent to the connection.
    Sent(ConnectionId, Payload),
    /// The connection was closed.
    Closed(ConnectionId),
}

/// Records sends and closes in order.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    log: Vec<Delivery>,
}

impl RecordingTransport {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Every delivery so far.
    #[must_use]
    pub fn deliveries(&self) -> &[Delivery] { &self.log }

    /// Payloads sent to `id`, in order.
    pub fn sent_to(&self, id: ConnectionId) -> impl Iterator<Item = &Payload> + '_ {
        self.log.iter().filter_map(move |delivery| match delivery {
            Delivery::Sent(target, payload) if *target == id => Some(payload),
            _ => None,
        })
    }

    /// Raw bytes sent to `id`, concatenated.
    #[must_use]
    pub fn bytes_to(&self, id: ConnectionId) -> Vec<u8> {
        self.sent_to(id)
            .flat_map(|payload| payload.as_bytes().iter().copied())
            .collect()
    }

    /// The handshake response sent to `id`, as text.
    #[must_use]
    pub fn response(&self, id: ConnectionId) -> String {
        let bytes = self.bytes_to(id);
        let (head, _) = crate::wire::split_response(&bytes);
        String::from_utf8_lossy(head).into_owned()
    }

    /// Returns `true` if `id` was closed.
    #[must_use]
    pub fn is_closed(&self, id: ConnectionId) -> bool {
        self.log.contains(&Delivery::Closed(id))
    }

    /// Forget everything recorded so far.
    pub fn clear(&mut self) { self.log.clear(); }
}

impl Transport for RecordingTransport {
    fn send(&mut self, id: ConnectionId, payload: Payload) {
        self.log.push(Delivery::Sent(id, payload));
    }

    fn close(&mut self, id: ConnectionId) { self.log.push(Delivery::Closed(id)); }

    fn is_closing(&self, id: ConnectionId) -> bool { self.is_closed(id) }
}
