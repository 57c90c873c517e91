//! Synchronous driving of an assembled pipeline.

use std::io;

use bytes::Bytes;
use topicwire::{Component, ConnectionId, http::HandshakeServer};

use crate::{RecordingTransport, wire};

/// Owns a pipeline root and the transport it writes to.
///
/// Closes requested by the pipeline are recorded; the driver does not
/// disconnect on its own, matching a runtime that reports the close back
/// only once the socket is gone.
pub struct PipelineDriver<C> {
    pipeline: HandshakeServer<C>,
    transport: RecordingTransport,
}

impl<C: Component> PipelineDriver<C> {
    /// Drive `pipeline`.
    #[must_use]
    pub fn new(pipeline: HandshakeServer<C>) -> Self {
        Self {
            pipeline,
            transport: RecordingTransport::new(),
        }
    }

    /// Accept connection `id`.
    pub fn connect(&mut self, id: ConnectionId) { self.pipeline.connect(id); }

    /// Deliver raw bytes from `id`.
    pub fn feed(&mut self, id: ConnectionId, chunk: impl Into<Bytes>) {
        self.pipeline.receive(&mut self.transport, id, chunk.into());
    }

    /// Connect `id` and complete a handshake for `path` from `origin`.
    pub fn open(&mut self, id: ConnectionId, path: &str, origin: Option<&str>) {
        self.connect(id);
        self.feed(id, wire::handshake(path, origin));
    }

    /// The peer closed `id`.
    pub fn disconnect(&mut self, id: ConnectionId) {
        self.pipeline.disconnect(&mut self.transport, id);
    }

    /// The transport failed on `id`.
    pub fn fail(&mut self, id: ConnectionId, error: io::Error) {
        self.pipeline.fail(&mut self.transport, id, error);
    }

    /// Everything the pipeline sent or closed.
    #[must_use]
    pub fn transport(&self) -> &RecordingTransport { &self.transport }

    /// Mutable access to the recorder, for clearing between steps.
    pub fn transport_mut(&mut self) -> &mut RecordingTransport { &mut self.transport }

    /// The pipeline root.
    #[must_use]
    pub fn pipeline(&self) -> &HandshakeServer<C> { &self.pipeline }

    /// Envelopes sent to `id` after its handshake response.
    #[must_use]
    pub fn envelopes(&self, id: ConnectionId) -> Vec<serde_json::Value> {
        let bytes = self.transport.bytes_to(id);
        let (_, body) = wire::split_response(&bytes);
        wire::envelopes(body)
    }
}
