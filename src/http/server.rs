//! The pipeline root: handshake buffering and connection teardown.
//!
//! [`HandshakeServer`] receives raw transport events. While a connection is
//! awaiting its handshake, bytes feed the [`HeaderParser`]; once a request is
//! assembled the inner component sees `on_open` followed by any pipelined
//! bytes, and every later chunk is forwarded verbatim.
//!
//! Close requests issued by any stage are collected during an event and
//! applied once it finishes: the inner chain observes `on_close` for opened
//! connections, buffered state is dropped, and the close is passed on to the
//! real transport.

use std::{collections::HashMap, io};

use bytes::Bytes;
use tracing::{debug, warn};

use super::parser::{HeaderBuffer, HeaderParser, ParseStatus};
use crate::{
    component::Component,
    config::PipelineConfig,
    connection::{ConnectionId, Context, Payload, Transport},
    error::PipelineError,
    metrics,
};

enum HandshakeState {
    Awaiting(HeaderBuffer),
    Open,
}

/// Wraps the caller's transport, deferring close requests.
struct CloseTracker<'a> {
    inner: &'a mut dyn Transport,
    pending: Vec<ConnectionId>,
}

impl Transport for CloseTracker<'_> {
    fn send(&mut self, id: ConnectionId, payload: Payload) { self.inner.send(id, payload); }

    fn close(&mut self, id: ConnectionId) {
        if !self.pending.contains(&id) {
            self.pending.push(id);
        }
    }

    fn is_closing(&self, id: ConnectionId) -> bool {
        self.pending.contains(&id) || self.inner.is_closing(id)
    }
}

/// Root of the decoration pipeline.
pub struct HandshakeServer<C> {
    inner: C,
    parser: HeaderParser,
    connections: HashMap<ConnectionId, HandshakeState>,
}

impl<C: Component> HandshakeServer<C> {
    /// Wrap `inner` with a default header parser.
    #[must_use]
    pub fn new(inner: C) -> Self { Self::with_parser(inner, HeaderParser::default()) }

    /// Wrap `inner` using the limits in `config`.
    #[must_use]
    pub fn with_config(inner: C, config: &PipelineConfig) -> Self {
        Self::with_parser(
            inner,
            HeaderParser::new(config.max_header_bytes, config.terminators),
        )
    }

    /// Wrap `inner` with an explicit parser.
    #[must_use]
    pub fn with_parser(inner: C, parser: HeaderParser) -> Self {
        Self {
            inner,
            parser,
            connections: HashMap::new(),
        }
    }

    /// Borrow the inner component.
    #[must_use]
    pub fn inner(&self) -> &C { &self.inner }

    /// Mutably borrow the inner component.
    pub fn inner_mut(&mut self) -> &mut C { &mut self.inner }

    /// Number of connections currently tracked.
    #[must_use]
    pub fn connection_count(&self) -> usize { self.connections.len() }

    /// Returns `true` once `id` has completed its handshake.
    #[must_use]
    pub fn is_open(&self, id: ConnectionId) -> bool {
        matches!(self.connections.get(&id), Some(HandshakeState::Open))
    }

    /// Register a newly accepted connection.
    pub fn connect(&mut self, id: ConnectionId) {
        debug!(connection = %id, "connection accepted");
        self.connections
            .insert(id, HandshakeState::Awaiting(HeaderBuffer::default()));
    }

    /// Process a chunk of bytes received on `id`.
    pub fn receive(&mut self, transport: &mut dyn Transport, id: ConnectionId, chunk: Bytes) {
        let mut tracker = CloseTracker {
            inner: transport,
            pending: Vec::new(),
        };
        self.dispatch(&mut tracker, id, chunk);
        self.settle(tracker);
    }

    /// The peer closed `id`.
    pub fn disconnect(&mut self, transport: &mut dyn Transport, id: ConnectionId) {
        let mut tracker = CloseTracker {
            inner: transport,
            pending: Vec::new(),
        };
        if let Some(HandshakeState::Open) = self.connections.remove(&id) {
            self.inner.on_close(&mut Context::new(id, &mut tracker));
        }
        debug!(connection = %id, "connection closed by peer");
        self.settle(tracker);
    }

    /// The transport reported `error` on `id`; the connection is closed.
    pub fn fail(&mut self, transport: &mut dyn Transport, id: ConnectionId, error: io::Error) {
        let mut tracker = CloseTracker {
            inner: transport,
            pending: Vec::new(),
        };
        let error = PipelineError::Transport(error);
        match self.connections.get(&id) {
            Some(HandshakeState::Open) => {
                warn!(connection = %id, error = %error, "transport error");
                self.inner.on_error(&mut Context::new(id, &mut tracker), &error);
            }
            Some(HandshakeState::Awaiting(_)) => {
                debug!(connection = %id, error = %error, "transport error before handshake");
            }
            None => return,
        }
        tracker.close(id);
        self.settle(tracker);
    }

    fn dispatch(&mut self, tracker: &mut CloseTracker<'_>, id: ConnectionId, chunk: Bytes) {
        let status = match self.connections.get_mut(&id) {
            None => {
                debug!(connection = %id, "data for unknown connection dropped");
                return;
            }
            Some(HandshakeState::Open) => {
                let result = self
                    .inner
                    .on_message(&mut Context::new(id, &mut *tracker), Payload::Binary(chunk));
                reject(tracker, id, result);
                return;
            }
            Some(HandshakeState::Awaiting(buffer)) => self.parser.feed(buffer, &chunk),
        };

        match status {
            Ok(ParseStatus::Incomplete) => {}
            Ok(ParseStatus::Complete { request, leftover }) => {
                self.connections.insert(id, HandshakeState::Open);
                debug!(
                    connection = %id,
                    method = request.method(),
                    path = request.path(),
                    "handshake request received"
                );
                let result = self.inner.on_open(&mut Context::new(id, &mut *tracker), &request);
                if result.is_err() {
                    // The inner chain never accepted the connection.
                    self.connections.remove(&id);
                }
                reject(tracker, id, result);
                if !leftover.is_empty() && !tracker.is_closing(id) && self.is_open(id) {
                    let result = self
                        .inner
                        .on_message(&mut Context::new(id, &mut *tracker), Payload::Binary(leftover));
                    reject(tracker, id, result);
                }
            }
            Err(error) => {
                let error = PipelineError::from(error);
                warn!(connection = %id, kind = error.kind(), error = %error, "handshake failed");
                metrics::inc_errors(error.kind());
                self.connections.remove(&id);
                tracker.close(id);
            }
        }
    }

    /// Apply close requests collected while handling an event.
    fn settle(&mut self, mut tracker: CloseTracker<'_>) {
        let mut index = 0;
        while let Some(&id) = tracker.pending.get(index) {
            index += 1;
            match self.connections.remove(&id) {
                Some(HandshakeState::Open) => {
                    self.inner.on_close(&mut Context::new(id, &mut tracker));
                }
                Some(HandshakeState::Awaiting(_)) | None => {}
            }
            tracker.inner.close(id);
        }
    }
}

fn reject(tracker: &mut CloseTracker<'_>, id: ConnectionId, result: crate::error::Result<()>) {
    if let Err(error) = result {
        warn!(connection = %id, kind = error.kind(), error = %error, "closing connection");
        metrics::inc_errors(error.kind());
        tracker.close(id);
    }
}
