//! Message framing stage.
//!
//! [`FramingStage`] sits between the handshake layer, which forwards raw
//! chunks, and a message-oriented component such as the sub-protocol engine.
//! Inbound chunks are buffered per connection and cut into whole messages by
//! a [`MessageCodec`]; outbound payloads sent by the inner component are
//! encoded before they reach the real transport.

use std::collections::HashMap;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::{
    codec::{MessageCodec, classify},
    component::Component,
    connection::{ConnectionId, Context, Payload, Transport},
    error::{PipelineError, Result},
    http::HandshakeRequest,
    metrics::{self, Direction},
};

struct FrameState<D> {
    decoder: D,
    buffer: BytesMut,
}

/// Transport adapter encoding every outbound payload.
struct FramedTransport<'a, E> {
    inner: &'a mut dyn Transport,
    encoder: &'a mut E,
}

impl<E> Transport for FramedTransport<'_, E>
where
    E: Encoder<Payload, Error = std::io::Error>,
{
    fn send(&mut self, id: ConnectionId, payload: Payload) {
        let mut dst = BytesMut::new();
        match self.encoder.encode(payload, &mut dst) {
            Ok(()) => {
                metrics::inc_messages(Direction::Outbound);
                self.inner.send(id, Payload::Binary(dst.freeze()));
            }
            Err(error) => {
                let error = classify(error);
                warn!(connection = %id, error = %error, "outbound message dropped");
                metrics::inc_errors(error.kind());
            }
        }
    }

    fn close(&mut self, id: ConnectionId) { self.inner.close(id); }

    fn is_closing(&self, id: ConnectionId) -> bool { self.inner.is_closing(id) }
}

/// Decodes inbound chunks into messages for the inner component.
pub struct FramingStage<C, K: MessageCodec> {
    inner: C,
    codec: K,
    encoder: K::Encoder,
    connections: HashMap<ConnectionId, FrameState<K::Decoder>>,
}

impl<C: Component, K: MessageCodec> FramingStage<C, K> {
    /// Frame messages for `inner` using `codec`.
    pub fn new(inner: C, codec: K) -> Self {
        Self {
            encoder: codec.encoder(),
            inner,
            codec,
            connections: HashMap::new(),
        }
    }

    /// Borrow the inner component.
    pub fn inner(&self) -> &C { &self.inner }

    /// Bytes buffered for `id` that do not yet form a whole message.
    pub fn buffered(&self, id: ConnectionId) -> usize {
        self.connections.get(&id).map_or(0, |state| state.buffer.len())
    }
}

impl<C: Component, K: MessageCodec> Component for FramingStage<C, K> {
    fn on_open(&mut self, ctx: &mut Context<'_>, request: &HandshakeRequest) -> Result<()> {
        if let Some(response) = self.codec.handshake_response(request) {
            ctx.send(Payload::Binary(response));
        }
        let id = ctx.id();
        let mut framed = FramedTransport {
            inner: ctx.transport(),
            encoder: &mut self.encoder,
        };
        self.inner.on_open(&mut Context::new(id, &mut framed), request)?;
        self.connections.insert(
            id,
            FrameState {
                decoder: self.codec.decoder(),
                buffer: BytesMut::new(),
            },
        );
        Ok(())
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, payload: Payload) -> Result<()> {
        let id = ctx.id();
        let Self {
            inner,
            encoder,
            connections,
            ..
        } = self;
        let Some(state) = connections.get_mut(&id) else {
            return Ok(());
        };
        state.buffer.extend_from_slice(payload.as_bytes());
        let mut framed = FramedTransport {
            inner: ctx.transport(),
            encoder,
        };
        let mut inner_ctx = Context::new(id, &mut framed);
        while !inner_ctx.is_closing() {
            let Some(message) = state.decoder.decode(&mut state.buffer).map_err(classify)? else {
                break;
            };
            trace!(connection = %id, len = message.len(), "message decoded");
            metrics::inc_messages(Direction::Inbound);
            inner.on_message(&mut inner_ctx, message)?;
        }
        Ok(())
    }

    fn on_close(&mut self, ctx: &mut Context<'_>) {
        if self.connections.remove(&ctx.id()).is_none() {
            return;
        }
        let id = ctx.id();
        let mut framed = FramedTransport {
            inner: ctx.transport(),
            encoder: &mut self.encoder,
        };
        self.inner.on_close(&mut Context::new(id, &mut framed));
    }

    fn on_error(&mut self, ctx: &mut Context<'_>, error: &PipelineError) {
        if !self.connections.contains_key(&ctx.id()) {
            return;
        }
        let id = ctx.id();
        let mut framed = FramedTransport {
            inner: ctx.transport(),
            encoder: &mut self.encoder,
        };
        self.inner.on_error(&mut Context::new(id, &mut framed), error);
    }
}
