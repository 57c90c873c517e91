//! The capability interface shared by every pipeline stage.
//!
//! Stages are composed by ownership: a decorator holds its inner stage and
//! forwards each event explicitly, optionally transforming it or vetoing it.
//! The chain is linear, so the order of wrapping is the order in which events
//! are seen.

use crate::{
    connection::{Context, Payload},
    error::{PipelineError, Result},
    http::HandshakeRequest,
};

/// A stage of the decoration pipeline.
///
/// Every callback runs to completion before the next event is delivered, so
/// implementations may mutate their per-connection records freely.
pub trait Component: Send {
    /// A connection completed its handshake.
    ///
    /// # Errors
    ///
    /// Returning an error closes the connection. A stage that fails here
    /// keeps no state for the connection and sees no further events for it.
    fn on_open(&mut self, ctx: &mut Context<'_>, request: &HandshakeRequest) -> Result<()>;

    /// A payload arrived on an open connection.
    ///
    /// # Errors
    ///
    /// Returning an error closes the connection.
    fn on_message(&mut self, ctx: &mut Context<'_>, payload: Payload) -> Result<()>;

    /// The connection closed. Called at most once per opened connection.
    fn on_close(&mut self, ctx: &mut Context<'_>);

    /// The connection failed. The connection is closed afterwards.
    fn on_error(&mut self, ctx: &mut Context<'_>, error: &PipelineError);
}

impl<C: Component + ?Sized> Component for Box<C> {
    fn on_open(&mut self, ctx: &mut Context<'_>, request: &HandshakeRequest) -> Result<()> {
        (**self).on_open(ctx, request)
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, payload: Payload) -> Result<()> {
        (**self).on_message(ctx, payload)
    }

    fn on_close(&mut self, ctx: &mut Context<'_>) { (**self).on_close(ctx); }

    fn on_error(&mut self, ctx: &mut Context<'_>, error: &PipelineError) {
        (**self).on_error(ctx, error);
    }
}
