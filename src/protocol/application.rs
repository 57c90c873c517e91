//! The application collaborator driven by the sub-protocol engine.

use serde_json::Value;

use super::{envelope::Arguments, session::Session};
use crate::{
    connection::ConnectionId,
    error::{ApplicationError, PipelineError},
};

/// Result type returned by application callbacks.
pub type AppResult = Result<(), ApplicationError>;

/// What the engine does after an application error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorAction {
    /// Close the connection.
    #[default]
    Close,
    /// Keep the connection open.
    Continue,
}

/// Callbacks implemented by an RPC and pub/sub application.
///
/// URIs handed to callbacks are already resolved against the session's
/// prefix table. Subscription bookkeeping happens before
/// [`on_subscribe`](Self::on_subscribe) and
/// [`on_unsubscribe`](Self::on_unsubscribe) run, and neither fires for a
/// request that does not change membership.
pub trait Application: Send {
    /// A session was welcomed.
    ///
    /// # Errors
    ///
    /// An error is passed to [`on_error`](Self::on_error).
    fn on_session_start(&mut self, _session: &mut Session<'_>) -> AppResult { Ok(()) }

    /// The client invoked `proc_uri`.
    ///
    /// # Errors
    ///
    /// An error is passed to [`on_error`](Self::on_error).
    fn on_call(
        &mut self,
        session: &mut Session<'_>,
        call_id: &str,
        proc_uri: &str,
        args: Arguments,
    ) -> AppResult;

    /// The client joined `topic`.
    ///
    /// # Errors
    ///
    /// An error is passed to [`on_error`](Self::on_error).
    fn on_subscribe(&mut self, _session: &mut Session<'_>, _topic: &str) -> AppResult { Ok(()) }

    /// The client left `topic`.
    ///
    /// # Errors
    ///
    /// An error is passed to [`on_error`](Self::on_error).
    fn on_unsubscribe(&mut self, _session: &mut Session<'_>, _topic: &str) -> AppResult { Ok(()) }

    /// The client published `event` on `topic`.
    ///
    /// `exclude` lists session ids to skip, already including the
    /// publisher's own when it asked to be excluded. `eligible`, when
    /// present, restricts delivery to the listed sessions.
    ///
    /// # Errors
    ///
    /// An error is passed to [`on_error`](Self::on_error).
    fn on_publish(
        &mut self,
        session: &mut Session<'_>,
        topic: &str,
        event: Value,
        exclude: &[String],
        eligible: Option<&[String]>,
    ) -> AppResult;

    /// The connection closed. Topic memberships are released afterwards.
    fn on_close(&mut self, _id: ConnectionId) {}

    /// A callback or the transport failed.
    ///
    /// The returned action is honoured for application errors; transport
    /// errors always close the connection.
    fn on_error(&mut self, _id: ConnectionId, _error: &PipelineError) -> ErrorAction {
        ErrorAction::Close
    }
}
