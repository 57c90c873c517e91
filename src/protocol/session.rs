//! Per-connection session state and the handle given to applications.

use std::borrow::Cow;

use serde_json::Value;

use super::{envelope, topic::TopicRegistry, uri::PrefixTable};
use crate::connection::{ConnectionId, Payload, Transport};

/// State the engine keeps for each welcomed connection.
#[derive(Clone, Debug)]
pub struct SessionState {
    session_id: String,
    prefixes: PrefixTable,
}

impl SessionState {
    /// Create state for a freshly assigned session identifier.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prefixes: PrefixTable::new(),
        }
    }

    /// Identifier sent to the client in WELCOME.
    #[must_use]
    pub fn session_id(&self) -> &str { &self.session_id }

    /// Prefixes registered on this session.
    #[must_use]
    pub fn prefixes(&self) -> &PrefixTable { &self.prefixes }

    pub(crate) fn prefixes_mut(&mut self) -> &mut PrefixTable { &mut self.prefixes }
}

/// A live session as seen from application callbacks.
///
/// Replies go to the connection that triggered the callback; broadcasts
/// reach any subscriber through the shared transport.
pub struct Session<'a> {
    id: ConnectionId,
    transport: &'a mut dyn Transport,
    state: &'a mut SessionState,
    topics: &'a TopicRegistry,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        id: ConnectionId,
        transport: &'a mut dyn Transport,
        state: &'a mut SessionState,
        topics: &'a TopicRegistry,
    ) -> Self {
        Self {
            id,
            transport,
            state,
            topics,
        }
    }

    /// Connection this session runs on.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Session identifier announced in WELCOME.
    #[must_use]
    pub fn session_id(&self) -> &str { self.state.session_id() }

    /// Expand a CURIE against this session's prefixes.
    #[must_use]
    pub fn resolve<'u>(&self, uri: &'u str) -> Cow<'u, str> { self.state.prefixes.resolve(uri) }

    /// Answer a call successfully.
    pub fn call_result(&mut self, call_id: &str, result: &Value) {
        self.send(envelope::call_result(call_id, result));
    }

    /// Answer a call with an error. `details` is omitted from the envelope
    /// when `None`.
    pub fn call_error(
        &mut self,
        call_id: &str,
        error_uri: &str,
        description: &str,
        details: Option<&Value>,
    ) {
        self.send(envelope::call_error(call_id, error_uri, description, details));
    }

    /// Deliver an event on `topic` to this connection only.
    pub fn event(&mut self, topic: &str, event: &Value) { self.send(envelope::event(topic, event)); }

    /// Announce a prefix to the client and record it locally.
    pub fn prefix(&mut self, prefix: &str, uri: &str) {
        self.state.prefixes.insert(prefix, uri);
        self.send(envelope::prefix(prefix, uri));
    }

    /// Publish `event` to the subscribers of `topic`.
    ///
    /// See [`TopicRegistry::broadcast`] for the filtering rules. Returns the
    /// number of recipients.
    pub fn broadcast(
        &mut self,
        topic: &str,
        event: &Value,
        exclude: &[String],
        eligible: Option<&[String]>,
    ) -> usize {
        self.topics
            .broadcast(&mut *self.transport, topic, event, exclude, eligible)
    }

    /// Read-only view of topic membership.
    #[must_use]
    pub fn topics(&self) -> &TopicRegistry { self.topics }

    /// Close this connection once the current event completes.
    pub fn close(&mut self) { self.transport.close(self.id); }

    fn send(&mut self, text: String) { self.transport.send(self.id, Payload::Text(text)); }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("session_id", &self.state.session_id)
            .finish_non_exhaustive()
    }
}
