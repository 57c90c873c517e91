//! The sub-protocol engine component.

use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use super::{
    application::{Application, ErrorAction},
    envelope::{self, ClientMessage, Exclude},
    session::{Session, SessionState},
    topic::TopicRegistry,
};
use crate::{
    component::Component,
    connection::{ConnectionId, Context, Payload},
    error::{ApplicationError, PipelineError, ProtocolViolation, Result},
    http::HandshakeRequest,
};

/// Speaks the RPC and pub/sub envelope protocol on behalf of an
/// [`Application`].
///
/// On open the engine assigns a session identifier and sends WELCOME before
/// the application hears of the session. Every inbound message is decoded
/// in full before any callback runs; a malformed message closes the
/// connection without reaching the application.
pub struct SubProtocol<A> {
    app: A,
    server_ident: String,
    sessions: HashMap<ConnectionId, SessionState>,
    topics: TopicRegistry,
}

impl<A: Application> SubProtocol<A> {
    /// Serve `app` with the default server identifier.
    pub fn new(app: A) -> Self {
        Self::with_server_ident(app, crate::config::PipelineConfig::default().server_ident)
    }

    /// Serve `app`, advertising `server_ident` in WELCOME.
    pub fn with_server_ident(app: A, server_ident: impl Into<String>) -> Self {
        Self {
            app,
            server_ident: server_ident.into(),
            sessions: HashMap::new(),
            topics: TopicRegistry::new(),
        }
    }

    /// Borrow the application.
    pub fn app(&self) -> &A { &self.app }

    /// Mutably borrow the application.
    pub fn app_mut(&mut self) -> &mut A { &mut self.app }

    /// Topic membership across all sessions.
    pub fn topics(&self) -> &TopicRegistry { &self.topics }

    /// Session state of `id`, if it has been welcomed.
    pub fn session(&self, id: ConnectionId) -> Option<&SessionState> { self.sessions.get(&id) }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize { self.sessions.len() }

    /// Route an application failure through `on_error`.
    fn recover(&mut self, id: ConnectionId, result: std::result::Result<(), ApplicationError>) -> Result<()> {
        let Err(error) = result else {
            return Ok(());
        };
        let error = PipelineError::from(error);
        match self.app.on_error(id, &error) {
            ErrorAction::Continue => {
                debug!(connection = %id, error = %error, "application recovered");
                Ok(())
            }
            ErrorAction::Close => Err(error),
        }
    }

    fn dispatch(&mut self, ctx: &mut Context<'_>, message: ClientMessage) -> Result<()> {
        let id = ctx.id();
        let Self {
            app,
            sessions,
            topics,
            ..
        } = self;
        let Some(state) = sessions.get_mut(&id) else {
            return Ok(());
        };
        let result = match message {
            ClientMessage::Prefix { prefix, uri } => {
                debug!(connection = %id, prefix = %prefix, uri = %uri, "prefix registered");
                state.prefixes_mut().insert(prefix, uri);
                Ok(())
            }
            ClientMessage::Call {
                call_id,
                proc_uri,
                args,
            } => {
                let proc_uri = state.prefixes().resolve(&proc_uri).into_owned();
                let mut session = Session::new(id, ctx.transport(), state, topics);
                app.on_call(&mut session, &call_id, &proc_uri, args)
            }
            ClientMessage::Subscribe { topic } => {
                let topic = state.prefixes().resolve(&topic).into_owned();
                if topics.subscribe(&topic, id, state.session_id()) {
                    debug!(connection = %id, topic = %topic, "subscribed");
                    let mut session = Session::new(id, ctx.transport(), state, topics);
                    app.on_subscribe(&mut session, &topic)
                } else {
                    Ok(())
                }
            }
            ClientMessage::Unsubscribe { topic } => {
                let topic = state.prefixes().resolve(&topic).into_owned();
                if topics.unsubscribe(&topic, id) {
                    debug!(connection = %id, topic = %topic, "unsubscribed");
                    let mut session = Session::new(id, ctx.transport(), state, topics);
                    app.on_unsubscribe(&mut session, &topic)
                } else {
                    Ok(())
                }
            }
            ClientMessage::Publish {
                topic,
                event,
                exclude,
                eligible,
            } => {
                let topic = state.prefixes().resolve(&topic).into_owned();
                let exclude = match exclude {
                    Exclude::Nobody => Vec::new(),
                    Exclude::Publisher => vec![state.session_id().to_owned()],
                    Exclude::Sessions(sessions) => sessions,
                };
                let mut session = Session::new(id, ctx.transport(), state, topics);
                app.on_publish(&mut session, &topic, event, &exclude, eligible.as_deref())
            }
        };
        self.recover(id, result)
    }
}

fn message_text(payload: Payload) -> std::result::Result<String, ProtocolViolation> {
    match payload {
        Payload::Text(text) => Ok(text),
        Payload::Binary(bytes) => {
            String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolViolation::NotText)
        }
    }
}

impl<A: Application> Component for SubProtocol<A> {
    fn on_open(&mut self, ctx: &mut Context<'_>, _request: &HandshakeRequest) -> Result<()> {
        let id = ctx.id();
        let mut state = SessionState::new(Uuid::new_v4().to_string());
        ctx.send(envelope::welcome(state.session_id(), &self.server_ident));
        info!(connection = %id, session = state.session_id(), "session started");
        let result = {
            let mut session = Session::new(id, ctx.transport(), &mut state, &self.topics);
            self.app.on_session_start(&mut session)
        };
        self.sessions.insert(id, state);
        if let Err(error) = self.recover(id, result) {
            self.sessions.remove(&id);
            self.topics.remove_connection(id);
            self.app.on_close(id);
            return Err(error);
        }
        Ok(())
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, payload: Payload) -> Result<()> {
        if !self.sessions.contains_key(&ctx.id()) {
            return Ok(());
        }
        let message = message_text(payload).and_then(|text| ClientMessage::decode(&text));
        match message {
            Ok(message) => self.dispatch(ctx, message),
            Err(violation) => {
                debug!(connection = %ctx.id(), error = %violation, "protocol violation");
                Err(violation.into())
            }
        }
    }

    fn on_close(&mut self, ctx: &mut Context<'_>) {
        let id = ctx.id();
        if self.sessions.remove(&id).is_none() {
            return;
        }
        self.app.on_close(id);
        let left = self.topics.remove_connection(id);
        debug!(connection = %id, topics = left.len(), "session closed");
    }

    fn on_error(&mut self, ctx: &mut Context<'_>, error: &PipelineError) {
        let id = ctx.id();
        if !self.sessions.contains_key(&id) {
            return;
        }
        // Errors reaching this hook come from below the engine; the root
        // closes the connection whichever action the application picks.
        match self.app.on_error(id, error) {
            ErrorAction::Close => debug!(connection = %id, %error, "closing after failure"),
            ErrorAction::Continue => {
                debug!(connection = %id, %error, "failure cannot be continued past; closing");
            }
        }
    }
}
