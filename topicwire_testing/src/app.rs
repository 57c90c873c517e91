//! An application that records its callbacks.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use topicwire::{
    AppResult,
    Application,
    ApplicationError,
    ConnectionId,
    ErrorAction,
    PipelineError,
    Session,
    protocol::Arguments,
};

/// A callback observed by [`ScriptedApp`].
#[derive(Clone, Debug, PartialEq)]
pub enum AppEvent {
    /// `on_session_start`.
    SessionStart { id: ConnectionId, session_id: String },
    /// `on_call`, with the resolved procedure URI.
    Call {
        id: ConnectionId,
        call_id: String,
        proc_uri: String,
        args: Arguments,
    },
    /// `on_subscribe`.
    Subscribe { id: ConnectionId, topic: String },
    /// `on_unsubscribe`.
    Unsubscribe { id: ConnectionId, topic: String },
    /// `on_publish`.
    Publish {
        id: ConnectionId,
        topic: String,
        event: Value,
        exclude: Vec<String>,
        eligible: Option<Vec<String>>,
    },
    /// `on_close`.
    Close(ConnectionId),
    /// `on_error`, with the error's kind label.
    Error { id: ConnectionId, kind: &'static str },
}

/// Records every callback and answers with fixed behaviour.
///
/// Calls are answered with their arguments, except procedures ending in
/// `#fail`, which return an application error, and procedures ending in
/// `#kick`, which close the caller's connection. Publishes are relayed to the
/// topic's subscribers. Clones share one event log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedApp {
    events: Arc<Mutex<Vec<AppEvent>>>,
    on_error: ErrorAction,
}

impl ScriptedApp {
    /// Create an app that closes connections on error.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Use `action` for every application error.
    #[must_use]
    pub fn on_error_action(mut self, action: ErrorAction) -> Self {
        self.on_error = action;
        self
    }

    /// Snapshot of the recorded events.
    ///
    /// # Panics
    ///
    /// Panics if another thread panicked while recording.
    #[must_use]
    pub fn events(&self) -> Vec<AppEvent> { self.lock().clone() }

    /// Forget recorded events.
    pub fn clear(&self) { self.lock().clear(); }

    fn lock(&self) -> MutexGuard<'_, Vec<AppEvent>> { self.events.lock().expect("event log poisoned") }

    fn record(&self, event: AppEvent) { self.lock().push(event); }
}

impl Application for ScriptedApp {
    fn on_session_start(&mut self, session: &mut Session<'_>) -> AppResult {
        self.record(AppEvent::SessionStart {
            id: session.id(),
            session_id: session.session_id().to_owned(),
        });
        Ok(())
    }

    fn on_call(
        &mut self,
        session: &mut Session<'_>,
        call_id: &str,
        proc_uri: &str,
        args: Arguments,
    ) -> AppResult {
        self.record(AppEvent::Call {
            id: session.id(),
            call_id: call_id.to_owned(),
            proc_uri: proc_uri.to_owned(),
            args: args.clone(),
        });
        if proc_uri.ends_with("#fail") {
            return Err(ApplicationError::new(format!("{proc_uri} failed")));
        }
        if proc_uri.ends_with("#kick") {
            session.close();
            return Ok(());
        }
        let result = match args {
            Arguments::Positional(values) => Value::Array(values),
            Arguments::Named(map) => Value::Object(map),
        };
        session.call_result(call_id, &result);
        Ok(())
    }

    fn on_subscribe(&mut self, session: &mut Session<'_>, topic: &str) -> AppResult {
        self.record(AppEvent::Subscribe {
            id: session.id(),
            topic: topic.to_owned(),
        });
        Ok(())
    }

    fn on_unsubscribe(&mut self, session: &mut Session<'_>, topic: &str) -> AppResult {
        self.record(AppEvent::Unsubscribe {
            id: session.id(),
            topic: topic.to_owned(),
        });
        Ok(())
    }

    fn on_publish(
        &mut self,
        session: &mut Session<'_>,
        topic: &str,
        event: Value,
        exclude: &[String],
        eligible: Option<&[String]>,
    ) -> AppResult {
        session.broadcast(topic, &event, exclude, eligible);
        self.record(AppEvent::Publish {
            id: session.id(),
            topic: topic.to_owned(),
            event,
            exclude: exclude.to_vec(),
            eligible: eligible.map(<[String]>::to_vec),
        });
        Ok(())
    }

    fn on_close(&mut self, id: ConnectionId) { self.record(AppEvent::Close(id)); }

    fn on_error(&mut self, id: ConnectionId, error: &PipelineError) -> ErrorAction {
        self.record(AppEvent::Error {
            id,
            kind: error.kind(),
        });
        self.on_error
    }
}
