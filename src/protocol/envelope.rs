//! Envelope grammar of the sub-protocol.
//!
//! Every message is a JSON array whose first element is an integer tag.
//! Inbound envelopes are decoded into [`ClientMessage`] in one explicit
//! step; any deviation from the grammar is reported as a
//! [`ProtocolViolation`]. Outbound envelopes are built by the free
//! functions in this module.

use serde_json::{Map, Value, json};

use crate::error::ProtocolViolation;

/// Version advertised in the WELCOME envelope.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Server greeting.
    Welcome = 0,
    /// CURIE prefix registration.
    Prefix = 1,
    /// Remote procedure call.
    Call = 2,
    /// Successful call outcome.
    CallResult = 3,
    /// Failed call outcome.
    CallError = 4,
    /// Topic subscription.
    Subscribe = 5,
    /// Topic unsubscription.
    Unsubscribe = 6,
    /// Client publication.
    Publish = 7,
    /// Server event delivery.
    Event = 8,
}

impl MessageType {
    /// Map a wire tag to its message type.
    #[must_use]
    pub fn from_tag(tag: i64) -> Option<Self> {
        Some(match tag {
            0 => Self::Welcome,
            1 => Self::Prefix,
            2 => Self::Call,
            3 => Self::CallResult,
            4 => Self::CallError,
            5 => Self::Subscribe,
            6 => Self::Unsubscribe,
            7 => Self::Publish,
            8 => Self::Event,
            _ => return None,
        })
    }

    /// Wire tag of this message type.
    #[must_use]
    pub fn tag(self) -> u8 { self as u8 }

    /// Returns `true` for types only the server may send.
    #[must_use]
    pub fn is_server_only(self) -> bool {
        matches!(
            self,
            Self::Welcome | Self::CallResult | Self::CallError | Self::Event
        )
    }
}

/// Arguments of a CALL.
#[derive(Clone, Debug, PartialEq)]
pub enum Arguments {
    /// Values in call order.
    Positional(Vec<Value>),
    /// A single object argument keyed by parameter name.
    Named(Map<String, Value>),
}

impl Arguments {
    fn from_trailing(mut values: Vec<Value>) -> Self {
        if values.len() == 1 {
            match values.pop() {
                Some(Value::Array(items)) => return Self::Positional(items),
                Some(Value::Object(map)) => return Self::Named(map),
                Some(other) => values.push(other),
                None => {}
            }
        }
        Self::Positional(values)
    }

    /// Number of arguments supplied.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(map) => map.len(),
        }
    }

    /// Returns `true` when no arguments were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Positional arguments, if the call used them.
    #[must_use]
    pub fn positional(&self) -> Option<&[Value]> {
        match self {
            Self::Positional(values) => Some(values),
            Self::Named(_) => None,
        }
    }

    /// Named arguments, if the call used them.
    #[must_use]
    pub fn named(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Named(map) => Some(map),
            Self::Positional(_) => None,
        }
    }
}

/// Who a publication must not reach, as sent by the client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Exclude {
    /// Deliver to every eligible subscriber.
    #[default]
    Nobody,
    /// Skip the publishing session.
    Publisher,
    /// Skip the listed session identifiers.
    Sessions(Vec<String>),
}

/// A decoded client-to-server envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// `[1, prefix, uri]`
    Prefix {
        /// Short prefix.
        prefix: String,
        /// URI the prefix expands to.
        uri: String,
    },
    /// `[2, callId, procURI, ...args]`
    Call {
        /// Client-chosen correlation identifier.
        call_id: String,
        /// Procedure URI, possibly a CURIE.
        proc_uri: String,
        /// Call arguments.
        args: Arguments,
    },
    /// `[5, topicURI]`
    Subscribe {
        /// Topic URI, possibly a CURIE.
        topic: String,
    },
    /// `[6, topicURI]`
    Unsubscribe {
        /// Topic URI, possibly a CURIE.
        topic: String,
    },
    /// `[7, topicURI, event, exclude?, eligible?]`
    Publish {
        /// Topic URI, possibly a CURIE.
        topic: String,
        /// Event body.
        event: Value,
        /// Sessions to skip.
        exclude: Exclude,
        /// Sessions allowed to receive the event; `None` means everyone.
        eligible: Option<Vec<String>>,
    },
}

impl ClientMessage {
    /// Decode an inbound text envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolViolation`] describing the first deviation from
    /// the envelope grammar.
    pub fn decode(text: &str) -> Result<Self, ProtocolViolation> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolViolation::NotJson(e.to_string()))?;
        let Value::Array(items) = value else {
            return Err(ProtocolViolation::NotAnArray);
        };
        let mut fields = items.into_iter();
        let tag = fields
            .next()
            .and_then(|tag| tag.as_i64())
            .ok_or(ProtocolViolation::MissingTag)?;
        let kind = MessageType::from_tag(tag).ok_or(ProtocolViolation::UnknownTag(tag))?;
        if kind.is_server_only() {
            return Err(ProtocolViolation::ServerOnlyTag(kind.tag()));
        }
        let mut fields = Fields {
            tag: kind.tag(),
            rest: fields,
        };
        match kind {
            MessageType::Prefix => Ok(Self::Prefix {
                prefix: fields.string("prefix")?,
                uri: fields.string("uri")?,
            }),
            MessageType::Call => Ok(Self::Call {
                call_id: fields.string("callID")?,
                proc_uri: fields.string("procURI")?,
                args: Arguments::from_trailing(fields.rest.collect()),
            }),
            MessageType::Subscribe => Ok(Self::Subscribe {
                topic: fields.string("topicURI")?,
            }),
            MessageType::Unsubscribe => Ok(Self::Unsubscribe {
                topic: fields.string("topicURI")?,
            }),
            MessageType::Publish => Ok(Self::Publish {
                topic: fields.string("topicURI")?,
                event: fields.required("event")?,
                exclude: fields.exclude()?,
                eligible: fields.eligible()?,
            }),
            MessageType::Welcome
            | MessageType::CallResult
            | MessageType::CallError
            | MessageType::Event => Err(ProtocolViolation::ServerOnlyTag(kind.tag())),
        }
    }
}

struct Fields<I> {
    tag: u8,
    rest: I,
}

impl<I: Iterator<Item = Value>> Fields<I> {
    fn required(&mut self, field: &'static str) -> Result<Value, ProtocolViolation> {
        self.rest.next().ok_or(ProtocolViolation::MissingField {
            tag: self.tag,
            field,
        })
    }

    fn string(&mut self, field: &'static str) -> Result<String, ProtocolViolation> {
        match self.required(field)? {
            Value::String(text) => Ok(text),
            _ => Err(self.invalid(field)),
        }
    }

    fn exclude(&mut self) -> Result<Exclude, ProtocolViolation> {
        match self.rest.next() {
            None | Some(Value::Null | Value::Bool(false)) => Ok(Exclude::Nobody),
            Some(Value::Bool(true)) => Ok(Exclude::Publisher),
            Some(Value::Array(items)) => self
                .session_list(items, "exclude")
                .map(Exclude::Sessions),
            Some(_) => Err(self.invalid("exclude")),
        }
    }

    fn eligible(&mut self) -> Result<Option<Vec<String>>, ProtocolViolation> {
        match self.rest.next() {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => {
                let sessions = self.session_list(items, "eligible")?;
                Ok((!sessions.is_empty()).then_some(sessions))
            }
            Some(_) => Err(self.invalid("eligible")),
        }
    }

    fn session_list(
        &self,
        items: Vec<Value>,
        field: &'static str,
    ) -> Result<Vec<String>, ProtocolViolation> {
        items
            .into_iter()
            .map(|item| match item {
                Value::String(session) => Ok(session),
                _ => Err(self.invalid(field)),
            })
            .collect()
    }

    fn invalid(&self, field: &'static str) -> ProtocolViolation {
        ProtocolViolation::InvalidField {
            tag: self.tag,
            field,
        }
    }
}

/// `[0, sessionId, 1, serverIdent]`
#[must_use]
pub fn welcome(session_id: &str, server_ident: &str) -> String {
    json!([MessageType::Welcome.tag(), session_id, PROTOCOL_VERSION, server_ident]).to_string()
}

/// `[1, prefix, uri]`
#[must_use]
pub fn prefix(prefix: &str, uri: &str) -> String {
    json!([MessageType::Prefix.tag(), prefix, uri]).to_string()
}

/// `[3, callId, result]`
#[must_use]
pub fn call_result(call_id: &str, result: &Value) -> String {
    json!([MessageType::CallResult.tag(), call_id, result]).to_string()
}

/// `[4, callId, errorURI, errorDesc]` or, with details,
/// `[4, callId, errorURI, errorDesc, errorDetails]`.
#[must_use]
pub fn call_error(call_id: &str, error_uri: &str, description: &str, details: Option<&Value>) -> String {
    let tag = MessageType::CallError.tag();
    match details {
        Some(details) => json!([tag, call_id, error_uri, description, details]),
        None => json!([tag, call_id, error_uri, description]),
    }
    .to_string()
}

/// `[8, topicURI, event]`
#[must_use]
pub fn event(topic: &str, event: &Value) -> String {
    json!([MessageType::Event.tag(), topic, event]).to_string()
}
