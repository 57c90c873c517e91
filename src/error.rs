//! Canonical error and result types for the crate.
//!
//! Each pipeline stage reports failures as typed values. The handshake root
//! decides what to do with them: every variant of [`PipelineError`] reaching
//! it is fatal to the connection, and none of them is acknowledged on the
//! wire.

use std::io;

use thiserror::Error;

/// Failures while assembling the handshake request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// Header accumulation exceeded its bound without a terminator.
    #[error("handshake header block exceeds {limit} bytes")]
    Overflow {
        /// Configured maximum header size.
        limit: usize,
    },

    /// A terminator was found but the request could not be parsed.
    #[error("malformed handshake: {reason}")]
    Malformed {
        /// Which part of the request was rejected.
        reason: String,
    },

    /// The `Origin` header was missing or not in the allow-list.
    #[error("origin {origin:?} rejected")]
    OriginRejected {
        /// Origin presented by the client, if any.
        origin: Option<String>,
    },

    /// No route matched the request path and host.
    #[error("no route for {path}")]
    NotFound {
        /// Request path that failed to match.
        path: String,
    },

    /// The handshake used a method other than `GET`.
    #[error("method {method} not allowed")]
    MethodNotAllowed {
        /// Request method presented by the client.
        method: String,
    },
}

impl HandshakeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Inbound envelope that does not satisfy the sub-protocol grammar.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The payload is not well-formed JSON.
    #[error("message is not well-formed JSON: {0}")]
    NotJson(String),

    /// The top-level value is not an array.
    #[error("message is not an array")]
    NotAnArray,

    /// The first element is missing or not an integer.
    #[error("message type is missing or not an integer")]
    MissingTag,

    /// The tag is outside the defined range.
    #[error("unknown message type {0}")]
    UnknownTag(i64),

    /// A server-only message type was sent by a client.
    #[error("message type {0} may only be sent by the server")]
    ServerOnlyTag(u8),

    /// A required field was absent.
    #[error("message type {tag} is missing field {field}")]
    MissingField {
        /// Tag of the offending envelope.
        tag: u8,
        /// Name of the absent field.
        field: &'static str,
    },

    /// A field had the wrong JSON type.
    #[error("message type {tag} has invalid field {field}")]
    InvalidField {
        /// Tag of the offending envelope.
        tag: u8,
        /// Name of the invalid field.
        field: &'static str,
    },

    /// A binary payload arrived where text envelopes are required.
    #[error("message is not valid UTF-8 text")]
    NotText,
}

/// Errors raised by the message framing codec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Frame length prefix indicates a size above the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Size announced or attempted.
        size: usize,
        /// Maximum permitted size.
        max: usize,
    },

    /// A frame carried an unrecognised kind byte.
    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),

    /// A text frame did not contain valid UTF-8.
    #[error("text frame is not valid UTF-8")]
    InvalidUtf8,

    /// Zero-length frame where a kind byte is required.
    #[error("empty frame not permitted")]
    EmptyFrame,
}

/// Failure reported by an application callback.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApplicationError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ApplicationError {
    /// Create an error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause.
    #[must_use]
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Human readable description of the failure.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }
}

/// Top-level error type flowing between pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Handshake could not be completed.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Post-handshake framing failed.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Inbound envelope violated the sub-protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// An application callback failed and did not recover.
    #[error("application error: {0}")]
    Application(#[from] ApplicationError),

    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl PipelineError {
    /// Short label used for logging and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake(HandshakeError::Overflow { .. }) => "overflow",
            Self::Handshake(HandshakeError::Malformed { .. }) => "malformed_handshake",
            Self::Handshake(HandshakeError::OriginRejected { .. }) => "origin_rejected",
            Self::Handshake(HandshakeError::NotFound { .. }) => "not_found",
            Self::Handshake(HandshakeError::MethodNotAllowed { .. }) => "method_not_allowed",
            Self::Framing(_) => "framing",
            Self::Protocol(_) => "protocol_violation",
            Self::Application(_) => "application",
            Self::Transport(_) => "transport",
        }
    }
}

/// Canonical result alias used by pipeline stages.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(HandshakeError::Overflow { limit: 10 }.into(), "overflow")]
    #[case(ProtocolViolation::NotAnArray.into(), "protocol_violation")]
    #[case(FramingError::EmptyFrame.into(), "framing")]
    #[case(io::Error::from(io::ErrorKind::ConnectionReset).into(), "transport")]
    fn kind_labels_variants(#[case] error: PipelineError, #[case] expected: &str) {
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn application_error_keeps_source() {
        let err = ApplicationError::with_source("lookup failed", io::Error::other("disk"));
        assert_eq!(err.to_string(), "lookup failed");
        assert!(err.source().is_some());
    }

    #[test]
    fn violation_messages_name_the_field() {
        let err = ProtocolViolation::InvalidField {
            tag: 5,
            field: "topicURI",
        };
        assert_eq!(err.to_string(), "message type 5 has invalid field topicURI");
    }
}
