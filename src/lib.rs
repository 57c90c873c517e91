#![doc(html_root_url = "https://docs.rs/topicwire/latest")]
//! Public API for the `topicwire` library.
//!
//! `topicwire` serves a publish/subscribe and remote-call sub-protocol over
//! framed TCP connections. Connection handling is split into small
//! [`Component`] stages composed by decoration: a handshake root buffers
//! the upgrade request, a router picks a stack by path, an origin guard
//! vetoes foreign clients, a framing stage turns bytes into messages, and
//! the [`protocol::SubProtocol`] engine dispatches envelopes to an
//! [`protocol::Application`].
//!
//! The stages are free of I/O. [`server::TopicServer`] drives an assembled
//! pipeline on Tokio.

pub mod app;
pub mod codec;
pub mod component;
pub mod config;
pub mod connection;
pub mod error;
pub mod framing;
pub mod http;
pub mod metrics;
pub mod panic;
pub mod protocol;
pub mod server;

pub use app::{App, Pipeline};
pub use codec::{LengthDelimitedMessageCodec, MessageCodec};
pub use component::Component;
pub use config::{ConfigError, PipelineConfig, TerminatorPolicy};
pub use connection::{ConnectionId, Context, Payload, Transport};
pub use error::{
    ApplicationError,
    FramingError,
    HandshakeError,
    PipelineError,
    ProtocolViolation,
    Result,
};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, MESSAGES_PROCESSED};
pub use protocol::{AppResult, Application, ErrorAction, Session, SubProtocol};
pub use server::{ServerError, TopicServer};
