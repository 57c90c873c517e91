//! RPC and publish/subscribe sub-protocol.
//!
//! The [`SubProtocol`] component speaks a JSON envelope protocol on top of a
//! message-oriented pipeline. Clients may register URI prefixes, call
//! remote procedures and publish to topics; the server welcomes each
//! session, answers calls and fans events out through a [`TopicRegistry`].

pub mod application;
pub mod envelope;
mod engine;
pub mod session;
pub mod topic;
pub mod uri;

pub use application::{AppResult, Application, ErrorAction};
pub use engine::SubProtocol;
pub use envelope::{Arguments, ClientMessage, Exclude, MessageType, PROTOCOL_VERSION};
pub use session::{Session, SessionState};
pub use topic::TopicRegistry;
pub use uri::PrefixTable;
