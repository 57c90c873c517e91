//! Handshake layer: header parsing, origin checks and routing.
//!
//! The [`HandshakeServer`] sits at the root of every pipeline. It turns raw
//! byte chunks into a [`HandshakeRequest`] and then hands the connection to
//! its inner chain, typically an [`OriginGuard`] wrapping a [`Router`].

mod origin;
pub mod parser;
mod request;
mod router;
mod server;

use bytes::Bytes;

pub use origin::OriginGuard;
pub use parser::{HeaderBuffer, HeaderParser, ParseStatus};
pub use request::{HandshakeRequest, HeaderMap, HttpVersion};
pub use router::Router;
pub use server::HandshakeServer;

/// Minimal HTTP response used to refuse a handshake.
pub(crate) fn response(status: u16, reason: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 {status} {reason}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
    ))
}
