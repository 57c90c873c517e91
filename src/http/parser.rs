//! Bounded incremental parser for the handshake header block.
//!
//! Bytes are appended to a per-connection [`HeaderBuffer`] until the first
//! header terminator appears. The parser then validates the request line and
//! headers and hands back any bytes that followed the terminator so the next
//! stage can consume them. Accumulation is capped: a client that never
//! finishes its headers trips [`HandshakeError::Overflow`] once the cap is
//! exceeded.

use bytes::{Bytes, BytesMut};

use super::request::{HandshakeRequest, HeaderMap, HttpVersion};
use crate::{
    config::{DEFAULT_MAX_HEADER_BYTES, TerminatorPolicy},
    error::HandshakeError,
};

/// Outcome of feeding a chunk to the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// More bytes are required.
    Incomplete,
    /// The header block is complete.
    Complete {
        /// The parsed request.
        request: HandshakeRequest,
        /// Bytes received after the terminator.
        leftover: Bytes,
    },
}

/// Per-connection accumulation state.
#[derive(Debug, Default)]
pub struct HeaderBuffer {
    buf: BytesMut,
    poisoned: bool,
}

impl HeaderBuffer {
    /// Number of bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Returns `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Returns `true` once the buffer has overflowed.
    #[must_use]
    pub fn is_poisoned(&self) -> bool { self.poisoned }
}

/// Stateless parser configuration shared by every connection.
#[derive(Clone, Copy, Debug)]
pub struct HeaderParser {
    max_bytes: usize,
    policy: TerminatorPolicy,
}

impl Default for HeaderParser {
    fn default() -> Self { Self::new(DEFAULT_MAX_HEADER_BYTES, TerminatorPolicy::default()) }
}

impl HeaderParser {
    /// Create a parser bounded to `max_bytes` of header data.
    #[must_use]
    pub fn new(max_bytes: usize, policy: TerminatorPolicy) -> Self { Self { max_bytes, policy } }

    /// Maximum header block size accepted.
    #[must_use]
    pub fn max_bytes(&self) -> usize { self.max_bytes }

    /// Append `chunk` to `buffer` and try to complete the request.
    ///
    /// The outcome does not depend on how the input was split into chunks.
    /// Once a buffer has overflowed it is poisoned: later chunks are
    /// discarded and reported as [`ParseStatus::Incomplete`].
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Overflow`] the first time the header block
    /// exceeds the bound and [`HandshakeError::Malformed`] if the completed
    /// block is not a valid request.
    pub fn feed(
        &self,
        buffer: &mut HeaderBuffer,
        chunk: &[u8],
    ) -> Result<ParseStatus, HandshakeError> {
        if buffer.poisoned {
            return Ok(ParseStatus::Incomplete);
        }
        // Only the tail that could complete a terminator needs rescanning.
        let rescan_from = buffer.buf.len().saturating_sub(3);
        buffer.buf.extend_from_slice(chunk);

        let Some(end) = self.find_terminator(&buffer.buf, rescan_from) else {
            if buffer.buf.len() > self.max_bytes {
                return Err(self.poison(buffer));
            }
            return Ok(ParseStatus::Incomplete);
        };
        if end > self.max_bytes {
            return Err(self.poison(buffer));
        }

        let head = buffer.buf.split_to(end).freeze();
        let leftover = std::mem::take(&mut buffer.buf).freeze();
        let request = parse_head(&head)?;
        Ok(ParseStatus::Complete { request, leftover })
    }

    fn poison(&self, buffer: &mut HeaderBuffer) -> HandshakeError {
        buffer.poisoned = true;
        buffer.buf = BytesMut::new();
        HandshakeError::Overflow {
            limit: self.max_bytes,
        }
    }

    /// Returns the end offset of the earliest-ending terminator.
    fn find_terminator(&self, buf: &[u8], from: usize) -> Option<usize> {
        self.policy
            .terminators()
            .iter()
            .filter_map(|term| {
                buf.get(from..)?
                    .windows(term.len())
                    .position(|window| window == *term)
                    .map(|pos| from + pos + term.len())
            })
            .min()
    }
}

/// Parse a complete header block, terminator included.
fn parse_head(head: &[u8]) -> Result<HandshakeRequest, HandshakeError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| HandshakeError::malformed("header block is not valid UTF-8"))?;
    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));

    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| HandshakeError::malformed("missing request line"))?;
    let (method, target, version) = parse_request_line(request_line)?;

    let mut headers = HeaderMap::new();
    for line in lines.take_while(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HandshakeError::malformed(format!("header line without colon: {line:?}")))?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(HandshakeError::malformed(format!("invalid header name {name:?}")));
        }
        headers.append(name, value.trim());
    }

    if version == HttpVersion::Http11 && !headers.contains("Host") {
        return Err(HandshakeError::malformed("HTTP/1.1 request without Host header"));
    }
    Ok(HandshakeRequest::new(method, target, version, headers))
}

fn parse_request_line(line: &str) -> Result<(&str, &str, HttpVersion), HandshakeError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HandshakeError::malformed(format!("invalid request line {line:?}")));
    };
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(HandshakeError::malformed(format!("invalid method {method:?}")));
    }
    if !target.starts_with('/') {
        return Err(HandshakeError::malformed(format!("invalid request target {target:?}")));
    }
    let version = match version {
        "HTTP/1.1" => HttpVersion::Http11,
        "HTTP/1.0" => HttpVersion::Http10,
        other => {
            return Err(HandshakeError::malformed(format!("unsupported version {other:?}")));
        }
    };
    Ok((method, target, version))
}
