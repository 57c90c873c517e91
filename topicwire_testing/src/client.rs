//! A minimal TCP client speaking the default wire format.

use std::{io, net::SocketAddr, time::Duration};

use bytes::BytesMut;
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tokio_util::codec::Decoder;
use topicwire::{LengthDelimitedMessageCodec, MessageCodec, Payload, codec::LengthDelimitedDecoder};

use crate::wire;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Client connection used by end-to-end tests.
pub struct TestClient {
    stream: TcpStream,
    buffer: BytesMut,
    decoder: LengthDelimitedDecoder,
}

impl TestClient {
    /// Connect to `addr` without sending anything.
    ///
    /// # Errors
    ///
    /// Returns any connection error.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            buffer: BytesMut::new(),
            decoder: LengthDelimitedMessageCodec::default().decoder(),
        })
    }

    /// Send a handshake for `path` and return the response head.
    ///
    /// Bytes following the head stay buffered for [`recv`](Self::recv).
    ///
    /// # Errors
    ///
    /// Fails if the server closes before a full head arrives or the read
    /// times out.
    pub async fn handshake(&mut self, path: &str, origin: Option<&str>) -> io::Result<String> {
        self.stream.write_all(&wire::handshake(path, origin)).await?;
        loop {
            let (head, _) = wire::split_response(&self.buffer);
            if head.len() < self.buffer.len() || head.ends_with(b"\r\n\r\n") {
                let head = self.buffer.split_to(head.len());
                return Ok(String::from_utf8_lossy(&head).into_owned());
            }
            if self.fill().await? == 0 {
                let head = self.buffer.split();
                return Ok(String::from_utf8_lossy(&head).into_owned());
            }
        }
    }

    /// Send a JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns any write error.
    pub async fn send(&mut self, envelope: &Value) -> io::Result<()> {
        self.stream.write_all(&wire::envelope(envelope)).await
    }

    /// Send raw bytes.
    ///
    /// # Errors
    ///
    /// Returns any write error.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> { self.stream.write_all(bytes).await }

    /// Receive the next envelope, or `None` once the server closed.
    ///
    /// # Errors
    ///
    /// Fails on a read error, a timeout, or a frame that is not a JSON
    /// envelope.
    pub async fn recv(&mut self) -> io::Result<Option<Value>> {
        loop {
            if let Some(payload) = self.decoder.decode(&mut self.buffer)? {
                let Payload::Text(text) = payload else {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "binary frame"));
                };
                return serde_json::from_str(&text).map(Some).map_err(io::Error::from);
            }
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Wait until the server closes the connection, discarding input.
    ///
    /// # Errors
    ///
    /// Fails on a read error or a timeout.
    pub async fn closed(&mut self) -> io::Result<()> {
        while self.fill().await? != 0 {}
        Ok(())
    }

    async fn fill(&mut self) -> io::Result<usize> {
        match timeout(READ_TIMEOUT, self.stream.read_buf(&mut self.buffer)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        }
    }
}
