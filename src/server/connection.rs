//! Per-connection socket tasks for [`TopicServer`](super::TopicServer).

use std::{io, net::SocketAddr, sync::Arc};

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use log::{error, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::outbound::{Outbound, OutboundRegistry};
use crate::{connection::ConnectionId, metrics};

const READ_CHUNK: usize = 8 * 1024;

/// Event delivered from a socket task to the pipeline task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A TCP connection was accepted.
    Opened(ConnectionId),
    /// Bytes arrived on a connection.
    Data(ConnectionId, Bytes),
    /// The peer closed the connection.
    Closed(ConnectionId),
    /// Reading from the connection failed.
    Failed(ConnectionId, io::Error),
}

impl ConnectionEvent {
    /// Connection the event belongs to.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Opened(id) | Self::Data(id, _) | Self::Closed(id) | Self::Failed(id, _) => *id,
        }
    }
}

/// Shared handles every connection task needs.
#[derive(Clone)]
pub(super) struct ConnectionHandles {
    pub events: mpsc::Sender<ConnectionEvent>,
    pub outbound: Arc<OutboundRegistry>,
    pub shutdown: CancellationToken,
}

/// Spawn a task to serve a single TCP connection, logging and discarding any panics.
pub(super) fn spawn_connection_task(
    stream: TcpStream,
    id: ConnectionId,
    handles: ConnectionHandles,
    tracker: &TaskTracker,
) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!("Failed to retrieve peer address: error={e}");
            None
        }
    };
    tracker.spawn(async move {
        metrics::inc_connections();
        let fut = std::panic::AssertUnwindSafe(process_stream(stream, id, peer_addr, handles))
            .catch_unwind();

        if let Err(panic) = fut.await {
            let panic_msg = crate::panic::format_panic(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
            tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
        }
        metrics::dec_connections();
    });
}

async fn process_stream(
    stream: TcpStream,
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    handles: ConnectionHandles,
) {
    let (reader, writer) = stream.into_split();
    let closed = handles.shutdown.child_token();
    let rx = handles.outbound.register(id, closed.clone());
    if handles.events.send(ConnectionEvent::Opened(id)).await.is_err() {
        handles.outbound.remove(id);
        return;
    }
    tracing::debug!(connection = %id, ?peer_addr, "connection opened");

    let write = write_loop(writer, rx, closed.clone());
    let read = async {
        if let Some(event) = read_loop(reader, id, &handles.events, &closed).await {
            // The pipeline may already be gone during shutdown.
            let _ = handles.events.send(event).await;
        }
    };
    futures::join!(write, read);
}

/// Forward inbound bytes until EOF, an error, or a close from the writer.
///
/// Returns the terminal event to report, or `None` if the pipeline task has
/// stopped listening.
async fn read_loop(
    mut reader: OwnedReadHalf,
    id: ConnectionId,
    events: &mpsc::Sender<ConnectionEvent>,
    closed: &CancellationToken,
) -> Option<ConnectionEvent> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        let read = select! {
            biased;

            () = closed.cancelled() => return Some(ConnectionEvent::Closed(id)),
            read = reader.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) => return Some(ConnectionEvent::Closed(id)),
            Ok(_) => {
                let chunk = buf.split().freeze();
                if events.send(ConnectionEvent::Data(id, chunk)).await.is_err() {
                    return None;
                }
            }
            Err(e) => return Some(ConnectionEvent::Failed(id, e)),
        }
    }
}

/// Write queued commands until closed, then cancel the reader.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Outbound>,
    closed: CancellationToken,
) {
    loop {
        let command = select! {
            () = closed.cancelled() => None,
            command = rx.recv() => command,
        };
        match command {
            Some(Outbound::Data(bytes)) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::debug!(error = %e, "write failed");
                    break;
                }
            }
            Some(Outbound::Close) | None => break,
        }
    }
    let _ = writer.shutdown().await;
    closed.cancel();
}
