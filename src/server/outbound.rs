//! Registry of per-connection outbound channels.
//!
//! The pipeline task never touches sockets. Each connection's writer task
//! registers a bounded queue here; the pipeline's [`Transport`] calls are
//! translated into [`Outbound`] commands on those queues. A connection whose
//! queue fills up is not keeping pace with its traffic and is dropped rather
//! than buffered without limit.

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::{
    connection::{ConnectionId, Payload, Transport},
    metrics,
};

/// Default number of commands queued per connection before it is dropped.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Error kind recorded when a connection's queue overflows.
pub const OUTBOUND_OVERFLOW: &str = "outbound_overflow";

/// Command for a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Write these bytes to the socket.
    Data(Bytes),
    /// Flush and shut the socket down.
    Close,
}

#[derive(Debug)]
struct Writer {
    tx: mpsc::Sender<Outbound>,
    /// Cancelling stops the writer without waiting on the queue.
    closed: CancellationToken,
}

enum Queued {
    Yes,
    Full,
    Gone,
}

/// Concurrent map of writer queues keyed by [`ConnectionId`].
#[derive(Debug)]
pub struct OutboundRegistry {
    writers: DashMap<ConnectionId, Writer>,
    capacity: usize,
}

impl Default for OutboundRegistry {
    fn default() -> Self { Self::with_capacity(DEFAULT_OUTBOUND_CAPACITY) }
}

impl OutboundRegistry {
    /// Create an empty registry with the default queue capacity.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Create an empty registry whose queues hold `capacity` commands.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Commands each connection may have queued.
    #[must_use]
    pub fn capacity(&self) -> usize { self.capacity }

    /// Register a new connection and return the receiving end of its queue.
    ///
    /// `closed` is cancelled if the connection has to be dropped while its
    /// queue is full.
    pub fn register(&self, id: ConnectionId, closed: CancellationToken) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.writers.insert(id, Writer { tx, closed });
        rx
    }

    /// Forget `id`, dropping its writer queue.
    pub fn remove(&self, id: ConnectionId) { self.writers.remove(&id); }

    /// Returns `true` if `id` has a live writer.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool { self.writers.contains_key(&id) }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize { self.writers.len() }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.writers.is_empty() }

    /// Queue `command` for `id` without waiting.
    ///
    /// Returns `false` if the writer is gone or its queue is full. A full
    /// queue drops the connection: its entry is removed and its writer is
    /// cancelled.
    pub fn dispatch(&self, id: ConnectionId, command: Outbound) -> bool {
        // The shard guard must be released before the entry is removed.
        let queued = match self.writers.get(&id) {
            None => Queued::Gone,
            Some(writer) => match writer.tx.try_send(command) {
                Ok(()) => Queued::Yes,
                Err(TrySendError::Full(_)) => {
                    writer.closed.cancel();
                    Queued::Full
                }
                Err(TrySendError::Closed(_)) => Queued::Gone,
            },
        };
        match queued {
            Queued::Yes => true,
            Queued::Full => {
                self.writers.remove(&id);
                warn!(
                    connection = %id,
                    capacity = self.capacity,
                    "outbound queue full; dropping connection"
                );
                metrics::inc_errors(OUTBOUND_OVERFLOW);
                false
            }
            Queued::Gone => {
                self.writers.remove_if(&id, |_, writer| writer.tx.is_closed());
                trace!(connection = %id, "outbound command for departed connection dropped");
                false
            }
        }
    }
}

impl Transport for &OutboundRegistry {
    fn send(&mut self, id: ConnectionId, payload: Payload) {
        self.dispatch(id, Outbound::Data(payload.into_bytes()));
    }

    fn close(&mut self, id: ConnectionId) {
        self.dispatch(id, Outbound::Close);
        self.remove(id);
    }
}
