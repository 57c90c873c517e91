//! Tokio runtime adapter for pipelines.
//!
//! [`TopicServer`] owns one pipeline and drives it from a single task, so
//! every callback runs on one logical thread. Accept loops spawn a reader
//! and a writer task per TCP connection: readers forward byte chunks to the
//! pipeline task as [`ConnectionEvent`]s, and the pipeline's sends and
//! closes reach writers through an [`OutboundRegistry`].

use std::sync::Arc;

use tokio::{net::TcpListener, sync::oneshot};

use crate::{component::Component, http::HandshakeServer};

mod binding;
mod connection;
pub mod error;
mod outbound;
mod runtime;

pub use connection::ConnectionEvent;
pub use error::ServerError;
pub use outbound::{DEFAULT_OUTBOUND_CAPACITY, OUTBOUND_OVERFLOW, Outbound, OutboundRegistry};
pub use runtime::BackoffConfig;

/// Default capacity of the channel feeding the pipeline task.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Tokio server driving a single pipeline.
///
/// The server carries a typestate `S` indicating whether it is [`Unbound`]
/// or [`Bound`]. New servers start `Unbound` and must call
/// [`bind`](TopicServer::bind) or
/// [`bind_existing_listener`](TopicServer::bind_existing_listener) before
/// running.
pub struct TopicServer<C, S = Unbound> {
    pub(crate) pipeline: HandshakeServer<C>,
    pub(crate) workers: usize,
    pub(crate) event_capacity: usize,
    pub(crate) outbound_capacity: usize,
    pub(crate) backoff_config: BackoffConfig,
    /// Fired once every accept loop has been spawned.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

impl<C: Component + 'static> TopicServer<C, Unbound> {
    /// Create a server for `pipeline`.
    ///
    /// The accept worker count defaults to the number of available CPU
    /// cores (or 1 if this cannot be determined).
    #[must_use]
    pub fn new(pipeline: HandshakeServer<C>) -> Self {
        let workers = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            pipeline,
            workers,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            backoff_config: BackoffConfig::default(),
            ready_tx: None,
            state: Unbound,
        }
    }
}

impl<C: Component + 'static, S: ServerState> TopicServer<C, S> {
    /// Set the number of accept loops to spawn.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Bound the number of connection events queued for the pipeline task.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Bound the number of commands queued for each connection's writer.
    ///
    /// A connection whose queue is full when the pipeline sends to it is
    /// dropped.
    #[must_use]
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Configure the accept-loop back-off.
    #[must_use]
    pub fn accept_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff_config = config.normalized();
        self
    }

    /// Notify `tx` once the server has started accepting.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Number of accept loops that will be spawned.
    #[must_use]
    pub fn worker_count(&self) -> usize { self.workers }
}
