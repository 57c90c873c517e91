//! Accept-loop utilities for the server runtime.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::task::TaskTracker;

use super::backoff::BackoffConfig;
use crate::{
    connection::ConnectionId,
    server::connection::{ConnectionHandles, spawn_connection_task},
};

/// Abstraction for sources of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Everything an accept loop shares with its siblings.
pub(in crate::server) struct AcceptLoopOptions {
    pub handles: ConnectionHandles,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
    pub next_id: Arc<AtomicU64>,
}

/// Accepts incoming connections and spawns a task for each.
///
/// Every accepted stream receives a fresh [`ConnectionId`]. Failures to
/// accept trigger an exponential back-off governed by `options.backoff`. The
/// loop terminates when the shutdown token is cancelled; spawned tasks are
/// tracked for graceful shutdown.
pub(in crate::server) async fn accept_loop<L>(listener: Arc<L>, options: AcceptLoopOptions)
where
    L: AcceptListener + 'static,
{
    let backoff = options.backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) = accept_iteration(&listener, &options, &backoff, delay).await {
        delay = next_delay;
    }
}

async fn accept_iteration<L>(
    listener: &Arc<L>,
    options: &AcceptLoopOptions,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener + 'static,
{
    select! {
        biased;

        () = options.handles.shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, _)) => {
                let id = ConnectionId::new(options.next_id.fetch_add(1, Ordering::Relaxed));
                spawn_connection_task(stream, id, options.handles.clone(), &options.tracker);
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                tracing::warn!(error = %e, ?local_addr, "accept error");
                sleep(delay).await;
                backoff.next_delay(delay)
            }
        }),
    }
}
