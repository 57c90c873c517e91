//! Runtime control for [`TopicServer`].

mod accept;
mod backoff;

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, atomic::AtomicU64},
};

pub use backoff::BackoffConfig;
use futures::Future;
use log::{error, warn};
use tokio::{select, signal, sync::mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use self::accept::{AcceptLoopOptions, accept_loop};
use super::{
    Bound,
    ServerError,
    TopicServer,
    connection::{ConnectionEvent, ConnectionHandles},
    outbound::OutboundRegistry,
};
use crate::{component::Component, connection::Transport, http::HandshakeServer};

impl<C: Component + 'static> TopicServer<C, Bound> {
    /// Run the server until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Pipeline`] if the pipeline task panicked.
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until the `shutdown` future resolves.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio::sync::oneshot;
    /// use topicwire::{app::App, server::TopicServer};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), topicwire::server::ServerError> {
    /// let server = TopicServer::new(App::default().build()).bind(([127, 0, 0, 1], 0).into())?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(async move {
    ///     server
    ///         .run_with_shutdown(async {
    ///             let _ = rx.await;
    ///         })
    ///         .await
    /// });
    ///
    /// let _ = tx.send(());
    /// handle
    ///     .await
    ///     .expect("join server task")
    ///     .expect("server run failed");
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Pipeline`] if the pipeline task panicked.
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let TopicServer {
            pipeline,
            workers,
            event_capacity,
            outbound_capacity,
            backoff_config,
            ready_tx,
            state: Bound { listener },
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let outbound = Arc::new(OutboundRegistry::with_capacity(outbound_capacity));
        let (events_tx, events_rx) = mpsc::channel(event_capacity);

        let driver = tokio::spawn(drive_pipeline(pipeline, events_rx, Arc::clone(&outbound)));

        let handles = ConnectionHandles {
            events: events_tx,
            outbound,
            shutdown: shutdown_token.clone(),
        };
        let next_id = Arc::new(AtomicU64::new(1));
        for _ in 0..workers {
            tracker.spawn(accept_loop(
                Arc::clone(&listener),
                AcceptLoopOptions {
                    handles: handles.clone(),
                    tracker: tracker.clone(),
                    backoff: backoff_config,
                    next_id: Arc::clone(&next_id),
                },
            ));
        }
        // Connection tasks hold their own senders; the driver stops once
        // every one of them is gone.
        drop(handles);

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        driver.await?;
        Ok(())
    }
}

/// Feed connection events to the pipeline one at a time.
///
/// A panic inside a pipeline callback is logged and the affected connection
/// is closed; the pipeline keeps serving every other connection.
async fn drive_pipeline<C: Component>(
    mut pipeline: HandshakeServer<C>,
    mut events: mpsc::Receiver<ConnectionEvent>,
    outbound: Arc<OutboundRegistry>,
) {
    let mut transport = &*outbound;
    while let Some(event) = events.recv().await {
        let id = event.id();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            apply(&mut pipeline, &mut transport, event);
        }));
        if let Err(panic) = outcome {
            let panic_msg = crate::panic::format_panic(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("pipeline callback panicked: panic={panic_msg}, connection={id}");
            tracing::error!(panic = %panic_msg, connection = %id, "pipeline callback panicked");
            transport.close(id);
        }
    }
    tracing::debug!(
        connections = pipeline.connection_count(),
        "pipeline task stopped"
    );
}

fn apply<C: Component>(
    pipeline: &mut HandshakeServer<C>,
    transport: &mut &OutboundRegistry,
    event: ConnectionEvent,
) {
    match event {
        ConnectionEvent::Opened(id) => pipeline.connect(id),
        ConnectionEvent::Data(id, chunk) => pipeline.receive(transport, id, chunk),
        ConnectionEvent::Closed(id) => {
            pipeline.disconnect(transport, id);
            transport.remove(id);
        }
        ConnectionEvent::Failed(id, error) => {
            pipeline.fail(transport, id, error);
            transport.remove(id);
        }
    }
}

#[cfg(test)]
mod tests;
